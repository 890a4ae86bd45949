//! Immutable Key/Value Entry
//!
//! Every occupied bucket position holds an `Arc<KeyVal<K, V>>`. Entries are
//! never mutated in place: replacing a value installs a new entry with a
//! compare-and-exchange, so a reader that loaded the old entry keeps a
//! consistent key/value pair for as long as it holds it.

use core::fmt;

/// An immutable key/value pair stored in a collision bucket.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct KeyVal<K, V> {
    key: K,
    value: V,
}

impl<K, V> KeyVal<K, V> {
    /// Creates a new entry.
    #[inline]
    pub fn new(key: K, value: V) -> Self {
        Self { key, value }
    }

    /// Returns a reference to the key.
    #[inline]
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Returns a reference to the value.
    #[inline]
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Consumes the entry, returning the key and value.
    #[inline]
    pub fn into_parts(self) -> (K, V) {
        (self.key, self.value)
    }

    /// Returns `true` if this entry is stored under `key`.
    #[inline]
    pub(crate) fn is_for(&self, key: &K) -> bool
    where
        K: Eq,
    {
        self.key == *key
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for KeyVal<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyVal")
            .field("key", &self.key)
            .field("value", &self.value)
            .finish()
    }
}

impl<K: fmt::Display, V: fmt::Display> fmt::Display for KeyVal<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let entry = KeyVal::new("key", 42);
        assert_eq!(*entry.key(), "key");
        assert_eq!(*entry.value(), 42);
        assert!(entry.is_for(&"key"));
        assert!(!entry.is_for(&"other"));
        assert_eq!(entry.into_parts(), ("key", 42));
    }

    #[test]
    fn test_display_and_debug() {
        let entry = KeyVal::new(7, "seven");
        assert_eq!(format!("{}", entry), "7=seven");
        assert_eq!(
            format!("{:?}", entry),
            "KeyVal { key: 7, value: \"seven\" }"
        );
    }
}
