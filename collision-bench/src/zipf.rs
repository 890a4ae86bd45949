//! Scrambled Zipfian key generator
//!
//! Ranks are drawn with the rejection-free method from Gray et al.,
//! "Quickly Generating Billion-Record Synthetic Databases", then hashed with
//! FNV-1a so that the popular ranks land all over the key space instead of
//! clustering at the low keys.

use rand::Rng;

/// Skew used by YCSB-style workloads.
pub const DEFAULT_THETA: f64 = 0.99;

const FNV_OFFSET_BASIS_64: u64 = 0xCBF2_9CE4_8422_2325;
const FNV_PRIME_64: u64 = 1_099_511_628_211;

/// Draws keys in `0..items` whose popularity follows a Zipf law.
#[derive(Debug, Clone)]
pub struct ScrambledZipf {
    items: u64,
    alpha: f64,
    zetan: f64,
    eta: f64,
    half_pow_theta: f64,
}

impl ScrambledZipf {
    /// Precomputes the zeta constant, which is linear in `items`.
    ///
    /// `items` must be at least 2 and `theta` must lie in `(0, 1)`.
    pub fn new(items: u64, theta: f64) -> Self {
        assert!(items >= 2, "zipf needs at least two items");
        assert!(theta > 0.0 && theta < 1.0, "theta must be in (0, 1)");

        let zetan = zeta(items, theta);
        let zeta2 = zeta(2, theta);
        let eta = (1.0 - (2.0 / items as f64).powf(1.0 - theta)) / (1.0 - zeta2 / zetan);
        Self {
            items,
            alpha: 1.0 / (1.0 - theta),
            zetan,
            eta,
            half_pow_theta: 0.5f64.powf(theta),
        }
    }

    /// Popularity rank: 0 is the hottest item.
    pub fn next_rank<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        let u: f64 = rng.gen();
        let uz = u * self.zetan;
        if uz < 1.0 {
            return 0;
        }
        if uz < 1.0 + self.half_pow_theta {
            return 1;
        }
        let rank = (self.items as f64 * (self.eta * u - self.eta + 1.0).powf(self.alpha)) as u64;
        rank.min(self.items - 1)
    }

    /// Key for the next request.
    pub fn next_key<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        fnv1a_64(self.next_rank(rng)) % self.items
    }
}

fn zeta(items: u64, theta: f64) -> f64 {
    (1..=items).map(|i| 1.0 / (i as f64).powf(theta)).sum()
}

/// FNV-1a over the little-endian bytes of `value`.
pub fn fnv1a_64(value: u64) -> u64 {
    value.to_le_bytes().iter().fold(FNV_OFFSET_BASIS_64, |hash, &octet| {
        (hash ^ u64::from(octet)).wrapping_mul(FNV_PRIME_64)
    })
}
