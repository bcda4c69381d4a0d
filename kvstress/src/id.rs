//! Request identifiers and the keys derived from them.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// The default prefix of every [derived key](RequestId::key).
pub const DEFAULT_KEY_PREFIX: &str = "stress-";

/// The largest value a request identifier may start from.
pub const MAX_FIRST_ID: u64 = i64::MAX as u64;

/// Identifier of a single admitted request.
///
/// Identifiers are handed out in strictly increasing order within a run, so the keys derived
/// from them never collide. Nothing is persisted, so two runs may well reuse the same keys.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RequestId(u64);

impl RequestId {
    /// Creates an identifier with the given value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Creates a random identifier from an RNG seeded with the current time.
    ///
    /// The value is at most [`MAX_FIRST_ID`], which leaves room for `2^63` increments.
    pub fn seeded() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .and_then(|elapsed| u64::try_from(elapsed.as_nanos()).ok())
            .unwrap_or_default();

        let mut rng = SmallRng::seed_from_u64(nanos);
        Self(rng.random_range(0..=MAX_FIRST_ID))
    }

    /// Returns the raw value of this identifier.
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Returns the identifier immediately following this one.
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Builds the key for this identifier, which doubles as the value written to the store.
    pub fn key(self, prefix: &str) -> String {
        format!("{prefix}{}", self.0)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn key_is_prefix_and_decimal_id() {
        assert_eq!(RequestId::new(7).key(DEFAULT_KEY_PREFIX), "stress-7");
        assert_eq!(RequestId::new(0).key("bench:"), "bench:0");
    }

    #[test]
    fn seeded_stays_below_max() {
        for _ in 0..100 {
            assert!(RequestId::seeded().value() <= MAX_FIRST_ID);
        }
    }

    #[test]
    fn successive_ids_yield_distinct_keys() {
        let mut id = RequestId::seeded();
        let mut keys = HashSet::new();

        for _ in 0..10_000 {
            let next = id.next();
            assert!(next > id);
            id = next;
            assert!(keys.insert(id.key(DEFAULT_KEY_PREFIX)));
        }
    }
}
