//! Sampled-LRU eviction.
//!
//! True global LRU needs an ordered-by-recency index touched on every read.
//! Instead, each eviction round samples a handful of keys uniformly at random
//! and removes the one with the oldest access stamp, repeating until the
//! footprint is back under the ceiling. Cost per eviction is O(sample size);
//! larger samples approach exact LRU at higher CPU cost.

use crate::error::StoreError;
use crate::keyspace::KeySpace;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

/// Default number of candidates sampled per eviction round.
pub const DEFAULT_SAMPLE_SIZE: usize = 5;

/// Owns the sampling RNG and the eviction loop.
///
/// Seeding the RNG makes victim selection fully reproducible, which the
/// eviction tests rely on.
pub struct EvictionEngine {
    sample_size: usize,
    rng: StdRng,
}

impl EvictionEngine {
    pub fn new(sample_size: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            sample_size: sample_size.max(1),
            rng,
        }
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    /// Draw a random candidate set without evicting; the expiry sweep uses
    /// this to probe for dead entries at O(count) cost.
    pub fn sample_candidates(&mut self, keyspace: &KeySpace, count: usize) -> Vec<String> {
        keyspace.sample_keys(&mut self.rng, count, None)
    }

    /// Evict entries until the footprint is at or under `ceiling`.
    ///
    /// `protect` shields the key just written by the triggering command; its
    /// size was checked against the ceiling up front, so the loop always
    /// terminates. Returns the evicted keys in eviction order so the caller
    /// can append matching delete records to the operation log.
    pub fn evict_until_within(
        &mut self,
        keyspace: &mut KeySpace,
        ceiling: usize,
        protect: Option<&str>,
    ) -> Result<Vec<String>, StoreError> {
        let mut evicted = Vec::new();

        while keyspace.footprint() > ceiling {
            let candidates = keyspace.sample_keys(&mut self.rng, self.sample_size, protect);
            let victim = candidates
                .into_iter()
                .filter_map(|key| keyspace.last_access_of(&key).map(|stamp| (key, stamp)))
                .min_by_key(|(_, stamp)| *stamp)
                .map(|(key, _)| key);

            match victim {
                Some(key) => {
                    keyspace.remove(&key);
                    debug!(key = %key, footprint = keyspace.footprint(), "evicted entry");
                    evicted.push(key);
                }
                None => {
                    return Err(StoreError::CapacityExceeded {
                        required: keyspace.footprint() - ceiling,
                        ceiling,
                    })
                }
            }
        }

        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyspace::Value;
    use chrono::Utc;

    fn insert(ks: &mut KeySpace, key: &str) {
        ks.insert(key.to_string(), Value::Str("v".into()), None, Utc::now());
    }

    fn touch(ks: &KeySpace, key: &str) {
        match ks.get(key, Utc::now()) {
            crate::keyspace::Lookup::Live(_) => {}
            other => panic!("expected live {key}, got {other:?}"),
        }
    }

    #[test]
    fn test_evicts_oldest_of_exhausted_pool() {
        let mut ks = KeySpace::new();
        insert(&mut ks, "a");
        insert(&mut ks, "b");
        insert(&mut ks, "c");
        touch(&ks, "b");
        touch(&ks, "c");

        // Sample size covers the whole pool, so the never-retouched key loses.
        let mut engine = EvictionEngine::new(5, Some(0));
        let ceiling = ks.footprint() - 1;
        let evicted = engine.evict_until_within(&mut ks, ceiling, None).unwrap();

        assert_eq!(evicted, vec!["a".to_string()]);
        assert!(ks.footprint() <= ceiling);
        assert_eq!(ks.len(), 2);
    }

    #[test]
    fn test_protected_key_survives_full_eviction() {
        let mut ks = KeySpace::new();
        for key in ["a", "b", "c", "d"] {
            insert(&mut ks, key);
        }

        let mut engine = EvictionEngine::new(5, Some(0));
        let evicted = engine.evict_until_within(&mut ks, 0, Some("d"));

        // Everything evictable goes, then the loop gives up with the
        // protected key still present.
        assert!(evicted.is_err());
        assert_eq!(ks.len(), 1);
        assert!(matches!(
            ks.get("d", Utc::now()),
            crate::keyspace::Lookup::Live(_)
        ));
    }

    #[test]
    fn test_deterministic_under_fixed_seed() {
        let run = || {
            let mut ks = KeySpace::new();
            for i in 0..32 {
                insert(&mut ks, &format!("key{i}"));
            }
            let mut engine = EvictionEngine::new(3, Some(99));
            let ceiling = ks.footprint() / 2;
            engine.evict_until_within(&mut ks, ceiling, None).unwrap()
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn test_empty_keyspace_needs_no_eviction() {
        let mut ks = KeySpace::new();
        let mut engine = EvictionEngine::new(5, Some(0));
        // Nothing to evict and footprint (0) is within any ceiling.
        assert!(engine.evict_until_within(&mut ks, 0, None).unwrap().is_empty());
    }
}
