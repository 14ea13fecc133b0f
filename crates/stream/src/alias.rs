//! Random read-only aliases.
//!
//! Binds unguessable lowercase keys to items (room names in the server), so
//! a room can be shared for reading without revealing its real name.

use std::{collections::HashMap, fmt::Debug, hash::Hash};

use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::info;

use crate::types::AliasConfig;

#[derive(Debug, thiserror::Error)]
pub enum AliasError {
    #[error("No key link found for {0}")]
    NotFound(String),
}

/// Bidirectional key ↔ item map. Each item has at most one key.
pub struct AliasRegistry<T> {
    inner: Mutex<Aliases<T>>,
    config: AliasConfig,
}

struct Aliases<T> {
    keys: HashMap<String, T>,
    links: HashMap<T, String>,
    rng: StdRng,
}

impl<T> AliasRegistry<T>
where
    T: Clone + Eq + Hash + Debug,
{
    pub fn new(config: AliasConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Registry with a deterministic key sequence.
    pub fn with_seed(config: AliasConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: AliasConfig, rng: StdRng) -> Self {
        Self {
            inner: Mutex::new(Aliases {
                keys: HashMap::new(),
                links: HashMap::new(),
                rng,
            }),
            config,
        }
    }

    /// Key for `item`, minting one if it has none yet.
    ///
    /// Collisions are retried; every `retry_increase` retries the key grows
    /// by one char.
    pub fn link(&self, item: &T) -> String {
        let mut aliases = self.inner.lock();
        if let Some(key) = aliases.links.get(item) {
            return key.clone();
        }

        let step = self.config.retry_increase.max(1);
        let mut retries = 0;
        let key = loop {
            let length = self.config.initial_length.max(1) + retries / step;
            let key = generate_key(&mut aliases.rng, length);
            if !aliases.keys.contains_key(&key) {
                break key;
            }
            retries += 1;
        };

        aliases.keys.insert(key.clone(), item.clone());
        aliases.links.insert(item.clone(), key.clone());
        info!(
            key = %key,
            item = ?item,
            total = aliases.keys.len(),
            "Added alias"
        );
        key
    }

    /// Item bound to `key`.
    pub fn resolve(&self, key: &str) -> Result<T, AliasError> {
        self.inner
            .lock()
            .keys
            .get(key)
            .cloned()
            .ok_or_else(|| AliasError::NotFound(key.to_string()))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Random string of `length` lowercase ASCII letters.
pub fn generate_key<R: Rng>(rng: &mut R, length: usize) -> String {
    (0..length).map(|_| rng.gen_range(b'a'..=b'z') as char).collect()
}
