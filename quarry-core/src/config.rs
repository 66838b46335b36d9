//! Collection configuration
//!
//! Mirrors how the engine is tuned per collection: which identity strategy
//! `insert` uses when a document has no `_id`, and how many query plans are
//! cached.

use serde::{Deserialize, Serialize};

/// Default number of cached query plans per collection
pub const DEFAULT_PLAN_CACHE_CAPACITY: usize = 256;

/// How `insert` assigns an identity to documents without `_id`
///
/// # Examples
///
/// ```rust
/// use quarry_core::IdStrategy;
///
/// // Auto-increment integers (default): 1, 2, 3, ...
/// let strategy = IdStrategy::default();
/// assert_eq!(strategy, IdStrategy::AutoIncrement);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IdStrategy {
    /// Integer identities from a per-collection counter that never goes back
    #[default]
    AutoIncrement,
    /// Random UUID v4 strings
    Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub id_strategy: IdStrategy,
    /// Plans kept in the LRU plan cache; 0 disables caching
    pub plan_cache_capacity: usize,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        CollectionConfig {
            id_strategy: IdStrategy::AutoIncrement,
            plan_cache_capacity: DEFAULT_PLAN_CACHE_CAPACITY,
        }
    }
}

impl CollectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id_strategy(mut self, id_strategy: IdStrategy) -> Self {
        self.id_strategy = id_strategy;
        self
    }

    pub fn with_plan_cache_capacity(mut self, capacity: usize) -> Self {
        self.plan_cache_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CollectionConfig::default();
        assert_eq!(config.id_strategy, IdStrategy::AutoIncrement);
        assert_eq!(config.plan_cache_capacity, DEFAULT_PLAN_CACHE_CAPACITY);
    }

    #[test]
    fn test_builder() {
        let config = CollectionConfig::new()
            .with_id_strategy(IdStrategy::Uuid)
            .with_plan_cache_capacity(0);
        assert_eq!(config.id_strategy, IdStrategy::Uuid);
        assert_eq!(config.plan_cache_capacity, 0);
    }

    #[test]
    fn test_config_serde() {
        let json = serde_json::to_string(&CollectionConfig::default()).unwrap();
        let parsed: CollectionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, CollectionConfig::default());
    }
}
