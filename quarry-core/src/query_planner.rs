// quarry-core/src/query_planner.rs
//! Access path selection
//!
//! ```text
//! _id equality            -> IdLookup
//! leading index prefix    -> IndexScan (most covered fields, then creation order)
//! anything else / $or     -> CollectionScan
//! ```
//!
//! Plans are cached per filter fingerprint; an entry is only reused while
//! the index catalog version it was planned against is current.

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::document::{DocumentId, ID_FIELD};
use crate::index::{IndexBounds, IndexManager, ID_INDEX_NAME};
use crate::query::{CompareOp, Filter};
use crate::log_debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanKind {
    CollectionScan,
    IdLookup,
    IndexScan,
}

impl PlanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanKind::CollectionScan => "collection_scan",
            PlanKind::IdLookup => "id_lookup",
            PlanKind::IndexScan => "index_scan",
        }
    }
}

impl fmt::Display for PlanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryPlan {
    CollectionScan,
    IdLookup { id: DocumentId },
    IndexScan { index_name: String, bounds: IndexBounds },
}

impl QueryPlan {
    pub fn kind(&self) -> PlanKind {
        match self {
            QueryPlan::CollectionScan => PlanKind::CollectionScan,
            QueryPlan::IdLookup { .. } => PlanKind::IdLookup,
            QueryPlan::IndexScan { .. } => PlanKind::IndexScan,
        }
    }

    /// Name of the access path, `None` for a collection scan
    pub fn index_name(&self) -> Option<&str> {
        match self {
            QueryPlan::CollectionScan => None,
            QueryPlan::IdLookup { .. } => Some(ID_INDEX_NAME),
            QueryPlan::IndexScan { index_name, .. } => Some(index_name),
        }
    }
}

pub struct QueryPlanner;

impl QueryPlanner {
    /// Choose an access path for `filter` given the current indexes
    pub fn plan(filter: &Filter, indexes: &IndexManager) -> QueryPlan {
        let conditions = match filter.conjunction() {
            Some(conditions) if !conditions.is_empty() => conditions,
            _ => return QueryPlan::CollectionScan,
        };

        let id_equality = conditions
            .iter()
            .filter(|c| c.path == ID_FIELD && c.op == CompareOp::Eq)
            .find_map(|c| DocumentId::from_value(&c.value).ok());
        if let Some(id) = id_equality {
            return QueryPlan::IdLookup { id };
        }

        let mut best: Option<(usize, &str, IndexBounds)> = None;
        for index in indexes.iter() {
            if let Some(bounds) = index.bounds_for(&conditions) {
                let covered = bounds.covered_fields();
                if best.as_ref().map_or(true, |(c, _, _)| covered > *c) {
                    best = Some((covered, index.spec().name(), bounds));
                }
            }
        }

        match best {
            Some((covered, name, bounds)) => {
                log_debug!("Planner chose index '{}' covering {} field(s)", name, covered);
                QueryPlan::IndexScan {
                    index_name: name.to_string(),
                    bounds,
                }
            }
            None => QueryPlan::CollectionScan,
        }
    }
}

/// LRU of plans keyed by filter fingerprint
pub struct PlanCache {
    cache: Option<Mutex<LruCache<String, (u64, QueryPlan)>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanCacheStats {
    pub capacity: usize,
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
}

impl PlanCache {
    /// Capacity 0 disables caching
    pub fn new(capacity: usize) -> Self {
        PlanCache {
            cache: NonZeroUsize::new(capacity).map(|c| Mutex::new(LruCache::new(c))),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cached plan if it was made against `catalog_version`, otherwise plan afresh
    pub fn get_or_plan(&self, filter: &Filter, indexes: &IndexManager) -> QueryPlan {
        let cache = match &self.cache {
            Some(cache) => cache,
            None => return QueryPlanner::plan(filter, indexes),
        };

        let key = filter.fingerprint();
        let version = indexes.version();
        let mut cache = cache.lock();
        if let Some((planned_at, plan)) = cache.get(&key) {
            if *planned_at == version {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return plan.clone();
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let plan = QueryPlanner::plan(filter, indexes);
        cache.put(key, (version, plan.clone()));
        plan
    }

    pub fn stats(&self) -> PlanCacheStats {
        let (capacity, size) = match &self.cache {
            Some(cache) => {
                let cache = cache.lock();
                (cache.cap().get(), cache.len())
            }
            None => (0, 0),
        };
        PlanCacheStats {
            capacity,
            size,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for PlanCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanCache").field("stats", &self.stats()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::index::IndexSpec;
    use crate::value::Value;
    use serde_json::json;

    fn manager(specs: &[serde_json::Value]) -> IndexManager {
        let docs: Vec<Document> = Vec::new();
        let mut manager = IndexManager::new();
        for spec in specs {
            manager
                .create(IndexSpec::from_json(spec).unwrap(), docs.iter())
                .unwrap();
        }
        manager
    }

    fn filter(j: serde_json::Value) -> Filter {
        Filter::from_json(&j).unwrap()
    }

    #[test]
    fn test_id_equality_uses_id_lookup() {
        let plan = QueryPlanner::plan(&filter(json!({"_id": 3, "genre": "x"})), &IndexManager::new());
        assert_eq!(plan, QueryPlan::IdLookup { id: DocumentId::Int(3) });
        assert_eq!(plan.index_name(), Some("_id_"));
    }

    #[test]
    fn test_no_index_is_scan() {
        let plan = QueryPlanner::plan(&filter(json!({"genre": "Fiction"})), &IndexManager::new());
        assert_eq!(plan.kind(), PlanKind::CollectionScan);
        assert_eq!(plan.index_name(), None);
    }

    #[test]
    fn test_prefers_most_covered_fields() {
        let indexes = manager(&[json!({"author": 1}), json!({"author": 1, "published_year": -1})]);
        let plan = QueryPlanner::plan(
            &filter(json!({"author": "Orwell", "published_year": {"$gt": 1940}})),
            &indexes,
        );
        assert_eq!(plan.index_name(), Some("author_1_published_year_-1"));

        // tie on one covered field: first created wins
        let plan = QueryPlanner::plan(&filter(json!({"author": "Orwell"})), &indexes);
        assert_eq!(plan.index_name(), Some("author_1"));
    }

    #[test]
    fn test_or_and_non_prefix_scan() {
        let indexes = manager(&[json!({"author": 1, "published_year": 1})]);
        let plan = QueryPlanner::plan(
            &filter(json!({"$or": [{"author": "A"}, {"author": "B"}]})),
            &indexes,
        );
        assert_eq!(plan.kind(), PlanKind::CollectionScan);
        let plan = QueryPlanner::plan(&filter(json!({"published_year": 1950})), &indexes);
        assert_eq!(plan.kind(), PlanKind::CollectionScan);
        let plan = QueryPlanner::plan(&filter(json!({"author": {"$ne": "A"}})), &indexes);
        assert_eq!(plan.kind(), PlanKind::CollectionScan);
    }

    #[test]
    fn test_plan_cache_hits_and_invalidation() {
        let mut indexes = manager(&[]);
        let cache = PlanCache::new(8);
        let f = filter(json!({"title": "1984"}));

        assert_eq!(cache.get_or_plan(&f, &indexes).kind(), PlanKind::CollectionScan);
        assert_eq!(cache.get_or_plan(&f, &indexes).kind(), PlanKind::CollectionScan);
        assert_eq!(cache.stats().hits, 1);

        let docs: Vec<Document> = Vec::new();
        indexes.create(IndexSpec::ascending("title"), docs.iter()).unwrap();
        let plan = cache.get_or_plan(&f, &indexes);
        assert_eq!(plan.index_name(), Some("title_1"));
        assert_eq!(cache.stats().misses, 2);
    }

    #[test]
    fn test_disabled_cache() {
        let cache = PlanCache::new(0);
        let f = Filter::eq("title", Value::from("1984"));
        cache.get_or_plan(&f, &IndexManager::new());
        let stats = cache.stats();
        assert_eq!((stats.capacity, stats.size, stats.hits), (0, 0, 0));
    }
}
