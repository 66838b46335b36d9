// quarry-core/src/lib.rs
// In-process document collection query engine

pub mod aggregation;
pub mod cancel;
pub mod collection;
pub mod config;
pub mod cursor;
pub mod document;
pub mod error;
pub mod explain;
pub mod find_options;
pub mod index;
pub mod logging;
pub mod persistence;
pub mod query;
pub mod query_planner;
pub mod update;
pub mod value;
pub mod value_utils;

// Public exports
pub use aggregation::{
    Accumulator, AggregateOutput, ComputeStage, Expression, GroupStage, Pipeline, Stage,
};
pub use cancel::CancellationToken;
pub use collection::Collection;
pub use config::{CollectionConfig, IdStrategy, DEFAULT_PLAN_CACHE_CAPACITY};
pub use cursor::FindCursor;
pub use document::{Document, DocumentId, ID_FIELD};
pub use error::{QuarryError, Result};
pub use explain::{ExecutionStats, ExplainResult};
pub use find_options::{FindOptions, Projection, SortOrder, SortSpec};
pub use index::{IndexScan, IndexSpec, ID_INDEX_NAME};
pub use logging::{get_log_level, init_from_env, set_log_level, LogLevel};
pub use persistence::{ChangeRecord, FileJournal, MemoryJournal, PersistenceAdapter};
pub use query::{CompareOp, Condition, Filter};
pub use query_planner::{PlanCacheStats, PlanKind, QueryPlan};
pub use update::Mutation;
pub use value::{Map, Value};
