// quarry-core/src/explain.rs
// Execution statistics reported by explain()

use serde::Serialize;
use std::time::Duration;

use crate::query_planner::{PlanKind, QueryPlan};

/// Counters gathered while a query runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    /// Documents fetched and tested against the filter
    pub docs_examined: u64,
    /// Index entries visited (identity lookups count one per hit)
    pub keys_examined: u64,
    pub docs_returned: u64,
}

/// Result of `explain`: which access path ran and what it cost
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplainResult {
    pub plan: PlanKind,
    pub index_used: Option<String>,
    pub docs_examined: u64,
    pub keys_examined: u64,
    pub docs_returned: u64,
    pub execution_time_micros: u64,
}

impl ExplainResult {
    pub fn new(plan: &QueryPlan, stats: ExecutionStats, elapsed: Duration) -> Self {
        ExplainResult {
            plan: plan.kind(),
            index_used: plan.index_name().map(str::to_string),
            docs_examined: stats.docs_examined,
            keys_examined: stats.keys_examined,
            docs_returned: stats.docs_returned,
            execution_time_micros: elapsed.as_micros() as u64,
        }
    }

    pub fn execution_time(&self) -> Duration {
        Duration::from_micros(self.execution_time_micros)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "plan": self.plan.as_str(),
            "indexUsed": self.index_used,
            "executionStats": {
                "docsExamined": self.docs_examined,
                "keysExamined": self.keys_examined,
                "docsReturned": self.docs_returned,
                "executionTimeMicros": self.execution_time_micros,
            }
        })
    }
}
