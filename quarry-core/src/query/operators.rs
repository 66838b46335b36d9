// quarry-core/src/query/operators.rs
//! Comparison operators used by filter leaves
//!
//! ```text
//! { field: value }            -> $eq
//! { field: { $gt: value } }   -> $gt
//! ```
//!
//! Every operator shares two rules:
//!
//! - a missing field never matches (missing is not null, `$ne` included)
//! - range operators only match values of the operand's kind; anything
//!   incomparable is excluded

use crate::value::Value;
use lazy_static::lazy_static;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    /// Operator name as written in filters (`"$gt"`)
    pub fn name(&self) -> &'static str {
        match self {
            CompareOp::Eq => "$eq",
            CompareOp::Ne => "$ne",
            CompareOp::Gt => "$gt",
            CompareOp::Gte => "$gte",
            CompareOp::Lt => "$lt",
            CompareOp::Lte => "$lte",
        }
    }

    /// Look up an operator by name
    pub fn from_name(name: &str) -> Option<CompareOp> {
        OPERATOR_REGISTRY.get(name).copied()
    }

    /// `$gt`, `$gte`, `$lt`, `$lte`
    pub fn is_range(&self) -> bool {
        self.is_lower_bound() || self.is_upper_bound()
    }

    pub fn is_lower_bound(&self) -> bool {
        matches!(self, CompareOp::Gt | CompareOp::Gte)
    }

    pub fn is_upper_bound(&self) -> bool {
        matches!(self, CompareOp::Lt | CompareOp::Lte)
    }

    /// Whether `$gte`/`$lte` style (bound value itself matches)
    pub fn is_inclusive(&self) -> bool {
        matches!(self, CompareOp::Gte | CompareOp::Lte | CompareOp::Eq)
    }

    /// Check a document value against the operand
    pub fn matches(&self, doc_value: Option<&Value>, operand: &Value) -> bool {
        let value = match doc_value {
            Some(v) => v,
            None => return false,
        };
        match self {
            CompareOp::Eq => value == operand,
            CompareOp::Ne => value != operand,
            CompareOp::Gt => compare_with_predicate(value, operand, |o| o == Ordering::Greater),
            CompareOp::Gte => compare_with_predicate(value, operand, |o| o != Ordering::Less),
            CompareOp::Lt => compare_with_predicate(value, operand, |o| o == Ordering::Less),
            CompareOp::Lte => compare_with_predicate(value, operand, |o| o != Ordering::Greater),
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

lazy_static! {
    /// Operator names accepted inside a field condition
    static ref OPERATOR_REGISTRY: HashMap<&'static str, CompareOp> = {
        let mut registry = HashMap::new();
        for op in [
            CompareOp::Eq,
            CompareOp::Ne,
            CompareOp::Gt,
            CompareOp::Gte,
            CompareOp::Lt,
            CompareOp::Lte,
        ] {
            registry.insert(op.name(), op);
        }
        registry
    };
}

/// Range comparison helper: incomparable pairs never match
fn compare_with_predicate<F>(value: &Value, operand: &Value, predicate: F) -> bool
where
    F: Fn(Ordering) -> bool,
{
    value.compare(operand).map(predicate).unwrap_or(false)
}
