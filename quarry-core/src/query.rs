// quarry-core/src/query.rs
//! Filter language
//!
//! Filters are written as documents and parsed once into a predicate tree:
//!
//! ```text
//! {"genre": "Fiction", "published_year": {"$gt": 1950}}
//!   -> And[ genre $eq "Fiction", published_year $gt 1950 ]
//! {"$or": [{"price": {"$lt": 10}}, {"author": "Orwell"}]}
//!   -> Or[ price $lt 10, author $eq "Orwell" ]
//! ```
//!
//! Sibling keys are ANDed. A field condition is an operator document when
//! every key starts with `$`; any other value (including a document without
//! `$` keys) is an equality literal.

pub mod operators;

use crate::document::Document;
use crate::error::{QuarryError, Result};
use crate::value::{Map, Value};
use crate::value_utils::{canonical_string, get_path};

pub use operators::CompareOp;

/// Leaf predicate: `path op value`
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub path: String,
    pub op: CompareOp,
    pub value: Value,
}

impl Condition {
    pub fn new(path: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Condition {
            path: path.into(),
            op,
            value: value.into(),
        }
    }

    pub fn matches(&self, fields: &Map) -> bool {
        self.op.matches(get_path(fields, &self.path), &self.value)
    }
}

/// Predicate tree over documents
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// All children match; an empty `And` matches everything
    And(Vec<Filter>),
    /// At least one child matches
    Or(Vec<Filter>),
    Condition(Condition),
}

impl Default for Filter {
    fn default() -> Self {
        Filter::all()
    }
}

impl Filter {
    /// Filter matching every document (`{}`)
    pub fn all() -> Self {
        Filter::And(Vec::new())
    }

    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Condition(Condition::new(path, CompareOp::Eq, value))
    }

    pub fn ne(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Condition(Condition::new(path, CompareOp::Ne, value))
    }

    pub fn gt(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Condition(Condition::new(path, CompareOp::Gt, value))
    }

    pub fn gte(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Condition(Condition::new(path, CompareOp::Gte, value))
    }

    pub fn lt(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Condition(Condition::new(path, CompareOp::Lt, value))
    }

    pub fn lte(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Condition(Condition::new(path, CompareOp::Lte, value))
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or(filters)
    }

    /// Parse a filter from JSON
    ///
    /// # Examples
    ///
    /// ```
    /// use quarry_core::Filter;
    /// use serde_json::json;
    ///
    /// let filter = Filter::from_json(&json!({
    ///     "genre": "Fiction",
    ///     "published_year": {"$gt": 1950}
    /// })).unwrap();
    /// assert!(!filter.is_empty());
    /// ```
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        Filter::parse(&Value::from(json))
    }

    /// Parse a filter document
    pub fn parse(value: &Value) -> Result<Self> {
        let map = value.as_document().ok_or_else(|| {
            QuarryError::InvalidQuery(format!(
                "filter must be a document, got {}",
                value.kind_name()
            ))
        })?;

        let mut children = Vec::with_capacity(map.len());
        for (key, condition) in map {
            match key.as_str() {
                "$and" => children.push(Filter::And(parse_clauses(key, condition)?)),
                "$or" => children.push(Filter::Or(parse_clauses(key, condition)?)),
                k if k.starts_with('$') => {
                    return Err(QuarryError::InvalidQuery(format!(
                        "unknown top-level operator: {}",
                        k
                    )))
                }
                "" => {
                    return Err(QuarryError::InvalidQuery(
                        "empty field path".to_string(),
                    ))
                }
                path => parse_field(path, condition, &mut children)?,
            }
        }

        if children.len() == 1 {
            Ok(children.remove(0))
        } else {
            Ok(Filter::And(children))
        }
    }

    /// True for the match-everything filter
    pub fn is_empty(&self) -> bool {
        matches!(self, Filter::And(children) if children.iter().all(Filter::is_empty))
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.matches_map(doc.fields())
    }

    /// Match against a bare value; non-documents never match a non-empty filter
    pub fn matches_value(&self, value: &Value) -> bool {
        match value.as_document() {
            Some(map) => self.matches_map(map),
            None => self.is_empty(),
        }
    }

    pub fn matches_map(&self, fields: &Map) -> bool {
        match self {
            Filter::And(children) => children.iter().all(|f| f.matches_map(fields)),
            Filter::Or(children) => children.iter().any(|f| f.matches_map(fields)),
            Filter::Condition(condition) => condition.matches(fields),
        }
    }

    /// Leaf conditions of the top-level conjunction.
    ///
    /// Nested `$and` groups are flattened. Returns `None` when the filter
    /// contains an `$or`, which index planning never serves.
    pub fn conjunction(&self) -> Option<Vec<&Condition>> {
        let mut leaves = Vec::new();
        if self.collect_conjunction(&mut leaves) {
            Some(leaves)
        } else {
            None
        }
    }

    fn collect_conjunction<'a>(&'a self, out: &mut Vec<&'a Condition>) -> bool {
        match self {
            Filter::Condition(condition) => {
                out.push(condition);
                true
            }
            Filter::And(children) => children.iter().all(|f| f.collect_conjunction(out)),
            Filter::Or(_) => false,
        }
    }

    /// Filter back in document form (`{"$and": [...]}` for groups)
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        match self {
            Filter::And(children) => {
                map.insert(
                    "$and".to_string(),
                    Value::Array(children.iter().map(Filter::to_value).collect()),
                );
            }
            Filter::Or(children) => {
                map.insert(
                    "$or".to_string(),
                    Value::Array(children.iter().map(Filter::to_value).collect()),
                );
            }
            Filter::Condition(c) => {
                let mut op = Map::new();
                op.insert(c.op.name().to_string(), c.value.clone());
                map.insert(c.path.clone(), Value::Document(op));
            }
        }
        Value::Document(map)
    }

    /// Stable key of the filter's shape and literals (plan cache key)
    pub fn fingerprint(&self) -> String {
        canonical_string(&self.to_value())
    }
}

fn parse_clauses(operator: &str, value: &Value) -> Result<Vec<Filter>> {
    match value {
        Value::Array(items) if !items.is_empty() => items.iter().map(Filter::parse).collect(),
        _ => Err(QuarryError::InvalidQuery(format!(
            "{} expects a non-empty array of filters",
            operator
        ))),
    }
}

fn parse_field(path: &str, condition: &Value, out: &mut Vec<Filter>) -> Result<()> {
    let operators = match condition {
        Value::Document(map) if !map.is_empty() && map.keys().any(|k| k.starts_with('$')) => map,
        literal => {
            out.push(Filter::eq(path, literal.clone()));
            return Ok(());
        }
    };

    for (name, operand) in operators {
        if !name.starts_with('$') {
            return Err(QuarryError::InvalidQuery(format!(
                "cannot mix operators and fields in the condition on '{}'",
                path
            )));
        }
        let op = CompareOp::from_name(name)
            .ok_or_else(|| QuarryError::InvalidQuery(format!("unknown operator: {}", name)))?;
        out.push(Filter::Condition(Condition::new(path, op, operand.clone())));
    }
    Ok(())
}
