// quarry-core/src/update.rs
//! Field-level update mutations
//!
//! Accepted forms:
//!
//! ```text
//! {"$set": {"price": 15.99}, "$unset": {"discount": ""}, "$inc": {"stock": -1}}
//! {"price": 15.99}                       // bare document = $set
//! ```

use crate::document::{Document, ID_FIELD};
use crate::error::{QuarryError, Result};
use crate::value::Value;

/// One field operation of a mutation
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    Set { path: String, value: Value },
    Unset { path: String },
    Inc { path: String, amount: f64 },
}

impl UpdateOp {
    fn path(&self) -> &str {
        match self {
            UpdateOp::Set { path, .. } | UpdateOp::Unset { path } | UpdateOp::Inc { path, .. } => {
                path
            }
        }
    }
}

/// Parsed update, applied in declaration order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Mutation {
    ops: Vec<UpdateOp>,
}

impl Mutation {
    pub fn new() -> Self {
        Self::default()
    }

    /// `$set` a single field
    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Set {
            path: path.into(),
            value: value.into(),
        });
        self
    }

    pub fn unset(mut self, path: impl Into<String>) -> Self {
        self.ops.push(UpdateOp::Unset { path: path.into() });
        self
    }

    pub fn inc(mut self, path: impl Into<String>, amount: f64) -> Self {
        self.ops.push(UpdateOp::Inc {
            path: path.into(),
            amount,
        });
        self
    }

    pub fn ops(&self) -> &[UpdateOp] {
        &self.ops
    }

    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        Mutation::parse(&Value::from(json))
    }

    pub fn parse(value: &Value) -> Result<Self> {
        let map = value.as_document().ok_or_else(|| {
            QuarryError::InvalidUpdate(format!(
                "update must be a document, got {}",
                value.kind_name()
            ))
        })?;
        if map.is_empty() {
            return Err(QuarryError::InvalidUpdate("empty update".to_string()));
        }

        let operator_keys = map.keys().filter(|k| k.starts_with('$')).count();
        let mut mutation = Mutation::new();

        if operator_keys == 0 {
            for (path, value) in map {
                mutation.push(UpdateOp::Set {
                    path: path.clone(),
                    value: value.clone(),
                })?;
            }
            return Ok(mutation);
        }
        if operator_keys != map.len() {
            return Err(QuarryError::InvalidUpdate(
                "cannot mix update operators and plain fields".to_string(),
            ));
        }

        for (op, fields) in map {
            let fields = fields.as_document().ok_or_else(|| {
                QuarryError::InvalidUpdate(format!("{} expects a document", op))
            })?;
            for (path, operand) in fields {
                let update = match op.as_str() {
                    "$set" => UpdateOp::Set {
                        path: path.clone(),
                        value: operand.clone(),
                    },
                    "$unset" => UpdateOp::Unset { path: path.clone() },
                    "$inc" => UpdateOp::Inc {
                        path: path.clone(),
                        amount: operand.as_f64().ok_or_else(|| {
                            QuarryError::InvalidUpdate(format!(
                                "$inc amount for '{}' must be a number",
                                path
                            ))
                        })?,
                    },
                    other => {
                        return Err(QuarryError::InvalidUpdate(format!(
                            "unknown update operator: {}",
                            other
                        )))
                    }
                };
                mutation.push(update)?;
            }
        }
        Ok(mutation)
    }

    fn push(&mut self, op: UpdateOp) -> Result<()> {
        let path = op.path();
        if path.is_empty() {
            return Err(QuarryError::InvalidUpdate("empty field path".to_string()));
        }
        if path == ID_FIELD || path.starts_with("_id.") {
            return Err(QuarryError::InvalidUpdate(
                "the _id field is immutable".to_string(),
            ));
        }
        self.ops.push(op);
        Ok(())
    }

    /// Apply to a copy of `doc`.
    ///
    /// Returns `None` when nothing would change, so callers can skip the
    /// write entirely. On error `doc` is untouched.
    pub fn apply(&self, doc: &Document) -> Result<Option<Document>> {
        let mut updated = doc.clone();
        let mut changed = false;

        for op in &self.ops {
            match op {
                UpdateOp::Set { path, value } => {
                    if updated.get(path) != Some(value) {
                        updated.set(path, value.clone())?;
                        changed = true;
                    }
                }
                UpdateOp::Unset { path } => {
                    if updated.remove(path)?.is_some() {
                        changed = true;
                    }
                }
                UpdateOp::Inc { path, amount } => {
                    let next = match updated.get(path) {
                        None => *amount,
                        Some(Value::Number(current)) => current + amount,
                        Some(other) => {
                            return Err(QuarryError::InvalidUpdate(format!(
                                "cannot $inc '{}': field is {}",
                                path,
                                other.kind_name()
                            )))
                        }
                    };
                    let next = Value::Number(next);
                    if updated.get(path) != Some(&next) {
                        updated.set(path, next)?;
                        changed = true;
                    }
                }
            }
        }

        Ok(if changed { Some(updated) } else { None })
    }
}
