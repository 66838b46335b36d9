// quarry-core/src/aggregation/expression.rs
//! Aggregation expressions
//!
//! ```text
//! "$published_year"                                   field reference
//! 10, "text", null                                    literal
//! {"$literal": "$not_a_ref"}                          literal, unparsed
//! {"$multiply": [{"$floor": {"$divide": ["$published_year", 10]}}, 10]}
//! {"title": "$title", "year": "$published_year"}      object expression
//! ```
//!
//! Evaluation is strict: an absent field, a non-numeric arithmetic operand
//! or a division by zero is `InvalidExpression` for that document.

use crate::error::{QuarryError, Result};
use crate::value::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Value),
    /// Dotted path without the leading `$`
    FieldRef(String),
    Object(Vec<(String, Expression)>),
    Array(Vec<Expression>),
    Add(Vec<Expression>),
    Subtract(Box<Expression>, Box<Expression>),
    Multiply(Vec<Expression>),
    Divide(Box<Expression>, Box<Expression>),
    Floor(Box<Expression>),
}

impl Expression {
    pub fn field(path: impl Into<String>) -> Self {
        Expression::FieldRef(path.into())
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Expression::Literal(value.into())
    }

    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        Expression::parse(&Value::from(json))
    }

    pub fn parse(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) if s.starts_with('$') => {
                let path = &s[1..];
                if path.is_empty() || path.starts_with('$') {
                    return Err(QuarryError::AggregationError(format!(
                        "invalid field reference '{}'",
                        s
                    )));
                }
                Ok(Expression::FieldRef(path.to_string()))
            }
            Value::Array(items) => Ok(Expression::Array(
                items.iter().map(Expression::parse).collect::<Result<_>>()?,
            )),
            Value::Document(map) => parse_document(map),
            other => Ok(Expression::Literal(other.clone())),
        }
    }

    /// Evaluate against a document value
    pub fn evaluate(&self, doc: &Value) -> Result<Value> {
        match self {
            Expression::Literal(v) => Ok(v.clone()),
            Expression::FieldRef(path) => doc.get_path(path).cloned().ok_or_else(|| {
                QuarryError::InvalidExpression(format!("field '{}' is missing", path))
            }),
            Expression::Object(fields) => {
                let mut map = Map::with_capacity(fields.len());
                for (name, expr) in fields {
                    map.insert(name.clone(), expr.evaluate(doc)?);
                }
                Ok(Value::Document(map))
            }
            Expression::Array(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|e| e.evaluate(doc))
                    .collect::<Result<_>>()?,
            )),
            Expression::Add(items) => {
                let mut total = 0.0;
                for e in items {
                    total += number(e.evaluate(doc)?, "$add")?;
                }
                Ok(Value::Number(total))
            }
            Expression::Multiply(items) => {
                let mut product = 1.0;
                for e in items {
                    product *= number(e.evaluate(doc)?, "$multiply")?;
                }
                Ok(Value::Number(product))
            }
            Expression::Subtract(a, b) => {
                let a = number(a.evaluate(doc)?, "$subtract")?;
                let b = number(b.evaluate(doc)?, "$subtract")?;
                Ok(Value::Number(a - b))
            }
            Expression::Divide(a, b) => {
                let a = number(a.evaluate(doc)?, "$divide")?;
                let b = number(b.evaluate(doc)?, "$divide")?;
                if b == 0.0 {
                    return Err(QuarryError::InvalidExpression(
                        "$divide by zero".to_string(),
                    ));
                }
                Ok(Value::Number(a / b))
            }
            Expression::Floor(e) => Ok(Value::Number(number(e.evaluate(doc)?, "$floor")?.floor())),
        }
    }

    /// Like [`Expression::evaluate`], but an absent field reference yields
    /// `None` instead of an error. Only the top-level reference is relaxed.
    pub fn evaluate_optional(&self, doc: &Value) -> Result<Option<Value>> {
        match self {
            Expression::FieldRef(path) => Ok(doc.get_path(path).cloned()),
            other => other.evaluate(doc).map(Some),
        }
    }
}

fn number(value: Value, op: &str) -> Result<f64> {
    match value {
        Value::Number(n) => Ok(n),
        other => Err(QuarryError::InvalidExpression(format!(
            "{} expects numbers, got {}",
            op,
            other.kind_name()
        ))),
    }
}

fn parse_document(map: &Map) -> Result<Expression> {
    let operators = map.keys().filter(|k| k.starts_with('$')).count();
    if operators == 0 {
        let mut fields = Vec::with_capacity(map.len());
        for (name, value) in map {
            fields.push((name.clone(), Expression::parse(value)?));
        }
        return Ok(Expression::Object(fields));
    }
    if map.len() != 1 {
        return Err(QuarryError::AggregationError(
            "an operator expression must have exactly one key".to_string(),
        ));
    }

    let (op, args) = match map.iter().next() {
        Some(entry) => entry,
        None => return Ok(Expression::Object(Vec::new())),
    };
    match op.as_str() {
        "$literal" => Ok(Expression::Literal(args.clone())),
        "$add" => Ok(Expression::Add(parse_args(op, args, 1, usize::MAX)?)),
        "$multiply" => Ok(Expression::Multiply(parse_args(op, args, 1, usize::MAX)?)),
        "$subtract" => {
            let mut args = parse_args(op, args, 2, 2)?;
            let b = args.remove(1);
            let a = args.remove(0);
            Ok(Expression::Subtract(Box::new(a), Box::new(b)))
        }
        "$divide" => {
            let mut args = parse_args(op, args, 2, 2)?;
            let b = args.remove(1);
            let a = args.remove(0);
            Ok(Expression::Divide(Box::new(a), Box::new(b)))
        }
        "$floor" => {
            let mut args = parse_args(op, args, 1, 1)?;
            Ok(Expression::Floor(Box::new(args.remove(0))))
        }
        other => Err(QuarryError::AggregationError(format!(
            "unknown expression operator: {}",
            other
        ))),
    }
}

/// Operator arguments: an array, or a single non-array operand
fn parse_args(op: &str, args: &Value, min: usize, max: usize) -> Result<Vec<Expression>> {
    let parsed = match args {
        Value::Array(items) => items.iter().map(Expression::parse).collect::<Result<Vec<_>>>()?,
        single => vec![Expression::parse(single)?],
    };
    if parsed.len() < min || parsed.len() > max {
        let expected = if min == max {
            format!("{}", min)
        } else {
            format!("at least {}", min)
        };
        return Err(QuarryError::AggregationError(format!(
            "{} takes {} argument(s), got {}",
            op,
            expected,
            parsed.len()
        )));
    }
    Ok(parsed)
}
