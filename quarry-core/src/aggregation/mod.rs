// quarry-core/src/aggregation/mod.rs
// Aggregation pipeline implementation
//
// Stages run in order, each one fully materializing its output before the
// next starts. Per-document expression failures drop the document and are
// counted in `AggregateOutput::skipped`; structural errors fail the call.

pub mod expression;

use ahash::RandomState;
use indexmap::IndexMap;
use serde::Serialize;

use crate::cancel::CancellationToken;
use crate::error::{QuarryError, Result};
use crate::find_options::{apply_skip_limit, apply_sort, Projection, SortSpec};
use crate::query::Filter;
use crate::value::{Map, Value};
use crate::value_utils::set_path;
use crate::log_debug;

pub use expression::Expression;

/// Documents produced by a pipeline plus the number dropped by expression errors
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateOutput {
    pub documents: Vec<Value>,
    pub skipped: u64,
}

/// Aggregation pipeline
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

/// Pipeline stage
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Filter),
    /// `$addFields` / `$set`
    Compute(ComputeStage),
    Group(GroupStage),
    Sort(SortSpec),
    Skip(usize),
    Limit(usize),
    Project(Projection),
}

/// Computed fields, evaluated against the incoming document
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeStage {
    fields: Vec<(String, Expression)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupStage {
    key: Expression,
    accumulators: Vec<(String, Accumulator)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    Sum(Expression),
    Avg(Expression),
    Count,
    Push(Expression),
    Min(Expression),
    Max(Expression),
    First(Expression),
    Last(Expression),
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Create pipeline from a JSON array of single-key stage documents
    ///
    /// # Examples
    ///
    /// ```
    /// use quarry_core::Pipeline;
    /// use serde_json::json;
    ///
    /// let pipeline = Pipeline::from_json(&json!([
    ///     {"$group": {"_id": "$genre", "avg_price": {"$avg": "$price"}, "count": {"$sum": 1}}},
    ///     {"$sort": {"avg_price": -1}}
    /// ])).unwrap();
    /// assert_eq!(pipeline.stages().len(), 2);
    /// ```
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        Pipeline::parse(&Value::from(json))
    }

    pub fn parse(value: &Value) -> Result<Self> {
        let items = value.as_array().ok_or_else(|| {
            QuarryError::AggregationError("pipeline must be an array".to_string())
        })?;
        let stages = items.iter().map(Stage::parse).collect::<Result<Vec<_>>>()?;
        Ok(Pipeline { stages })
    }

    /// Execute pipeline on documents
    pub fn execute(&self, docs: Vec<Value>) -> Result<AggregateOutput> {
        self.execute_with_cancel(docs, &CancellationToken::new())
    }

    pub fn execute_with_cancel(
        &self,
        docs: Vec<Value>,
        cancel: &CancellationToken,
    ) -> Result<AggregateOutput> {
        run_stages(&self.stages, docs, cancel)
    }

    /// Leading `$match`, which a collection can serve through its indexes
    pub(crate) fn split_leading_match(&self) -> (Option<&Filter>, &[Stage]) {
        match self.stages.split_first() {
            Some((Stage::Match(filter), rest)) => (Some(filter), rest),
            _ => (None, &self.stages),
        }
    }
}

pub(crate) fn run_stages(
    stages: &[Stage],
    mut docs: Vec<Value>,
    cancel: &CancellationToken,
) -> Result<AggregateOutput> {
    let mut skipped = 0;
    for stage in stages {
        cancel.check()?;
        let (next, dropped) = stage.execute(docs)?;
        docs = next;
        skipped += dropped;
    }
    Ok(AggregateOutput {
        documents: docs,
        skipped,
    })
}

impl Stage {
    fn parse(value: &Value) -> Result<Self> {
        let map = value.as_document().ok_or_else(|| {
            QuarryError::AggregationError("stage must be a document".to_string())
        })?;
        if map.len() != 1 {
            return Err(QuarryError::AggregationError(
                "each stage must have exactly one operator".to_string(),
            ));
        }
        let (name, spec) = match map.iter().next() {
            Some(entry) => entry,
            None => {
                return Err(QuarryError::AggregationError(
                    "empty stage document".to_string(),
                ))
            }
        };

        match name.as_str() {
            "$match" => Ok(Stage::Match(Filter::parse(spec)?)),
            "$addFields" | "$set" => Ok(Stage::Compute(ComputeStage::parse(name, spec)?)),
            "$group" => Ok(Stage::Group(GroupStage::parse(spec)?)),
            "$sort" => {
                let sort = SortSpec::parse(spec)?;
                if sort.is_empty() {
                    return Err(QuarryError::AggregationError(
                        "$sort needs at least one key".to_string(),
                    ));
                }
                Ok(Stage::Sort(sort))
            }
            "$skip" => Ok(Stage::Skip(parse_count(name, spec)?)),
            "$limit" => Ok(Stage::Limit(parse_count(name, spec)?)),
            "$project" => Ok(Stage::Project(Projection::parse(spec)?)),
            other => Err(QuarryError::AggregationError(format!(
                "unknown pipeline stage: {}",
                other
            ))),
        }
    }

    /// Output documents and the number of documents dropped
    fn execute(&self, docs: Vec<Value>) -> Result<(Vec<Value>, u64)> {
        match self {
            Stage::Match(filter) => Ok((
                docs.into_iter().filter(|d| filter.matches_value(d)).collect(),
                0,
            )),
            Stage::Compute(stage) => Ok(stage.execute(docs)),
            Stage::Group(stage) => Ok(stage.execute(docs)),
            Stage::Sort(sort) => {
                let mut docs = docs;
                apply_sort(&mut docs, sort);
                Ok((docs, 0))
            }
            Stage::Skip(n) => Ok((apply_skip_limit(docs, Some(*n), None), 0)),
            Stage::Limit(n) => Ok((apply_skip_limit(docs, None, Some(*n)), 0)),
            Stage::Project(projection) => {
                Ok((docs.iter().map(|d| projection.apply(d)).collect(), 0))
            }
        }
    }
}

fn parse_count(stage: &str, spec: &Value) -> Result<usize> {
    match spec.as_i64() {
        Some(n) if n >= 0 => Ok(n as usize),
        _ => Err(QuarryError::AggregationError(format!(
            "{} expects a non-negative integer, got {}",
            stage, spec
        ))),
    }
}

impl ComputeStage {
    pub fn new(fields: Vec<(String, Expression)>) -> Self {
        ComputeStage { fields }
    }

    fn parse(stage: &str, spec: &Value) -> Result<Self> {
        let map = spec.as_document().ok_or_else(|| {
            QuarryError::AggregationError(format!("{} must be a document", stage))
        })?;
        if map.is_empty() {
            return Err(QuarryError::AggregationError(format!(
                "{} needs at least one field",
                stage
            )));
        }
        let mut fields = Vec::with_capacity(map.len());
        for (path, expr) in map {
            if path.is_empty() || path.starts_with('$') {
                return Err(QuarryError::AggregationError(format!(
                    "invalid field name '{}' in {}",
                    path, stage
                )));
            }
            fields.push((path.clone(), Expression::parse(expr)?));
        }
        Ok(ComputeStage { fields })
    }

    fn execute(&self, docs: Vec<Value>) -> (Vec<Value>, u64) {
        let mut out = Vec::with_capacity(docs.len());
        let mut skipped = 0;
        for doc in docs {
            match self.compute(&doc) {
                Ok(computed) => out.push(computed),
                Err(e) => {
                    log_debug!("Dropping document from $addFields: {}", e);
                    skipped += 1;
                }
            }
        }
        (out, skipped)
    }

    fn compute(&self, doc: &Value) -> Result<Value> {
        let mut fields = doc.as_document().cloned().ok_or_else(|| {
            QuarryError::InvalidExpression(format!("cannot add fields to {}", doc.kind_name()))
        })?;
        let mut values = Vec::with_capacity(self.fields.len());
        for (path, expr) in &self.fields {
            values.push((path, expr.evaluate(doc)?));
        }
        for (path, value) in values {
            if !set_path(&mut fields, path, value) {
                return Err(QuarryError::InvalidExpression(format!(
                    "cannot set '{}': array index out of bounds",
                    path
                )));
            }
        }
        Ok(Value::Document(fields))
    }
}

impl GroupStage {
    pub fn new(key: Expression, accumulators: Vec<(String, Accumulator)>) -> Self {
        GroupStage { key, accumulators }
    }

    fn parse(spec: &Value) -> Result<Self> {
        let map = spec.as_document().ok_or_else(|| {
            QuarryError::AggregationError("$group must be a document".to_string())
        })?;
        let key = map
            .get("_id")
            .ok_or_else(|| QuarryError::AggregationError("$group must have an _id".to_string()))
            .and_then(Expression::parse)?;

        let mut accumulators = Vec::with_capacity(map.len().saturating_sub(1));
        for (field, value) in map {
            if field == "_id" {
                continue;
            }
            if field.contains('.') || field.starts_with('$') {
                return Err(QuarryError::AggregationError(format!(
                    "invalid $group output field '{}'",
                    field
                )));
            }
            accumulators.push((field.clone(), Accumulator::parse(value)?));
        }
        Ok(GroupStage { key, accumulators })
    }

    fn execute(&self, docs: Vec<Value>) -> (Vec<Value>, u64) {
        let mut groups: IndexMap<Value, Vec<AccumulatorState>, RandomState> =
            IndexMap::with_hasher(RandomState::new());
        let mut skipped = 0;

        for doc in docs {
            let (key, inputs) = match self.evaluate(&doc) {
                Ok(evaluated) => evaluated,
                Err(e) => {
                    log_debug!("Dropping document from $group: {}", e);
                    skipped += 1;
                    continue;
                }
            };
            let states = groups.entry(key).or_insert_with(|| {
                self.accumulators
                    .iter()
                    .map(|(_, acc)| AccumulatorState::new(acc))
                    .collect()
            });
            for (state, input) in states.iter_mut().zip(inputs) {
                state.add(input);
            }
        }

        let results = groups
            .into_iter()
            .map(|(key, states)| {
                let mut out = Map::with_capacity(self.accumulators.len() + 1);
                out.insert("_id".to_string(), key);
                for ((field, _), state) in self.accumulators.iter().zip(states) {
                    out.insert(field.clone(), state.finish());
                }
                Value::Document(out)
            })
            .collect();
        (results, skipped)
    }

    /// Group key plus one input per accumulator; fails as a whole so a
    /// document is either fully counted or skipped
    fn evaluate(&self, doc: &Value) -> Result<(Value, Vec<Option<Value>>)> {
        let key = self.key.evaluate_optional(doc)?.unwrap_or(Value::Null);
        let mut inputs = Vec::with_capacity(self.accumulators.len());
        for (_, acc) in &self.accumulators {
            inputs.push(acc.input(doc)?);
        }
        Ok((key, inputs))
    }
}

impl Accumulator {
    fn parse(spec: &Value) -> Result<Self> {
        let map = spec.as_document().ok_or_else(|| {
            QuarryError::AggregationError("accumulator must be a document".to_string())
        })?;
        if map.len() != 1 {
            return Err(QuarryError::AggregationError(
                "accumulator must have exactly one operator".to_string(),
            ));
        }
        let (op, arg) = match map.iter().next() {
            Some(entry) => entry,
            None => {
                return Err(QuarryError::AggregationError(
                    "empty accumulator".to_string(),
                ))
            }
        };
        match op.as_str() {
            "$sum" => Ok(Accumulator::Sum(Expression::parse(arg)?)),
            "$avg" => Ok(Accumulator::Avg(Expression::parse(arg)?)),
            "$count" => Ok(Accumulator::Count),
            "$push" => Ok(Accumulator::Push(Expression::parse(arg)?)),
            "$min" => Ok(Accumulator::Min(Expression::parse(arg)?)),
            "$max" => Ok(Accumulator::Max(Expression::parse(arg)?)),
            "$first" => Ok(Accumulator::First(Expression::parse(arg)?)),
            "$last" => Ok(Accumulator::Last(Expression::parse(arg)?)),
            other => Err(QuarryError::AggregationError(format!(
                "unknown accumulator: {}",
                other
            ))),
        }
    }

    /// Value fed to the accumulator; `None` when the referenced field is absent
    fn input(&self, doc: &Value) -> Result<Option<Value>> {
        match self {
            Accumulator::Count => Ok(None),
            Accumulator::Sum(e)
            | Accumulator::Avg(e)
            | Accumulator::Push(e)
            | Accumulator::Min(e)
            | Accumulator::Max(e)
            | Accumulator::First(e)
            | Accumulator::Last(e) => e.evaluate_optional(doc),
        }
    }
}

/// Running state of one accumulator within one group
#[derive(Debug)]
enum AccumulatorState {
    Sum(f64),
    Avg { sum: f64, count: u64 },
    Count(u64),
    Push(Vec<Value>),
    Min(Option<Value>),
    Max(Option<Value>),
    First(Option<Value>),
    Last(Value),
}

impl AccumulatorState {
    fn new(acc: &Accumulator) -> Self {
        match acc {
            Accumulator::Sum(_) => AccumulatorState::Sum(0.0),
            Accumulator::Avg(_) => AccumulatorState::Avg { sum: 0.0, count: 0 },
            Accumulator::Count => AccumulatorState::Count(0),
            Accumulator::Push(_) => AccumulatorState::Push(Vec::new()),
            Accumulator::Min(_) => AccumulatorState::Min(None),
            Accumulator::Max(_) => AccumulatorState::Max(None),
            Accumulator::First(_) => AccumulatorState::First(None),
            Accumulator::Last(_) => AccumulatorState::Last(Value::Null),
        }
    }

    fn add(&mut self, input: Option<Value>) {
        match self {
            AccumulatorState::Sum(total) => {
                if let Some(Value::Number(n)) = input {
                    *total += n;
                }
            }
            AccumulatorState::Avg { sum, count } => {
                if let Some(Value::Number(n)) = input {
                    *sum += n;
                    *count += 1;
                }
            }
            AccumulatorState::Count(n) => *n += 1,
            AccumulatorState::Push(items) => {
                if let Some(v) = input {
                    items.push(v);
                }
            }
            // null and missing are ignored by $min/$max
            AccumulatorState::Min(current) => {
                if let Some(v) = input.filter(|v| !v.is_null()) {
                    if current.as_ref().map_or(true, |c| v < *c) {
                        *current = Some(v);
                    }
                }
            }
            AccumulatorState::Max(current) => {
                if let Some(v) = input.filter(|v| !v.is_null()) {
                    if current.as_ref().map_or(true, |c| v > *c) {
                        *current = Some(v);
                    }
                }
            }
            AccumulatorState::First(first) => {
                if first.is_none() {
                    *first = Some(input.unwrap_or(Value::Null));
                }
            }
            AccumulatorState::Last(last) => *last = input.unwrap_or(Value::Null),
        }
    }

    fn finish(self) -> Value {
        match self {
            AccumulatorState::Sum(total) => Value::Number(total),
            AccumulatorState::Avg { sum, count } => {
                if count == 0 {
                    Value::Null
                } else {
                    Value::Number(sum / count as f64)
                }
            }
            AccumulatorState::Count(n) => Value::from(n),
            AccumulatorState::Push(items) => Value::Array(items),
            AccumulatorState::Min(v) | AccumulatorState::Max(v) | AccumulatorState::First(v) => {
                v.unwrap_or(Value::Null)
            }
            AccumulatorState::Last(v) => v,
        }
    }
}
