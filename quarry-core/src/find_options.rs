// quarry-core/src/find_options.rs
// Find query options: projection, sort, limit, skip

use std::cmp::Ordering;

use crate::document::{Document, ID_FIELD};
use crate::error::{QuarryError, Result};
use crate::value::{Map, Value};
use crate::value_utils::{get_path, get_value_path, remove_path, set_path};

/// Sort / index key direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl SortOrder {
    /// `1` or `-1`
    pub fn from_value(value: &Value) -> Option<SortOrder> {
        match value.as_i64() {
            Some(1) => Some(SortOrder::Ascending),
            Some(-1) => Some(SortOrder::Descending),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            SortOrder::Ascending => 1,
            SortOrder::Descending => -1,
        }
    }

    pub fn apply(&self, ordering: Ordering) -> Ordering {
        match self {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        }
    }
}

/// Anything whose fields can be read by dotted path
pub trait FieldSource {
    fn field(&self, path: &str) -> Option<&Value>;
}

impl FieldSource for Document {
    fn field(&self, path: &str) -> Option<&Value> {
        self.get(path)
    }
}

impl FieldSource for Map {
    fn field(&self, path: &str) -> Option<&Value> {
        get_path(self, path)
    }
}

impl FieldSource for Value {
    fn field(&self, path: &str) -> Option<&Value> {
        get_value_path(self, path)
    }
}

impl<T: FieldSource + ?Sized> FieldSource for &T {
    fn field(&self, path: &str) -> Option<&Value> {
        (**self).field(path)
    }
}

/// Ordered sort keys: `[("price", Descending), ("title", Ascending)]`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SortSpec {
    keys: Vec<(String, SortOrder)>,
}

impl SortSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn asc(path: impl Into<String>) -> Self {
        SortSpec::new().then(path, SortOrder::Ascending)
    }

    pub fn desc(path: impl Into<String>) -> Self {
        SortSpec::new().then(path, SortOrder::Descending)
    }

    /// Append a tie-breaking key
    pub fn then(mut self, path: impl Into<String>, order: SortOrder) -> Self {
        self.keys.push((path.into(), order));
        self
    }

    pub fn keys(&self) -> &[(String, SortOrder)] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// `{"price": -1, "title": 1}`; key order is significant
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        SortSpec::parse(&Value::from(json))
    }

    pub fn parse(value: &Value) -> Result<Self> {
        let map = value.as_document().ok_or_else(|| {
            QuarryError::InvalidQuery(format!("sort must be a document, got {}", value.kind_name()))
        })?;
        let mut spec = SortSpec::new();
        for (path, direction) in map {
            let order = SortOrder::from_value(direction).ok_or_else(|| {
                QuarryError::InvalidQuery(format!(
                    "sort direction for '{}' must be 1 or -1, got {}",
                    path, direction
                ))
            })?;
            spec.keys.push((path.clone(), order));
        }
        Ok(spec)
    }

    /// Compare two documents; a missing field sorts before null
    pub fn compare<A: FieldSource, B: FieldSource>(&self, a: &A, b: &B) -> Ordering {
        for (path, order) in &self.keys {
            let cmp = a.field(path).cmp(&b.field(path));
            if cmp != Ordering::Equal {
                return order.apply(cmp);
            }
        }
        Ordering::Equal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionMode {
    Include,
    Exclude,
}

/// Field projection
///
/// Include mode keeps only the named paths (and `_id` unless `_id: 0`);
/// exclude mode drops the named paths. The two cannot be mixed except for
/// `_id`, which may be set either way in both modes. The mode comes from
/// the non-`_id` entries; `{"_id": 1}` alone keeps only `_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    mode: ProjectionMode,
    paths: Vec<String>,
    include_id: bool,
}

impl Projection {
    pub fn include<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Projection {
            mode: ProjectionMode::Include,
            paths: paths.into_iter().map(Into::into).collect(),
            include_id: true,
        }
    }

    pub fn exclude<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Projection {
            mode: ProjectionMode::Exclude,
            paths: paths.into_iter().map(Into::into).collect(),
            include_id: true,
        }
    }

    /// Drop `_id` from the output
    pub fn without_id(mut self) -> Self {
        self.include_id = false;
        self
    }

    pub fn mode(&self) -> ProjectionMode {
        self.mode
    }

    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        Projection::parse(&Value::from(json))
    }

    /// `{"title": 1, "author": 1, "_id": 0}` or `{"reviews": 0}`
    pub fn parse(value: &Value) -> Result<Self> {
        let map = value.as_document().ok_or_else(|| {
            QuarryError::InvalidProjection(format!(
                "projection must be a document, got {}",
                value.kind_name()
            ))
        })?;

        let mut includes = Vec::new();
        let mut excludes = Vec::new();
        let mut include_id = true;
        let mut id_included = false;

        for (path, flag) in map {
            let keep = match flag {
                Value::Bool(b) => *b,
                Value::Number(n) if *n == 1.0 => true,
                Value::Number(n) if *n == 0.0 => false,
                other => {
                    return Err(QuarryError::InvalidProjection(format!(
                        "value for '{}' must be 0, 1, true or false, got {}",
                        path, other
                    )))
                }
            };
            if path.is_empty() {
                return Err(QuarryError::InvalidProjection("empty field path".to_string()));
            }
            if path == ID_FIELD {
                include_id = keep;
                id_included = keep;
            } else if keep {
                includes.push(path.clone());
            } else {
                excludes.push(path.clone());
            }
        }

        if !includes.is_empty() && !excludes.is_empty() {
            return Err(QuarryError::InvalidProjection(
                "cannot mix inclusion and exclusion".to_string(),
            ));
        }

        let include_mode = !includes.is_empty() || (excludes.is_empty() && id_included);
        if include_mode {
            Ok(Projection {
                mode: ProjectionMode::Include,
                paths: includes,
                include_id,
            })
        } else {
            Ok(Projection {
                mode: ProjectionMode::Exclude,
                paths: excludes,
                include_id,
            })
        }
    }

    /// Project a document value; non-documents pass through
    pub fn apply(&self, doc: &Value) -> Value {
        let fields = match doc.as_document() {
            Some(fields) => fields,
            None => return doc.clone(),
        };

        match self.mode {
            ProjectionMode::Include => {
                let mut result = Map::new();
                if self.include_id {
                    if let Some(id) = fields.get(ID_FIELD) {
                        result.insert(ID_FIELD.to_string(), id.clone());
                    }
                }
                for path in &self.paths {
                    if let Some(value) = get_path(fields, path) {
                        // Paths through arrays cannot be rebuilt as nested documents
                        if !set_path(&mut result, path, value.clone()) {
                            result.insert(path.clone(), value.clone());
                        }
                    }
                }
                Value::Document(result)
            }
            ProjectionMode::Exclude => {
                let mut result = fields.clone();
                for path in &self.paths {
                    remove_path(&mut result, path);
                }
                if !self.include_id {
                    result.shift_remove(ID_FIELD);
                }
                Value::Document(result)
            }
        }
    }
}

/// Options for find queries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub projection: Option<Projection>,
    pub sort: Option<SortSpec>,
    /// Maximum number of documents to return
    pub limit: Option<usize>,
    /// Documents to skip before the limit applies (pagination)
    pub skip: Option<usize>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn with_sort(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }
}

/// Stable multi-key sort
pub fn apply_sort<T: FieldSource>(docs: &mut [T], sort: &SortSpec) {
    if sort.is_empty() {
        return;
    }
    docs.sort_by(|a, b| sort.compare(a, b));
}

/// Skip first, then limit
pub fn apply_skip_limit<T>(docs: Vec<T>, skip: Option<usize>, limit: Option<usize>) -> Vec<T> {
    let skip = skip.unwrap_or(0);
    if skip >= docs.len() || limit == Some(0) {
        return Vec::new();
    }
    docs.into_iter()
        .skip(skip)
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}
