// quarry-core/src/index.rs
// Ordered secondary indexes over document field tuples

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use crate::document::{Document, DocumentId, ID_FIELD};
use crate::error::{QuarryError, Result};
use crate::find_options::SortOrder;
use crate::query::{CompareOp, Condition, Filter};
use crate::value::Value;
use crate::{log_debug, log_info};

/// Name of the implicit identity access path
pub const ID_INDEX_NAME: &str = "_id_";

/// One key component per indexed field, in declared order.
///
/// `None` marks a missing field and sorts before every value (including null).
pub type IndexKey = Vec<Option<Value>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexField {
    pub path: String,
    pub order: SortOrder,
}

/// Index definition: ordered (path, direction) pairs plus a name
///
/// # Examples
///
/// ```
/// use quarry_core::IndexSpec;
/// use serde_json::json;
///
/// let spec = IndexSpec::from_json(&json!({"author": 1, "published_year": -1})).unwrap();
/// assert_eq!(spec.name(), "author_1_published_year_-1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "IndexSpecRepr", try_from = "IndexSpecRepr")]
pub struct IndexSpec {
    name: String,
    fields: Vec<IndexField>,
}

impl IndexSpec {
    pub fn new<I, S>(fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, SortOrder)>,
        S: Into<String>,
    {
        let fields: Vec<IndexField> = fields
            .into_iter()
            .map(|(path, order)| IndexField {
                path: path.into(),
                order,
            })
            .collect();
        if fields.is_empty() {
            return Err(QuarryError::InvalidQuery(
                "index needs at least one field".to_string(),
            ));
        }
        if let Some(f) = fields.iter().find(|f| f.path.is_empty()) {
            return Err(QuarryError::InvalidQuery(format!(
                "invalid index field path '{}'",
                f.path
            )));
        }
        for (i, f) in fields.iter().enumerate() {
            if fields[..i].iter().any(|g| g.path == f.path) {
                return Err(QuarryError::InvalidQuery(format!(
                    "field '{}' appears twice in the index key",
                    f.path
                )));
            }
        }
        let name = default_name(&fields);
        Ok(IndexSpec { name, fields })
    }

    /// Single ascending field
    pub fn ascending(path: impl Into<String>) -> Self {
        let path = path.into();
        let fields = vec![IndexField {
            path,
            order: SortOrder::Ascending,
        }];
        IndexSpec {
            name: default_name(&fields),
            fields,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Key document such as `{"author": 1, "published_year": -1}`
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        let key = json.as_object().ok_or_else(|| {
            QuarryError::InvalidQuery(format!("index key must be an object, got {}", json))
        })?;
        let mut fields = Vec::with_capacity(key.len());
        for (path, direction) in key {
            let order = SortOrder::from_value(&Value::from(direction)).ok_or_else(|| {
                QuarryError::InvalidQuery(format!(
                    "index direction for '{}' must be 1 or -1, got {}",
                    path, direction
                ))
            })?;
            fields.push((path.clone(), order));
        }
        IndexSpec::new(fields)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[IndexField] {
        &self.fields
    }

    /// Key document in JSON form
    pub fn key_json(&self) -> serde_json::Value {
        let mut key = serde_json::Map::new();
        for f in &self.fields {
            key.insert(f.path.clone(), serde_json::Value::from(f.order.as_i32()));
        }
        serde_json::Value::Object(key)
    }

    /// `{"name": ..., "key": {...}}`, the shape listed by `list_indexes`
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({"name": self.name, "key": self.key_json()})
    }

    fn same_key(&self, other: &IndexSpec) -> bool {
        self.fields == other.fields
    }

    /// The implicit identity access path
    pub fn identity() -> Self {
        IndexSpec {
            name: ID_INDEX_NAME.to_string(),
            fields: vec![IndexField {
                path: ID_FIELD.to_string(),
                order: SortOrder::Ascending,
            }],
        }
    }
}

fn default_name(fields: &[IndexField]) -> String {
    fields
        .iter()
        .map(|f| format!("{}_{}", f.path, f.order.as_i32()))
        .collect::<Vec<_>>()
        .join("_")
}

#[derive(Serialize, Deserialize)]
struct IndexSpecRepr {
    name: String,
    key: serde_json::Value,
}

impl From<IndexSpec> for IndexSpecRepr {
    fn from(spec: IndexSpec) -> Self {
        IndexSpecRepr {
            key: spec.key_json(),
            name: spec.name,
        }
    }
}

impl TryFrom<IndexSpecRepr> for IndexSpec {
    type Error = QuarryError;

    fn try_from(repr: IndexSpecRepr) -> Result<Self> {
        Ok(IndexSpec::from_json(&repr.key)?.with_name(repr.name))
    }
}

/// Bound on the first non-equality index field
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRange {
    /// (value, inclusive)
    pub lower: Option<(Value, bool)>,
    pub upper: Option<(Value, bool)>,
}

impl KeyRange {
    /// Tightest range of the given conditions whose operands share a kind.
    /// Conditions of another kind stay residual.
    fn from_conditions(conditions: &[&Condition]) -> Option<KeyRange> {
        let kind = conditions.first()?.value.type_rank();
        let mut range = KeyRange {
            lower: None,
            upper: None,
        };
        for c in conditions.iter().filter(|c| c.value.type_rank() == kind) {
            let bound = (c.value.clone(), c.op.is_inclusive());
            if c.op.is_lower_bound() {
                range.lower = Some(match range.lower.take() {
                    None => bound,
                    Some(current) => tighter(current, bound, Ordering::Greater),
                });
            } else if c.op.is_upper_bound() {
                range.upper = Some(match range.upper.take() {
                    None => bound,
                    Some(current) => tighter(current, bound, Ordering::Less),
                });
            }
        }
        Some(range)
    }

    fn kind_anchor(&self) -> Option<&Value> {
        self.lower
            .as_ref()
            .or(self.upper.as_ref())
            .map(|(value, _)| value)
    }

    /// Whether `value` sits past the upper bound (scan can stop)
    fn beyond_upper(&self, value: &Value) -> bool {
        match &self.upper {
            None => false,
            Some((bound, inclusive)) => match value.compare(bound) {
                Some(Ordering::Greater) => true,
                Some(Ordering::Equal) => !inclusive,
                _ => false,
            },
        }
    }

    fn satisfies_lower(&self, value: &Value) -> bool {
        match &self.lower {
            None => value.compare(value).is_some(),
            Some((bound, inclusive)) => match value.compare(bound) {
                Some(Ordering::Greater) => true,
                Some(Ordering::Equal) => *inclusive,
                _ => false,
            },
        }
    }
}

/// Keep whichever bound is further in `direction`; exclusive wins on ties
fn tighter(a: (Value, bool), b: (Value, bool), direction: Ordering) -> (Value, bool) {
    match b.0.compare(&a.0) {
        Some(ord) if ord == direction => b,
        Some(Ordering::Equal) if !b.1 => b,
        _ => a,
    }
}

/// Equality prefix plus optional range on the following field
#[derive(Debug, Clone, PartialEq)]
pub struct IndexBounds {
    pub equals: Vec<Value>,
    pub range: Option<KeyRange>,
}

impl IndexBounds {
    /// Number of leading index fields the bounds constrain
    pub fn covered_fields(&self) -> usize {
        self.equals.len() + usize::from(self.range.is_some())
    }
}

/// Ids produced by an index scan, in index order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexScan {
    pub ids: Vec<DocumentId>,
    /// Index entries visited, including ones passed over by an exclusive
    /// bound and the entry that ended the scan
    pub keys_examined: u64,
}

/// A single secondary index
#[derive(Debug, Clone)]
pub struct OrderedIndex {
    spec: IndexSpec,
    entries: BTreeMap<IndexKey, BTreeSet<DocumentId>>,
}

impl OrderedIndex {
    pub fn new(spec: IndexSpec) -> Self {
        OrderedIndex {
            spec,
            entries: BTreeMap::new(),
        }
    }

    pub fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    pub fn key_for(&self, doc: &Document) -> IndexKey {
        self.spec
            .fields
            .iter()
            .map(|f| doc.get(&f.path).cloned())
            .collect()
    }

    pub fn insert(&mut self, doc: &Document) {
        let key = self.key_for(doc);
        self.entries.entry(key).or_default().insert(doc.id().clone());
    }

    pub fn remove(&mut self, doc: &Document) {
        let key = self.key_for(doc);
        if let Some(ids) = self.entries.get_mut(&key) {
            ids.remove(doc.id());
            if ids.is_empty() {
                self.entries.remove(&key);
            }
        }
    }

    /// Total (key, id) entries
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &IndexKey, id: &DocumentId) -> bool {
        self.entries.get(key).is_some_and(|ids| ids.contains(id))
    }

    /// Bounds this index can serve for the given conjunction, if any.
    ///
    /// Leading-prefix rule: equality on fields 0..k, then an optional
    /// range on field k. An index on (A, B) never serves B alone.
    pub fn bounds_for(&self, conditions: &[&Condition]) -> Option<IndexBounds> {
        let mut equals = Vec::new();
        let mut range = None;
        for field in &self.spec.fields {
            let on_field: Vec<&Condition> = conditions
                .iter()
                .copied()
                .filter(|c| c.path == field.path)
                .collect();
            if let Some(eq) = on_field.iter().find(|c| c.op == CompareOp::Eq) {
                equals.push(eq.value.clone());
                continue;
            }
            let ranges: Vec<&Condition> =
                on_field.into_iter().filter(|c| c.op.is_range()).collect();
            range = KeyRange::from_conditions(&ranges);
            break;
        }
        let bounds = IndexBounds { equals, range };
        if bounds.covered_fields() == 0 {
            None
        } else {
            Some(bounds)
        }
    }

    /// Scan the entries inside `bounds`, returning ids in index order
    pub fn scan(&self, bounds: &IndexBounds) -> IndexScan {
        let prefix: IndexKey = bounds.equals.iter().cloned().map(Some).collect();
        let depth = prefix.len();
        let mut start = prefix.clone();
        if let Some(anchor) = bounds.range.as_ref().and_then(KeyRange::kind_anchor) {
            let low = bounds
                .range
                .as_ref()
                .and_then(|r| r.lower.as_ref())
                .map(|(v, _)| v.clone())
                .unwrap_or_else(|| anchor.kind_min());
            start.push(Some(low));
        }

        // One per (key, id) entry read, plus the entry that ends the scan
        let mut keys_examined = 0u64;
        let mut matched: Vec<(&IndexKey, &BTreeSet<DocumentId>)> = Vec::new();
        for (key, ids) in self.entries.range((Bound::Included(start), Bound::Unbounded)) {
            if key[..depth] != prefix[..] {
                keys_examined += 1;
                break;
            }
            if let Some(range) = &bounds.range {
                let anchor_rank = range.kind_anchor().map(Value::type_rank);
                let component = match &key[depth] {
                    Some(v) if Some(v.type_rank()) == anchor_rank => v,
                    _ => {
                        keys_examined += 1;
                        break;
                    }
                };
                if range.beyond_upper(component) {
                    keys_examined += 1;
                    break;
                }
                keys_examined += ids.len() as u64;
                if !range.satisfies_lower(component) {
                    continue;
                }
            } else {
                keys_examined += ids.len() as u64;
            }
            matched.push((key, ids));
        }

        if self.spec.fields.iter().any(|f| f.order == SortOrder::Descending) {
            matched.sort_by(|a, b| self.compare_keys(a.0, b.0));
        }

        let ids: Vec<DocumentId> = matched
            .into_iter()
            .flat_map(|(_, ids)| ids.iter().cloned())
            .collect();
        IndexScan { ids, keys_examined }
    }

    /// Key order with the declared directions applied
    fn compare_keys(&self, a: &IndexKey, b: &IndexKey) -> Ordering {
        for (i, field) in self.spec.fields.iter().enumerate() {
            let ord = field.order.apply(a[i].cmp(&b[i]));
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

/// All secondary indexes of a collection, in creation order
#[derive(Debug, Clone, Default)]
pub struct IndexManager {
    indexes: IndexMap<String, OrderedIndex>,
    /// Bumped on every create/drop; plan cache entries carry it
    version: u64,
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    /// Reject a spec that clashes with an existing index
    pub fn check_new(&self, spec: &IndexSpec) -> Result<()> {
        if spec.name() == ID_INDEX_NAME || self.indexes.contains_key(spec.name()) {
            return Err(QuarryError::IndexExists(spec.name().to_string()));
        }
        if let Some(existing) = self.indexes.values().find(|i| i.spec.same_key(spec)) {
            return Err(QuarryError::IndexExists(existing.spec.name().to_string()));
        }
        Ok(())
    }

    /// Build an index synchronously over `docs`
    pub fn create<'a, I>(&mut self, spec: IndexSpec, docs: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a Document>,
    {
        self.check_new(&spec)?;
        let mut index = OrderedIndex::new(spec);
        for doc in docs {
            index.insert(doc);
        }
        log_info!(
            "Created index '{}' with {} entries",
            index.spec.name(),
            index.len()
        );
        self.indexes.insert(index.spec.name().to_string(), index);
        self.version += 1;
        Ok(())
    }

    pub fn check_drop(&self, name: &str) -> Result<()> {
        if name == ID_INDEX_NAME {
            return Err(QuarryError::InvalidQuery(
                "the _id_ index cannot be dropped".to_string(),
            ));
        }
        if !self.indexes.contains_key(name) {
            return Err(QuarryError::NotFound(format!("index '{}'", name)));
        }
        Ok(())
    }

    pub fn drop(&mut self, name: &str) -> Result<IndexSpec> {
        self.check_drop(name)?;
        let index = self
            .indexes
            .shift_remove(name)
            .ok_or_else(|| QuarryError::NotFound(format!("index '{}'", name)))?;
        self.version += 1;
        log_info!("Dropped index '{}'", name);
        Ok(index.spec)
    }

    pub fn get(&self, name: &str) -> Option<&OrderedIndex> {
        self.indexes.get(name)
    }

    /// Indexes in creation order
    pub fn iter(&self) -> impl Iterator<Item = &OrderedIndex> {
        self.indexes.values()
    }

    pub fn specs(&self) -> Vec<IndexSpec> {
        self.indexes.values().map(|i| i.spec.clone()).collect()
    }

    pub fn on_insert(&mut self, doc: &Document) {
        for index in self.indexes.values_mut() {
            index.insert(doc);
        }
    }

    pub fn on_remove(&mut self, doc: &Document) {
        for index in self.indexes.values_mut() {
            index.remove(doc);
        }
    }

    pub fn on_update(&mut self, old: &Document, new: &Document) {
        for index in self.indexes.values_mut() {
            let old_key = index.key_for(old);
            let new_key = index.key_for(new);
            if old_key != new_key {
                index.remove(old);
                index.insert(new);
            }
        }
    }

    /// Ids matching `filter` through index `name`, in index order.
    ///
    /// `NoIndexCoverage` when the filter does not constrain a leading
    /// prefix of the index (or contains `$or`).
    pub fn lookup(&self, name: &str, filter: &Filter) -> Result<IndexScan> {
        let index = self
            .indexes
            .get(name)
            .ok_or_else(|| QuarryError::NotFound(format!("index '{}'", name)))?;
        let conditions = filter.conjunction().ok_or(QuarryError::NoIndexCoverage)?;
        let bounds = index
            .bounds_for(&conditions)
            .ok_or(QuarryError::NoIndexCoverage)?;
        let scan = index.scan(&bounds);
        log_debug!(
            "Index '{}' scan: {} keys examined",
            name,
            scan.keys_examined
        );
        Ok(scan)
    }
}
