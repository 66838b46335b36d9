// quarry-core/src/collection.rs
//! Collection store
//!
//! A `Collection` is a cheap, cloneable handle. All clones share one
//! `RwLock`-protected state: mutations take the write lock, reads take the
//! read lock and see a consistent snapshot for their whole duration.
//! Index maintenance and journaling happen inside the same write critical
//! section as the document change.

use indexmap::IndexMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::aggregation::{run_stages, AggregateOutput, Pipeline};
use crate::cancel::CancellationToken;
use crate::config::{CollectionConfig, IdStrategy};
use crate::cursor::FindCursor;
use crate::document::{Document, DocumentId, ID_FIELD};
use crate::error::{QuarryError, Result};
use crate::explain::{ExecutionStats, ExplainResult};
use crate::find_options::{apply_skip_limit, apply_sort, FindOptions};
use crate::index::{IndexManager, IndexScan, IndexSpec};
use crate::persistence::{ChangeRecord, PersistenceAdapter};
use crate::query::Filter;
use crate::query_planner::{PlanCache, PlanCacheStats, QueryPlan};
use crate::update::Mutation;
use crate::value::Value;
use crate::{log_debug, log_error, log_info, log_trace};

/// Mutable state behind the collection lock
#[derive(Debug, Default)]
struct CollectionState {
    /// Documents in insertion order
    documents: IndexMap<DocumentId, Document>,
    indexes: IndexManager,
    revision: u64,
    /// Highest integer identity ever assigned or inserted
    last_id: i64,
}

impl CollectionState {
    /// Documents matching `filter` through `plan`, in insertion order
    fn select<'a>(&'a self, filter: &Filter, plan: &QueryPlan) -> (Vec<&'a Document>, ExecutionStats) {
        let mut stats = ExecutionStats::default();
        let matched = match plan {
            QueryPlan::CollectionScan => self.scan_all(filter, &mut stats),
            QueryPlan::IdLookup { id } => match self.documents.get(id) {
                Some(doc) => {
                    stats.keys_examined = 1;
                    stats.docs_examined = 1;
                    if filter.matches(doc) {
                        vec![doc]
                    } else {
                        Vec::new()
                    }
                }
                None => Vec::new(),
            },
            QueryPlan::IndexScan { index_name, bounds } => match self.indexes.get(index_name) {
                Some(index) => {
                    let scan = index.scan(bounds);
                    stats.keys_examined = scan.keys_examined;
                    let mut hits: Vec<(usize, &Document)> = scan
                        .ids
                        .iter()
                        .filter_map(|id| self.documents.get_full(id).map(|(pos, _, doc)| (pos, doc)))
                        .collect();
                    stats.docs_examined = hits.len() as u64;
                    hits.retain(|(_, doc)| filter.matches(doc));
                    hits.sort_unstable_by_key(|(pos, _)| *pos);
                    hits.into_iter().map(|(_, doc)| doc).collect()
                }
                None => {
                    log_error!("Plan references missing index '{}'; scanning", index_name);
                    self.scan_all(filter, &mut stats)
                }
            },
        };
        (matched, stats)
    }

    fn scan_all<'a>(&'a self, filter: &Filter, stats: &mut ExecutionStats) -> Vec<&'a Document> {
        stats.docs_examined = self.documents.len() as u64;
        self.documents
            .values()
            .filter(|doc| filter.matches(doc))
            .collect()
    }
}

/// Output of one query execution
#[derive(Debug)]
pub(crate) struct QueryRun {
    pub documents: Vec<Value>,
    pub plan: QueryPlan,
    pub stats: ExecutionStats,
}

struct CollectionInner {
    name: String,
    config: CollectionConfig,
    state: RwLock<CollectionState>,
    plan_cache: PlanCache,
    persistence: Option<Arc<dyn PersistenceAdapter>>,
}

/// Handle to a document collection
#[derive(Clone)]
pub struct Collection {
    inner: Arc<CollectionInner>,
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.inner.name)
            .field("len", &self.len())
            .field("revision", &self.revision())
            .finish()
    }
}

impl Collection {
    /// Empty in-memory collection with default configuration
    pub fn new(name: impl Into<String>) -> Self {
        Collection::with_config(name, CollectionConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: CollectionConfig) -> Self {
        Collection::build(name.into(), config, CollectionState::default(), None)
    }

    /// Collection backed by a persistence adapter.
    ///
    /// Loads the adapter's documents and index definitions; every later
    /// mutation is appended to the adapter before it is applied.
    pub fn open(
        name: impl Into<String>,
        config: CollectionConfig,
        adapter: Arc<dyn PersistenceAdapter>,
    ) -> Result<Self> {
        let name = name.into();
        let mut state = CollectionState {
            last_id: adapter.last_auto_id()?,
            ..CollectionState::default()
        };

        for doc in adapter.load_all()? {
            if state.documents.contains_key(doc.id()) {
                return Err(QuarryError::DuplicateIdentity(doc.id().clone()));
            }
            if let DocumentId::Int(n) = doc.id() {
                state.last_id = state.last_id.max(*n);
            }
            state.documents.insert(doc.id().clone(), doc);
        }
        for spec in adapter.load_indexes()? {
            state.indexes.create(spec, state.documents.values())?;
        }

        log_info!(
            "Opened collection '{}' with {} document(s) and {} index(es)",
            name,
            state.documents.len(),
            state.indexes.len()
        );
        Ok(Collection::build(name, config, state, Some(adapter)))
    }

    fn build(
        name: String,
        config: CollectionConfig,
        state: CollectionState,
        persistence: Option<Arc<dyn PersistenceAdapter>>,
    ) -> Self {
        Collection {
            inner: Arc::new(CollectionInner {
                plan_cache: PlanCache::new(config.plan_cache_capacity),
                name,
                config,
                state: RwLock::new(state),
                persistence,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.inner.config
    }

    pub fn len(&self) -> usize {
        self.inner.state.read().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bumped by every committed mutation
    pub fn revision(&self) -> u64 {
        self.inner.state.read().revision
    }

    // ========== CRUD OPERATIONS ==========

    /// Insert one document - returns its identity
    ///
    /// # Examples
    ///
    /// ```
    /// use quarry_core::{Collection, DocumentId};
    /// use serde_json::json;
    ///
    /// let books = Collection::new("books");
    /// let id = books.insert(json!({"title": "1984", "price": 10})).unwrap();
    /// assert_eq!(id, DocumentId::Int(1));
    /// ```
    pub fn insert(&self, doc: impl Into<Value>) -> Result<DocumentId> {
        let mut state = self.inner.state.write();
        self.insert_locked(&mut state, doc.into())
    }

    /// Insert in order under one lock; stops at the first failure, keeping
    /// the documents inserted before it
    pub fn insert_many<I, V>(&self, docs: I) -> Result<Vec<DocumentId>>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let mut state = self.inner.state.write();
        docs.into_iter()
            .map(|doc| self.insert_locked(&mut state, doc.into()))
            .collect()
    }

    fn insert_locked(&self, state: &mut CollectionState, value: Value) -> Result<DocumentId> {
        let fields = match value {
            Value::Document(fields) => fields,
            other => {
                return Err(QuarryError::InvalidDocument(format!(
                    "expected a document, got {}",
                    other.kind_name()
                )))
            }
        };

        let id = match fields.get(ID_FIELD) {
            Some(raw) => DocumentId::from_value(raw)?,
            None => match self.inner.config.id_strategy {
                IdStrategy::AutoIncrement => DocumentId::new_auto(state.last_id)?,
                IdStrategy::Uuid => DocumentId::new_uuid(),
            },
        };
        if state.documents.contains_key(&id) {
            return Err(QuarryError::DuplicateIdentity(id));
        }

        let doc = Document::new(id.clone(), fields);
        self.journal(|| ChangeRecord::Insert {
            document: doc.clone(),
        })?;

        if let DocumentId::Int(n) = &id {
            state.last_id = state.last_id.max(*n);
        }
        state.indexes.on_insert(&doc);
        state.documents.insert(id.clone(), doc);
        state.revision += 1;
        log_trace!("Inserted {} into '{}'", id, self.inner.name);
        Ok(id)
    }

    /// Document by identity (a copy; later mutations do not affect it)
    pub fn get(&self, id: &DocumentId) -> Option<Document> {
        self.inner.state.read().documents.get(id).cloned()
    }

    /// All documents in insertion order
    pub fn scan(&self) -> Vec<Document> {
        self.inner.state.read().documents.values().cloned().collect()
    }

    /// Apply a mutation to one document - returns modified count (0 or 1)
    pub fn update(&self, id: &DocumentId, mutation: &Mutation) -> Result<u64> {
        let mut state = self.inner.state.write();
        self.update_locked(&mut state, id, mutation)
    }

    /// Update the first document matching `filter` - returns (matched_count, modified_count)
    pub fn update_one(&self, filter: &Filter, mutation: &Mutation) -> Result<(u64, u64)> {
        let mut state = self.inner.state.write();
        let plan = self.inner.plan_cache.get_or_plan(filter, &state.indexes);
        let target = state
            .select(filter, &plan)
            .0
            .first()
            .map(|doc| doc.id().clone());
        match target {
            Some(id) => {
                let modified = self.update_locked(&mut state, &id, mutation)?;
                Ok((1, modified))
            }
            None => Ok((0, 0)),
        }
    }

    fn update_locked(
        &self,
        state: &mut CollectionState,
        id: &DocumentId,
        mutation: &Mutation,
    ) -> Result<u64> {
        let current = state
            .documents
            .get(id)
            .ok_or_else(|| QuarryError::NotFound(format!("document {}", id)))?;
        let updated = match mutation.apply(current)? {
            Some(updated) => updated,
            None => return Ok(0),
        };

        self.journal(|| ChangeRecord::Update {
            id: id.clone(),
            document: updated.clone(),
        })?;

        state.indexes.on_update(current, &updated);
        if let Some(slot) = state.documents.get_mut(id) {
            *slot = updated;
        }
        state.revision += 1;
        log_trace!("Updated {} in '{}'", id, self.inner.name);
        Ok(1)
    }

    /// Remove one document - returns deleted count (0 if absent)
    pub fn delete(&self, id: &DocumentId) -> Result<u64> {
        let mut state = self.inner.state.write();
        self.delete_locked(&mut state, id)
    }

    /// Delete the first document matching `filter`
    pub fn delete_one(&self, filter: &Filter) -> Result<u64> {
        let mut state = self.inner.state.write();
        let plan = self.inner.plan_cache.get_or_plan(filter, &state.indexes);
        let target = state
            .select(filter, &plan)
            .0
            .first()
            .map(|doc| doc.id().clone());
        match target {
            Some(id) => self.delete_locked(&mut state, &id),
            None => Ok(0),
        }
    }

    fn delete_locked(&self, state: &mut CollectionState, id: &DocumentId) -> Result<u64> {
        if !state.documents.contains_key(id) {
            return Ok(0);
        }
        self.journal(|| ChangeRecord::Delete { id: id.clone() })?;

        if let Some(doc) = state.documents.shift_remove(id) {
            state.indexes.on_remove(&doc);
        }
        state.revision += 1;
        log_trace!("Deleted {} from '{}'", id, self.inner.name);
        Ok(1)
    }

    /// Append to the adapter (if any) before a change is applied
    fn journal<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce() -> ChangeRecord,
    {
        if let Some(adapter) = &self.inner.persistence {
            adapter.append_change(&change()).map_err(|e| {
                log_error!("Journal append for '{}' failed: {}", self.inner.name, e);
                e
            })?;
        }
        Ok(())
    }

    // ========== QUERY OPERATIONS ==========

    /// Lazy cursor over documents matching `filter`
    ///
    /// # Examples
    ///
    /// ```
    /// use quarry_core::{Collection, Filter, SortSpec};
    /// use serde_json::json;
    ///
    /// let books = Collection::new("books");
    /// books.insert(json!({"title": "Dune", "price": 9})).unwrap();
    /// books.insert(json!({"title": "Emma", "price": 7})).unwrap();
    ///
    /// let cheapest = books
    ///     .find(Filter::all())
    ///     .sort(SortSpec::asc("price"))
    ///     .limit(1)
    ///     .to_vec()
    ///     .unwrap();
    /// assert_eq!(cheapest[0]["title"], "Emma");
    /// ```
    pub fn find(&self, filter: Filter) -> FindCursor {
        FindCursor::new(self.clone(), filter)
    }

    pub fn find_one(&self, filter: &Filter) -> Result<Option<Value>> {
        let options = FindOptions::new().with_limit(1);
        Ok(self
            .run_find(filter, &options, None)?
            .documents
            .into_iter()
            .next())
    }

    pub fn count_documents(&self, filter: &Filter) -> Result<u64> {
        let state = self.inner.state.read();
        let plan = self.inner.plan_cache.get_or_plan(filter, &state.indexes);
        Ok(state.select(filter, &plan).0.len() as u64)
    }

    /// Execute `filter → sort → skip → limit → projection` against one snapshot
    pub(crate) fn run_find(
        &self,
        filter: &Filter,
        options: &FindOptions,
        cancel: Option<&CancellationToken>,
    ) -> Result<QueryRun> {
        let check = || cancel.map_or(Ok(()), CancellationToken::check);

        check()?;
        let state = self.inner.state.read();
        let plan = self.inner.plan_cache.get_or_plan(filter, &state.indexes);
        let (mut matched, mut stats) = state.select(filter, &plan);
        check()?;

        if let Some(sort) = &options.sort {
            apply_sort(&mut matched, sort);
            check()?;
        }

        let page = apply_skip_limit(matched, options.skip, options.limit);
        let documents: Vec<Value> = match &options.projection {
            Some(projection) => page
                .into_iter()
                .map(|doc| projection.apply(&doc.to_value()))
                .collect(),
            None => page.into_iter().map(Document::to_value).collect(),
        };
        stats.docs_returned = documents.len() as u64;

        log_debug!(
            "find on '{}': plan={} examined={} returned={}",
            self.inner.name,
            plan.kind(),
            stats.docs_examined,
            stats.docs_returned
        );
        Ok(QueryRun {
            documents,
            plan,
            stats,
        })
    }

    /// Access path the planner would use for `filter`
    pub fn plan(&self, filter: &Filter) -> QueryPlan {
        let state = self.inner.state.read();
        self.inner.plan_cache.get_or_plan(filter, &state.indexes)
    }

    /// Run `filter` and report plan and execution statistics
    pub fn explain(&self, filter: &Filter) -> Result<ExplainResult> {
        self.explain_with_options(filter, &FindOptions::default())
    }

    pub(crate) fn explain_with_options(
        &self,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<ExplainResult> {
        let started = Instant::now();
        let run = self.run_find(filter, options, None)?;
        Ok(ExplainResult::new(&run.plan, run.stats, started.elapsed()))
    }

    pub fn plan_cache_stats(&self) -> PlanCacheStats {
        self.inner.plan_cache.stats()
    }

    // ========== AGGREGATION ==========

    /// Execute an aggregation pipeline over a snapshot of the collection
    ///
    /// A leading `$match` is served through the planner, so it can use an
    /// index.
    pub fn aggregate(&self, pipeline: &Pipeline) -> Result<AggregateOutput> {
        self.aggregate_with_cancel(pipeline, &CancellationToken::new())
    }

    pub fn aggregate_with_cancel(
        &self,
        pipeline: &Pipeline,
        cancel: &CancellationToken,
    ) -> Result<AggregateOutput> {
        cancel.check()?;
        let (leading_match, rest) = pipeline.split_leading_match();

        // Snapshot under the read lock, run the stages without it
        let docs: Vec<Value> = {
            let state = self.inner.state.read();
            match leading_match {
                Some(filter) => {
                    let plan = self.inner.plan_cache.get_or_plan(filter, &state.indexes);
                    state
                        .select(filter, &plan)
                        .0
                        .into_iter()
                        .map(Document::to_value)
                        .collect()
                }
                None => state.documents.values().map(Document::to_value).collect(),
            }
        };

        run_stages(rest, docs, cancel)
    }

    // ========== INDEX OPERATIONS ==========

    /// Build an index over the current documents - returns its name
    pub fn create_index(&self, spec: IndexSpec) -> Result<String> {
        let mut state = self.inner.state.write();
        let state = &mut *state;
        state.indexes.check_new(&spec)?;
        self.journal(|| ChangeRecord::CreateIndex { spec: spec.clone() })?;

        let name = spec.name().to_string();
        state.indexes.create(spec, state.documents.values())?;
        state.revision += 1;
        Ok(name)
    }

    pub fn drop_index(&self, name: &str) -> Result<()> {
        let mut state = self.inner.state.write();
        state.indexes.check_drop(name)?;
        self.journal(|| ChangeRecord::DropIndex {
            name: name.to_string(),
        })?;
        state.indexes.drop(name)?;
        state.revision += 1;
        Ok(())
    }

    /// Identities matching `filter` through the named index, in index order.
    ///
    /// `NoIndexCoverage` unless the filter constrains a leading prefix of
    /// the index.
    pub fn index_lookup(&self, name: &str, filter: &Filter) -> Result<IndexScan> {
        self.inner.state.read().indexes.lookup(name, filter)
    }

    /// Index definitions, identity access path (`_id_`) first
    pub fn list_indexes(&self) -> Vec<IndexSpec> {
        let state = self.inner.state.read();
        std::iter::once(IndexSpec::identity())
            .chain(state.indexes.specs())
            .collect()
    }
}
