// quarry-core/src/persistence/mod.rs
//! Persistence adapter boundary
//!
//! ```text
//! Collection ──append_change──> PersistenceAdapter
//!      ^                          ├── MemoryJournal (in-process record log)
//!      └──────load_all────────────└── FileJournal   (framed file log)
//! ```
//!
//! The collection calls `append_change` while holding its write lock and
//! before touching memory. If the append fails the mutation is aborted and
//! the in-memory state is left as it was.

pub mod journal;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::document::{Document, DocumentId};
use crate::error::{QuarryError, Result};
use crate::index::IndexSpec;

pub use journal::{FileJournal, JournalEntry};

/// A committed collection change, in the order it was applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ChangeRecord {
    Insert { document: Document },
    /// Full post-update document
    Update { id: DocumentId, document: Document },
    Delete { id: DocumentId },
    CreateIndex { spec: IndexSpec },
    DropIndex { name: String },
}

/// Storage behind a collection
pub trait PersistenceAdapter: Send + Sync {
    /// Current documents, in insertion order
    fn load_all(&self) -> Result<Vec<Document>>;

    /// Index definitions to rebuild on open
    fn load_indexes(&self) -> Result<Vec<IndexSpec>> {
        Ok(Vec::new())
    }

    /// Highest integer identity ever stored, so auto-increment never reuses
    /// the identity of a deleted document
    fn last_auto_id(&self) -> Result<i64> {
        Ok(0)
    }

    fn append_change(&self, change: &ChangeRecord) -> Result<()>;
}

/// State rebuilt by replaying change records
#[derive(Debug, Default)]
pub struct ReplayState {
    documents: IndexMap<DocumentId, Document>,
    indexes: Vec<IndexSpec>,
    last_auto_id: i64,
}

impl ReplayState {
    pub fn apply(&mut self, change: &ChangeRecord) {
        match change {
            ChangeRecord::Insert { document } => {
                if let DocumentId::Int(n) = document.id() {
                    self.last_auto_id = self.last_auto_id.max(*n);
                }
                self.documents
                    .insert(document.id().clone(), document.clone());
            }
            ChangeRecord::Update { id, document } => {
                self.documents.insert(id.clone(), document.clone());
            }
            ChangeRecord::Delete { id } => {
                self.documents.shift_remove(id);
            }
            ChangeRecord::CreateIndex { spec } => {
                self.indexes.retain(|s| s.name() != spec.name());
                self.indexes.push(spec.clone());
            }
            ChangeRecord::DropIndex { name } => {
                self.indexes.retain(|s| s.name() != name);
            }
        }
    }

    pub fn replay<'a, I>(changes: I) -> Self
    where
        I: IntoIterator<Item = &'a ChangeRecord>,
    {
        let mut state = ReplayState::default();
        for change in changes {
            state.apply(change);
        }
        state
    }

    pub fn documents(&self) -> Vec<Document> {
        self.documents.values().cloned().collect()
    }

    pub fn indexes(&self) -> Vec<IndexSpec> {
        self.indexes.clone()
    }

    pub fn last_auto_id(&self) -> i64 {
        self.last_auto_id
    }
}

/// Change log kept in memory; handy for inspecting what a collection wrote
#[derive(Debug, Default)]
pub struct MemoryJournal {
    records: Mutex<Vec<ChangeRecord>>,
    fail_appends: AtomicBool,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Journal pre-populated with records
    pub fn from_records(records: Vec<ChangeRecord>) -> Self {
        MemoryJournal {
            records: Mutex::new(records),
            fail_appends: AtomicBool::new(false),
        }
    }

    pub fn records(&self) -> Vec<ChangeRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Make every following append fail (or succeed again)
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    fn replayed(&self) -> ReplayState {
        ReplayState::replay(self.records.lock().iter())
    }
}

impl PersistenceAdapter for MemoryJournal {
    fn load_all(&self) -> Result<Vec<Document>> {
        Ok(self.replayed().documents())
    }

    fn load_indexes(&self) -> Result<Vec<IndexSpec>> {
        Ok(self.replayed().indexes())
    }

    fn last_auto_id(&self) -> Result<i64> {
        Ok(self.replayed().last_auto_id())
    }

    fn append_change(&self, change: &ChangeRecord) -> Result<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(QuarryError::Persistence(
                "journal rejected the append".to_string(),
            ));
        }
        self.records.lock().push(change.clone());
        Ok(())
    }
}
