// quarry-core/src/cursor.rs
//! Lazy find cursor
//!
//! Nothing executes until a terminal method (`to_vec`, `iter`, `count`,
//! `first`, `explain`) is called. Each terminal call runs the query again
//! against the collection's current state, so a cursor can be reused.

use std::vec;

use crate::cancel::CancellationToken;
use crate::collection::Collection;
use crate::error::Result;
use crate::explain::ExplainResult;
use crate::find_options::{FindOptions, Projection, SortSpec};
use crate::query::Filter;
use crate::value::Value;

#[derive(Debug, Clone)]
pub struct FindCursor {
    collection: Collection,
    filter: Filter,
    options: FindOptions,
    cancel: Option<CancellationToken>,
}

impl FindCursor {
    pub(crate) fn new(collection: Collection, filter: Filter) -> Self {
        FindCursor {
            collection,
            filter,
            options: FindOptions::default(),
            cancel: None,
        }
    }

    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.options.sort = Some(sort);
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.options.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.options.limit = Some(limit);
        self
    }

    pub fn project(mut self, projection: Projection) -> Self {
        self.options.projection = Some(projection);
        self
    }

    /// Replace all options at once
    pub fn with_options(mut self, options: FindOptions) -> Self {
        self.options = options;
        self
    }

    /// Abort with `Cancelled` once `token` fires
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn options(&self) -> &FindOptions {
        &self.options
    }

    /// Run the query and collect every result
    pub fn to_vec(&self) -> Result<Vec<Value>> {
        Ok(self
            .collection
            .run_find(&self.filter, &self.options, self.cancel.as_ref())?
            .documents)
    }

    pub fn iter(&self) -> Result<vec::IntoIter<Value>> {
        Ok(self.to_vec()?.into_iter())
    }

    /// Results after skip and limit
    pub fn count(&self) -> Result<u64> {
        let mut options = self.options.clone();
        options.projection = None;
        let run = self
            .collection
            .run_find(&self.filter, &options, self.cancel.as_ref())?;
        Ok(run.documents.len() as u64)
    }

    pub fn first(&self) -> Result<Option<Value>> {
        let mut options = self.options.clone();
        options.limit = Some(options.limit.map_or(1, |limit| limit.min(1)));
        Ok(self
            .collection
            .run_find(&self.filter, &options, self.cancel.as_ref())?
            .documents
            .into_iter()
            .next())
    }

    /// Plan and statistics for this cursor's filter and options
    pub fn explain(&self) -> Result<ExplainResult> {
        if let Some(token) = &self.cancel {
            token.check()?;
        }
        self.collection
            .explain_with_options(&self.filter, &self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QuarryError;
    use serde_json::json;

    fn books() -> Collection {
        let c = Collection::new("books");
        c.insert_many(vec![
            json!({"title": "A", "price": 30}),
            json!({"title": "B", "price": 10}),
            json!({"title": "C", "price": 20}),
        ])
        .unwrap();
        c
    }

    #[test]
    fn test_cursor_is_restartable() {
        let c = books();
        let cursor = c.find(Filter::gte("price", 20));
        assert_eq!(cursor.count().unwrap(), 2);
        c.insert(json!({"title": "D", "price": 25})).unwrap();
        assert_eq!(cursor.count().unwrap(), 3);
        assert_eq!(cursor.iter().unwrap().count(), 3);
    }

    #[test]
    fn test_first_respects_sort_and_skip() {
        let c = books();
        let cursor = c.find(Filter::all()).sort(SortSpec::asc("price")).skip(1);
        assert_eq!(cursor.first().unwrap().unwrap()["title"], "C");
        assert_eq!(cursor.clone().limit(0).first().unwrap(), None);
    }

    #[test]
    fn test_cancelled_cursor() {
        let c = books();
        let token = CancellationToken::new();
        token.cancel();
        let cursor = c.find(Filter::all()).with_cancellation(token);
        assert!(matches!(cursor.to_vec(), Err(QuarryError::Cancelled)));
        assert!(matches!(cursor.explain(), Err(QuarryError::Cancelled)));
    }
}
