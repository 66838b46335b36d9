//! Index integration tests
//!
//! Index lifecycle, lookups, planner choices and explain statistics

mod common;

use common::{bookstore, titles};
use quarry_core::{
    Collection, CollectionConfig, DocumentId, Filter, IndexSpec, Mutation, PlanKind,
    QuarryError, SortOrder, ID_INDEX_NAME,
};
use serde_json::json;

fn compound() -> IndexSpec {
    IndexSpec::new([
        ("author", SortOrder::Ascending),
        ("published_year", SortOrder::Descending),
    ])
    .unwrap()
}

// ========== LIFECYCLE ==========

#[test]
fn test_create_and_list_indexes() {
    let books = bookstore();
    assert_eq!(books.create_index(IndexSpec::ascending("title")).unwrap(), "title_1");
    assert_eq!(
        books.create_index(compound()).unwrap(),
        "author_1_published_year_-1"
    );

    let listed: Vec<_> = books.list_indexes().iter().map(IndexSpec::to_json).collect();
    assert_eq!(
        listed,
        vec![
            json!({"name": "_id_", "key": {"_id": 1}}),
            json!({"name": "title_1", "key": {"title": 1}}),
            json!({"name": "author_1_published_year_-1", "key": {"author": 1, "published_year": -1}}),
        ]
    );
}

#[test]
fn test_index_from_json_key() {
    let spec = IndexSpec::from_json(&json!({"author": 1, "published_year": -1})).unwrap();
    assert_eq!(spec, compound());
    assert!(IndexSpec::from_json(&json!({"author": 2})).is_err());
    assert!(IndexSpec::from_json(&json!({})).is_err());
}

#[test]
fn test_duplicate_index_rejected() {
    let books = bookstore();
    books.create_index(IndexSpec::ascending("title")).unwrap();

    assert!(matches!(
        books.create_index(IndexSpec::ascending("title")),
        Err(QuarryError::IndexExists(_))
    ));
    assert!(matches!(
        books.create_index(IndexSpec::ascending("title").with_name("by_title")),
        Err(QuarryError::IndexExists(_))
    ));
    assert!(matches!(
        books.create_index(IndexSpec::ascending("price").with_name("title_1")),
        Err(QuarryError::IndexExists(_))
    ));
    assert!(matches!(
        books.create_index(IndexSpec::ascending("price").with_name(ID_INDEX_NAME)),
        Err(QuarryError::IndexExists(_))
    ));
}

#[test]
fn test_drop_index() {
    let books = bookstore();
    books.create_index(IndexSpec::ascending("title")).unwrap();
    let revision = books.revision();

    books.drop_index("title_1").unwrap();
    assert_eq!(books.revision(), revision + 1);
    assert_eq!(books.list_indexes().len(), 1);

    assert!(matches!(books.drop_index("title_1"), Err(QuarryError::NotFound(_))));
    assert!(matches!(
        books.drop_index(ID_INDEX_NAME),
        Err(QuarryError::InvalidQuery(_))
    ));
}

// ========== LOOKUP ==========

#[test]
fn test_lookup_leading_prefix_rule() {
    let books = bookstore();
    books.create_index(compound()).unwrap();
    let name = "author_1_published_year_-1";

    let orwell = books
        .index_lookup(name, &Filter::eq("author", "George Orwell"))
        .unwrap();
    // Descending on published_year: 1949 before 1945
    assert_eq!(orwell.ids, vec![DocumentId::Int(2), DocumentId::Int(7)]);
    // two Orwell entries plus the next author's entry that ends the scan
    assert_eq!(orwell.keys_examined, 3);

    let ranged = books
        .index_lookup(
            name,
            &Filter::and(vec![
                Filter::eq("author", "George Orwell"),
                Filter::gt("published_year", 1946),
            ]),
        )
        .unwrap();
    assert_eq!(ranged.ids, vec![DocumentId::Int(2)]);

    assert!(matches!(
        books.index_lookup(name, &Filter::gt("published_year", 1900)),
        Err(QuarryError::NoIndexCoverage)
    ));
    assert!(matches!(
        books.index_lookup("missing_1", &Filter::eq("author", "x")),
        Err(QuarryError::NotFound(_))
    ));
}

#[test]
fn test_range_lookup_on_single_field() {
    let books = bookstore();
    books.create_index(IndexSpec::ascending("published_year")).unwrap();
    let scan = books
        .index_lookup("published_year_1", &Filter::gt("published_year", 1950))
        .unwrap();
    assert_eq!(
        scan.ids,
        vec![
            DocumentId::Int(6),
            DocumentId::Int(9),
            DocumentId::Int(8),
            DocumentId::Int(1),
            DocumentId::Int(10)
        ]
    );
}

#[test]
fn test_index_follows_updates_and_deletes() {
    let books = bookstore();
    books.create_index(IndexSpec::ascending("title")).unwrap();

    books
        .update(&DocumentId::Int(2), &Mutation::new().set("title", "Nineteen Eighty-Four"))
        .unwrap();
    assert!(books
        .index_lookup("title_1", &Filter::eq("title", "1984"))
        .unwrap()
        .ids
        .is_empty());
    assert_eq!(
        books
            .index_lookup("title_1", &Filter::eq("title", "Nineteen Eighty-Four"))
            .unwrap()
            .ids,
        vec![DocumentId::Int(2)]
    );

    books.delete(&DocumentId::Int(2)).unwrap();
    assert!(books
        .index_lookup("title_1", &Filter::eq("title", "Nineteen Eighty-Four"))
        .unwrap()
        .ids
        .is_empty());

    let id = books.insert(json!({"title": "1984"})).unwrap();
    assert_eq!(
        books.index_lookup("title_1", &Filter::eq("title", "1984")).unwrap().ids,
        vec![id]
    );
}

#[test]
fn test_documents_missing_indexed_field_are_found_by_scan_only() {
    let books = Collection::new("books");
    books.insert(json!({"title": "no year"})).unwrap();
    books.insert(json!({"title": "year", "published_year": 2001})).unwrap();
    books.create_index(IndexSpec::ascending("published_year")).unwrap();

    let docs = books.find(Filter::gte("published_year", 0)).to_vec().unwrap();
    assert_eq!(titles(&docs), vec!["year"]);
    assert_eq!(books.count_documents(&Filter::all()).unwrap(), 2);
}

// ========== PLANNER & EXPLAIN ==========

#[test]
fn test_explain_title_with_and_without_index() {
    let books = bookstore();
    let query = Filter::eq("title", "1984");

    let without = books.explain(&query).unwrap();
    assert_eq!(without.plan, PlanKind::CollectionScan);
    assert_eq!(without.index_used, None);
    assert_eq!(without.docs_examined, 10);
    assert_eq!(without.keys_examined, 0);
    assert_eq!(without.docs_returned, 1);

    books.create_index(IndexSpec::ascending("title")).unwrap();
    let with = books.explain(&query).unwrap();
    assert_eq!(with.plan, PlanKind::IndexScan);
    assert_eq!(with.index_used.as_deref(), Some("title_1"));
    assert_eq!(with.docs_examined, 1);
    assert_eq!(with.keys_examined, 2);
    assert_eq!(with.docs_returned, 1);
    assert!(with.docs_examined <= without.docs_examined);
}

#[test]
fn test_explain_id_lookup() {
    let books = bookstore();
    let hit = books.explain(&Filter::eq("_id", 3)).unwrap();
    assert_eq!(hit.plan, PlanKind::IdLookup);
    assert_eq!(hit.index_used.as_deref(), Some(ID_INDEX_NAME));
    assert_eq!((hit.docs_examined, hit.keys_examined, hit.docs_returned), (1, 1, 1));

    let miss = books.explain(&Filter::eq("_id", 99)).unwrap();
    assert_eq!(miss.plan, PlanKind::IdLookup);
    assert_eq!((miss.docs_examined, miss.docs_returned), (0, 0));
}

#[test]
fn test_planner_prefers_more_covered_fields() {
    let books = bookstore();
    books.create_index(IndexSpec::ascending("author")).unwrap();
    books.create_index(compound()).unwrap();

    let both = Filter::from_json(&json!({"author": "George Orwell", "published_year": 1949}))
        .unwrap();
    assert_eq!(
        books.plan(&both).index_name(),
        Some("author_1_published_year_-1")
    );
    // Tie on one covered field: the older index wins
    assert_eq!(
        books.plan(&Filter::eq("author", "George Orwell")).index_name(),
        Some("author_1")
    );
}

#[test]
fn test_or_and_non_prefix_filters_scan() {
    let books = bookstore();
    books.create_index(compound()).unwrap();

    let or = Filter::or(vec![
        Filter::eq("author", "George Orwell"),
        Filter::eq("author", "Harper Lee"),
    ]);
    assert_eq!(books.plan(&or).kind(), PlanKind::CollectionScan);
    assert_eq!(books.count_documents(&or).unwrap(), 3);

    let year_only = Filter::gt("published_year", 1950);
    assert_eq!(books.plan(&year_only).kind(), PlanKind::CollectionScan);
}

#[test]
fn test_results_identical_with_and_without_index() {
    let plain = bookstore();
    let indexed = bookstore();
    indexed.create_index(IndexSpec::ascending("published_year")).unwrap();
    indexed.create_index(compound()).unwrap();

    for query in [
        json!({"published_year": {"$gt": 1950}}),
        json!({"published_year": {"$gte": 1937, "$lte": 1953}}),
        json!({"author": "J.R.R. Tolkien"}),
        json!({"author": "George Orwell", "published_year": {"$lt": 1949}}),
        json!({"published_year": {"$gt": "1950"}}),
    ] {
        let filter = Filter::from_json(&query).unwrap();
        let a = plain.find(filter.clone()).to_vec().unwrap();
        let b = indexed.find(filter).to_vec().unwrap();
        assert_eq!(a, b, "{}", query);
    }
}

#[test]
fn test_explain_json_shape() {
    let books = bookstore();
    books.create_index(IndexSpec::ascending("title")).unwrap();
    let json = books.explain(&Filter::eq("title", "1984")).unwrap().to_json();

    assert_eq!(json["plan"], "index_scan");
    assert_eq!(json["indexUsed"], "title_1");
    assert_eq!(json["executionStats"]["docsExamined"], 1);
    assert_eq!(json["executionStats"]["docsReturned"], 1);
}

// ========== PLAN CACHE ==========

#[test]
fn test_plan_cache_is_invalidated_by_index_changes() {
    let books = bookstore();
    let query = Filter::eq("title", "1984");

    assert_eq!(books.plan(&query).kind(), PlanKind::CollectionScan);
    assert_eq!(books.plan(&query).kind(), PlanKind::CollectionScan);
    let stats = books.plan_cache_stats();
    assert_eq!((stats.hits, stats.misses), (1, 1));

    books.create_index(IndexSpec::ascending("title")).unwrap();
    assert_eq!(books.plan(&query).kind(), PlanKind::IndexScan);

    books.drop_index("title_1").unwrap();
    assert_eq!(books.plan(&query).kind(), PlanKind::CollectionScan);
}

#[test]
fn test_plan_cache_can_be_disabled() {
    let books = Collection::with_config(
        "books",
        CollectionConfig::new().with_plan_cache_capacity(0),
    );
    books.insert(json!({"title": "1984"})).unwrap();
    books.plan(&Filter::eq("title", "1984"));
    books.plan(&Filter::eq("title", "1984"));

    let stats = books.plan_cache_stats();
    assert_eq!((stats.capacity, stats.size, stats.hits), (0, 0, 0));
}
