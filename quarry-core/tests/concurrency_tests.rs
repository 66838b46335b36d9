//! Concurrent access through cloned collection handles

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use quarry_core::{Collection, Filter, IndexSpec, Mutation, Pipeline, SortSpec};
use serde_json::json;

const WRITERS: usize = 4;
const DOCS_PER_WRITER: usize = 250;

#[test]
fn test_concurrent_inserts_get_unique_ids() {
    let books = Collection::new("books");
    books.create_index(IndexSpec::ascending("writer")).unwrap();
    let barrier = Arc::new(Barrier::new(WRITERS));

    let handles: Vec<_> = (0..WRITERS)
        .map(|w| {
            let books = books.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..DOCS_PER_WRITER)
                    .map(|i| books.insert(json!({"writer": w, "seq": i})).unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert!(ids.insert(id), "identity handed out twice");
        }
    }

    assert_eq!(books.len(), WRITERS * DOCS_PER_WRITER);
    assert_eq!(books.revision(), (WRITERS * DOCS_PER_WRITER) as u64 + 1);
    for w in 0..WRITERS {
        assert_eq!(
            books.count_documents(&Filter::eq("writer", w)).unwrap(),
            DOCS_PER_WRITER as u64
        );
    }
}

#[test]
fn test_readers_see_consistent_snapshots() {
    let accounts = Collection::new("accounts");
    for i in 0..50 {
        accounts
            .insert(json!({"account": i, "checking": 100, "savings": 0}))
            .unwrap();
    }
    accounts.create_index(IndexSpec::ascending("checking")).unwrap();

    // Every transfer moves money between two fields of one document in a
    // single update, so any one snapshot always totals 100 per account
    let totals = Pipeline::from_json(&json!([
        {"$addFields": {"total": {"$add": ["$checking", "$savings"]}}},
        {"$group": {
            "_id": null,
            "n": {"$count": {}},
            "sum": {"$sum": "$total"},
            "lo": {"$min": "$total"},
            "hi": {"$max": "$total"}
        }}
    ]))
    .unwrap();
    let transfer = Mutation::from_json(&json!({"$inc": {"checking": -5, "savings": 5}})).unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let accounts = accounts.clone();
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut reads = 0;
            while !done.load(Ordering::SeqCst) || reads == 0 {
                let out = accounts.aggregate(&totals).unwrap();
                assert_eq!(out.documents.len(), 1);
                let group = &out.documents[0];
                assert_eq!(group["n"], 50);
                assert_eq!(group["sum"], 5000);
                assert_eq!(group["lo"], 100);
                assert_eq!(group["hi"], 100);

                // Index-served read, still one snapshot
                for doc in accounts.find(Filter::lt("checking", 100)).to_vec().unwrap() {
                    let checking = doc["checking"].as_f64().unwrap();
                    let savings = doc["savings"].as_f64().unwrap();
                    assert_eq!(checking + savings, 100.0);
                }
                reads += 1;
            }
            reads
        })
    };

    for _ in 0..10 {
        for i in 0..50 {
            let (matched, modified) = accounts
                .update_one(&Filter::eq("account", i), &transfer)
                .unwrap();
            assert_eq!((matched, modified), (1, 1));
        }
    }
    done.store(true, Ordering::SeqCst);
    assert!(reader.join().unwrap() > 0);

    assert_eq!(accounts.count_documents(&Filter::eq("checking", 50)).unwrap(), 50);
    let first = accounts
        .find(Filter::all())
        .sort(SortSpec::asc("account"))
        .first()
        .unwrap()
        .unwrap();
    assert_eq!(first["savings"], 50);
}

#[test]
fn test_aggregate_while_writing() {
    let books = Collection::new("books");
    let writer = {
        let books = books.clone();
        thread::spawn(move || {
            for i in 0..200 {
                books.insert(json!({"genre": i % 3, "price": 1})).unwrap();
            }
        })
    };

    let pipeline = Pipeline::from_json(&json!([
        {"$group": {"_id": "$genre", "total": {"$sum": "$price"}}}
    ]))
    .unwrap();
    for _ in 0..20 {
        let out = books.aggregate(&pipeline).unwrap();
        let total: f64 = out.documents.iter().filter_map(|d| d["total"].as_f64()).sum();
        assert!(total <= 200.0);
    }

    writer.join().unwrap();
    let out = books.aggregate(&pipeline).unwrap();
    let total: f64 = out.documents.iter().filter_map(|d| d["total"].as_f64()).sum();
    assert_eq!(total, 200.0);
}
