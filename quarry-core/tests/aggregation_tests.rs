//! Aggregation pipeline integration tests

mod common;

use common::{approx_eq, bookstore};
use quarry_core::{
    Accumulator, CancellationToken, Collection, Expression, Filter, GroupStage, IndexSpec,
    Pipeline, QuarryError, SortSpec, Stage,
};
use serde_json::json;

fn pipeline(j: serde_json::Value) -> Pipeline {
    Pipeline::from_json(&j).unwrap()
}

#[test]
fn test_average_price_by_genre() {
    let books = bookstore();
    let out = books
        .aggregate(&pipeline(json!([
            {"$group": {
                "_id": "$genre",
                "averagePrice": {"$avg": "$price"},
                "bookCount": {"$sum": 1}
            }},
            {"$sort": {"averagePrice": -1}}
        ])))
        .unwrap();

    assert_eq!(out.skipped, 0);
    let genres: Vec<_> = out.documents.iter().map(|d| d["_id"].clone()).collect();
    assert_eq!(genres, vec![json!("Fantasy"), json!("Fiction"), json!("Dystopian")]);

    let fantasy = &out.documents[0];
    assert_eq!(fantasy["bookCount"], 3);
    let avg = fantasy["averagePrice"].as_f64().unwrap();
    assert!(approx_eq(avg, (14.99 + 19.99 + 10.99) / 3.0));
}

#[test]
fn test_top_authors() {
    let books = bookstore();
    let out = books
        .aggregate(&pipeline(json!([
            {"$group": {"_id": "$author", "bookCount": {"$sum": 1}, "books": {"$push": "$title"}}},
            {"$sort": {"bookCount": -1}},
            {"$limit": 3}
        ])))
        .unwrap();

    assert_eq!(out.documents.len(), 3);
    assert_eq!(
        out.documents[0],
        json!({"_id": "George Orwell", "bookCount": 2, "books": ["1984", "Animal Farm"]})
    );
    assert_eq!(out.documents[1]["_id"], "J.R.R. Tolkien");
    // Ties keep first-seen group order
    assert_eq!(out.documents[2]["_id"], "Harper Lee");
}

#[test]
fn test_books_by_decade() {
    let books = bookstore();
    let out = books
        .aggregate(&pipeline(json!([
            {"$addFields": {"decade": {"$multiply": [{"$floor": {"$divide": ["$published_year", 10]}}, 10]}}},
            {"$group": {
                "_id": "$decade",
                "count": {"$sum": 1},
                "books": {"$push": {"title": "$title", "year": "$published_year"}}
            }},
            {"$sort": {"_id": 1}}
        ])))
        .unwrap();

    let decades: Vec<_> = out.documents.iter().map(|d| d["_id"].clone()).collect();
    assert_eq!(
        decades,
        vec![json!(1920), json!(1930), json!(1940), json!(1950), json!(1960), json!(1980)]
    );
    let fifties = &out.documents[3];
    assert_eq!(fifties["count"], 3);
    assert_eq!(
        fifties["books"],
        json!([
            {"title": "The Catcher in the Rye", "year": 1951},
            {"title": "The Lord of the Rings", "year": 1954},
            {"title": "Fahrenheit 451", "year": 1953}
        ])
    );
}

#[test]
fn test_group_counts_sum_to_total() {
    let books = bookstore();
    let out = books
        .aggregate(&pipeline(json!([{"$group": {"_id": "$genre", "n": {"$count": {}}}}])))
        .unwrap();

    assert_eq!(out.documents.len(), 3);
    let total: f64 = out.documents.iter().filter_map(|d| d["n"].as_f64()).sum();
    assert_eq!(total, 10.0);
}

#[test]
fn test_min_max_first_last() {
    let books = bookstore();
    let out = books
        .aggregate(&pipeline(json!([
            {"$match": {"genre": "Dystopian"}},
            {"$group": {
                "_id": null,
                "cheapest": {"$min": "$price"},
                "dearest": {"$max": "$price"},
                "first": {"$first": "$title"},
                "last": {"$last": "$title"}
            }}
        ])))
        .unwrap();

    assert_eq!(
        out.documents,
        vec![json!({
            "_id": null,
            "cheapest": 8.5,
            "dearest": 11.5,
            "first": "1984",
            "last": "Fahrenheit 451"
        })]
    );
}

#[test]
fn test_compute_errors_are_skipped_and_counted() {
    let books = Collection::new("books");
    books
        .insert_many(vec![
            json!({"title": "ok", "published_year": 1999}),
            json!({"title": "no year"}),
            json!({"title": "text year", "published_year": "1999"}),
        ])
        .unwrap();

    let out = books
        .aggregate(&pipeline(json!([
            {"$addFields": {"decade": {"$multiply": [{"$floor": {"$divide": ["$published_year", 10]}}, 10]}}}
        ])))
        .unwrap();
    assert_eq!(out.skipped, 2);
    assert_eq!(out.documents.len(), 1);
    assert_eq!(out.documents[0]["decade"], 1990);
}

#[test]
fn test_leading_match_can_use_index() {
    let books = bookstore();
    books.create_index(IndexSpec::ascending("genre")).unwrap();

    let out = books
        .aggregate(&pipeline(json!([
            {"$match": {"genre": "Fantasy"}},
            {"$sort": {"published_year": 1}},
            {"$project": {"title": 1, "_id": 0}}
        ])))
        .unwrap();
    assert_eq!(
        out.documents,
        vec![
            json!({"title": "The Hobbit"}),
            json!({"title": "The Lord of the Rings"}),
            json!({"title": "The Alchemist"})
        ]
    );
}

#[test]
fn test_skip_and_set_alias() {
    let books = bookstore();
    let out = books
        .aggregate(&pipeline(json!([
            {"$sort": {"price": 1}},
            {"$skip": 8},
            {"$set": {"discounted": {"$subtract": ["$price", 1]}}},
            {"$project": {"_id": 0, "title": 1, "discounted": 1}}
        ])))
        .unwrap();
    assert_eq!(out.documents.len(), 2);
    assert_eq!(out.documents[0]["title"], "The Hobbit");
    assert!(approx_eq(out.documents[1]["discounted"].as_f64().unwrap(), 18.99));
}

#[test]
fn test_builder_pipeline_matches_json() {
    let books = bookstore();
    let built = Pipeline::new()
        .with_stage(Stage::Match(Filter::eq("in_stock", true)))
        .with_stage(Stage::Group(GroupStage::new(
            Expression::field("genre"),
            vec![("count".to_string(), Accumulator::Count)],
        )))
        .with_stage(Stage::Sort(SortSpec::asc("_id")));
    let parsed = pipeline(json!([
        {"$match": {"in_stock": true}},
        {"$group": {"_id": "$genre", "count": {"$count": {}}}},
        {"$sort": {"_id": 1}}
    ]));

    assert_eq!(
        books.aggregate(&built).unwrap(),
        books.aggregate(&parsed).unwrap()
    );
}

#[test]
fn test_invalid_pipelines() {
    for bad in [
        json!({"$match": {}}),
        json!([{"$bucket": {}}]),
        json!([{"$limit": -1}]),
        json!([{"$skip": 1.5}]),
        json!([{"$sort": {}}]),
        json!([{"$group": {"total": {"$sum": 1}}}]),
        json!([{"$group": {"_id": "$genre", "n": {"$median": "$price"}}}]),
    ] {
        assert!(Pipeline::from_json(&bad).is_err(), "accepted {}", bad);
    }
}

#[test]
fn test_empty_pipeline_returns_all_documents() {
    let books = bookstore();
    let out = books.aggregate(&Pipeline::new()).unwrap();
    assert_eq!(out.documents.len(), 10);
    assert_eq!(out.documents[0]["title"], "To Kill a Mockingbird");
}

#[test]
fn test_cancelled_aggregation() {
    let books = bookstore();
    let token = CancellationToken::new();
    token.cancel();
    let result = books.aggregate_with_cancel(&pipeline(json!([{"$limit": 1}])), &token);
    assert!(matches!(result, Err(QuarryError::Cancelled)));
}
