//! Shared fixtures for integration tests

#![allow(dead_code)]

use quarry_core::Collection;
use serde_json::{json, Value as JsonValue};

/// Ten books across three genres, distinct publication years
pub fn bookstore_docs() -> Vec<JsonValue> {
    vec![
        json!({"title": "To Kill a Mockingbird", "author": "Harper Lee", "genre": "Fiction",
               "published_year": 1960, "price": 12.99, "in_stock": true, "pages": 336}),
        json!({"title": "1984", "author": "George Orwell", "genre": "Dystopian",
               "published_year": 1949, "price": 10.99, "in_stock": true, "pages": 328}),
        json!({"title": "The Great Gatsby", "author": "F. Scott Fitzgerald", "genre": "Fiction",
               "published_year": 1925, "price": 9.99, "in_stock": true, "pages": 180}),
        json!({"title": "Brave New World", "author": "Aldous Huxley", "genre": "Dystopian",
               "published_year": 1932, "price": 11.5, "in_stock": false, "pages": 311}),
        json!({"title": "The Hobbit", "author": "J.R.R. Tolkien", "genre": "Fantasy",
               "published_year": 1937, "price": 14.99, "in_stock": true, "pages": 310}),
        json!({"title": "The Catcher in the Rye", "author": "J.D. Salinger", "genre": "Fiction",
               "published_year": 1951, "price": 8.99, "in_stock": true, "pages": 224}),
        json!({"title": "Animal Farm", "author": "George Orwell", "genre": "Dystopian",
               "published_year": 1945, "price": 8.5, "in_stock": false, "pages": 112}),
        json!({"title": "The Lord of the Rings", "author": "J.R.R. Tolkien", "genre": "Fantasy",
               "published_year": 1954, "price": 19.99, "in_stock": true, "pages": 1178}),
        json!({"title": "Fahrenheit 451", "author": "Ray Bradbury", "genre": "Dystopian",
               "published_year": 1953, "price": 9.5, "in_stock": false, "pages": 194}),
        json!({"title": "The Alchemist", "author": "Paulo Coelho", "genre": "Fantasy",
               "published_year": 1988, "price": 10.99, "in_stock": true, "pages": 197}),
    ]
}

pub fn bookstore() -> Collection {
    let books = Collection::new("books");
    books.insert_many(bookstore_docs()).unwrap();
    books
}

/// Titles of result documents, in result order
pub fn titles(docs: &[quarry_core::Value]) -> Vec<String> {
    docs.iter()
        .map(|d| d["title"].as_str().unwrap_or_default().to_string())
        .collect()
}

pub fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}
