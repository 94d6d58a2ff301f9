// src/db/mod.rs

//! SQLite catalogue: schema, paths and the `Catalog` store

pub mod catalog;
pub mod paths;
pub mod schema;

pub use catalog::{Catalog, CategoryCount, CategoryFilter};
pub use paths::Locations;
