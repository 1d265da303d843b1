//! facevote-store — durable storage for enrolled samples and cast votes.

pub mod sqlite;

pub use sqlite::SqliteStore;
