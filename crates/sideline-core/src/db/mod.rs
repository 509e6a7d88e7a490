//! `SQLite` persistence for the local key-value tier

mod connection;
mod kv_repository;
mod migrations;

pub use connection::Database;
pub use kv_repository::SqliteKvStore;
