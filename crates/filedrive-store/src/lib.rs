//! # filedrive-store
//!
//! Durable storage for users, the folder/file tree and permission grants,
//! backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for every domain model.
//! Operations that touch parent/child relationships run inside a single
//! transaction; the user upsert is a single atomic statement.

pub mod database;
pub mod files;
pub mod folders;
pub mod migrations;
pub mod models;
pub mod permissions;
pub mod users;

mod error;
mod sql;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
