//! Durable post storage backed by SQLite.
//!
//! This module is split into two submodules:
//! - `model`: row types returned by the read helpers.
//! - `repo`: the `PostStore` handle and its SQL.
//!
//! Callers import from `tumblr_backup::db`; the store and its error type are
//! re-exported here.

pub mod model;
pub mod repo;

pub use model::{BackupRun, StoredPost};
pub use repo::{PostStore, StoreError};
