//! Row types returned by `PostStore` queries.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::model::RunStatus;

/// A post as it currently sits in the archive.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPost {
    pub id: i64,
    pub blog_name: String,
    pub post_type: String,
    pub created_at: i64,
    pub content: Value,
}

/// Audit record for one backup run.
#[derive(Debug, Clone)]
pub struct BackupRun {
    pub id: String,
    pub blog_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub posts_written: i64,
    pub error: Option<String>,
}
