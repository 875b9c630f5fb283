//! Archive the full post history of a Tumblr blog into a local SQLite file.
//!
//! The pipeline pulls posts page by page from [`tumblr::PostApi`], groups
//! them with [`batch::batch`], and upserts each group into [`db::PostStore`]
//! inside one transaction. Re-running over the same archive converges to the
//! same stored state.

pub mod batch;
pub mod config;
pub mod db;
pub mod model;
pub mod pipeline;
pub mod source;
pub mod tumblr;

pub use model::{PipelineState, Post};
pub use pipeline::{BackupError, BackupPipeline, BackupReport, BackupSettings};
