//! Backup orchestration: source → batcher → store.
//!
//! A run moves through `Idle → Fetching → Writing → … → Finalizing → Done`, or
//! ends in `Failed`. The archive is closed on both exits before control
//! returns to the caller.

use futures::{pin_mut, StreamExt};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::batch::{batch, BatchSizeError};
use crate::db::{PostStore, StoreError};
use crate::model::{PipelineState, RunStatus};
use crate::source::{PostSource, RetryPolicy, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::tumblr::{FetchError, PostApi};

/// Posts grouped into one storage transaction.
pub const DEFAULT_BATCH_SIZE: usize = 20;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error(transparent)]
    BatchSize(#[from] BatchSizeError),
    #[error("fetching posts failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("archive failure: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSettings {
    pub page_size: u32,
    pub batch_size: usize,
    pub retry: RetryPolicy,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupReport {
    pub run_id: Uuid,
    pub blog: String,
    pub posts_written: u64,
    pub batches_written: u64,
    pub state: PipelineState,
}

#[derive(Debug, Default)]
struct Progress {
    posts: u64,
    batches: u64,
}

pub struct BackupPipeline<A> {
    source: PostSource<A>,
    batch_size: usize,
}

impl<A: PostApi> BackupPipeline<A> {
    pub fn new(api: A, settings: BackupSettings) -> Result<Self, BackupError> {
        if settings.page_size == 0 || settings.page_size > MAX_PAGE_SIZE {
            return Err(BackupError::InvalidInput("page size must be between 1 and 20"));
        }
        if settings.batch_size == 0 {
            return Err(BatchSizeError.into());
        }
        Ok(Self {
            source: PostSource::new(api, settings.page_size, settings.retry),
            batch_size: settings.batch_size,
        })
    }

    /// Back up every post of `blog` into the archive at `location`.
    ///
    /// The archive is opened before the first request, so an unusable
    /// location fails without touching the network.
    #[instrument(skip_all, fields(blog = %blog))]
    pub async fn run(&self, blog: &str, location: &Path) -> Result<BackupReport, BackupError> {
        if blog.trim().is_empty() {
            return Err(BackupError::InvalidInput("blog name must be non-empty"));
        }

        let mut state = PipelineState::Idle;
        let run_id = Uuid::new_v4();
        let store = PostStore::open(location).await?;
        info!(%run_id, path = %store.path().display(), "backup started");

        if let Err(err) = store.begin_run(run_id, blog).await {
            warn!(%run_id, error = %err, "failed to record run start");
        }

        let mut progress = Progress::default();
        let outcome = self.drive(&store, blog, &mut state, &mut progress).await;

        let (status, error_text) = match &outcome {
            Ok(()) => {
                transition(&mut state, PipelineState::Finalizing);
                (RunStatus::Done, None)
            }
            Err(err) => {
                transition(&mut state, PipelineState::Failed);
                error!(%run_id, error = %err, posts = progress.posts, "backup failed");
                (RunStatus::Failed, Some(err.to_string()))
            }
        };
        if let Err(err) = store
            .finish_run(run_id, status, progress.posts, error_text.as_deref())
            .await
        {
            warn!(%run_id, error = %err, "failed to record run outcome");
        }
        store.close().await;
        outcome?;

        transition(&mut state, PipelineState::Done);
        info!(
            %run_id,
            posts = progress.posts,
            batches = progress.batches,
            "backup finished"
        );
        Ok(BackupReport {
            run_id,
            blog: blog.to_string(),
            posts_written: progress.posts,
            batches_written: progress.batches,
            state,
        })
    }

    async fn drive(
        &self,
        store: &PostStore,
        blog: &str,
        state: &mut PipelineState,
        progress: &mut Progress,
    ) -> Result<(), BackupError> {
        let batches = batch(self.source.fetch_all(blog), self.batch_size)?;
        pin_mut!(batches);

        loop {
            transition(state, PipelineState::Fetching);
            let Some(next) = batches.next().await else {
                return Ok(());
            };
            let posts = next?;

            transition(state, PipelineState::Writing);
            progress.posts += store.put(&posts).await?;
            progress.batches += 1;
            info!(batch = progress.batches, posts = progress.posts, "batch committed");
        }
    }
}

fn transition(state: &mut PipelineState, next: PipelineState) {
    if *state != next {
        debug!(from = state.as_str(), to = next.as_str(), "pipeline state");
        *state = next;
    }
}
