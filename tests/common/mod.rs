#![allow(dead_code)]

use reqwest::StatusCode;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tumblr_backup::source::RetryPolicy;
use tumblr_backup::tumblr::{FetchError, PostApi};
use tumblr_backup::Post;

pub fn post(id: i64) -> Post {
    post_with_body(id, &format!("post #{id}"))
}

pub fn post_with_body(id: i64, body: &str) -> Post {
    let timestamp = 1_700_000_000 - id;
    Post {
        id,
        post_type: "text".into(),
        timestamp,
        blog_name: "staff".into(),
        content: json!({
            "id": id,
            "type": "text",
            "timestamp": timestamp,
            "blog_name": "staff",
            "body": body,
        }),
    }
}

pub fn posts(n: i64) -> Vec<Post> {
    (1..=n).map(post).collect()
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
    }
}

pub fn status(code: u16) -> FetchError {
    FetchError::Status {
        status: StatusCode::from_u16(code).unwrap(),
        body: String::new(),
    }
}

/// Serves a fixed post listing by offset, with optional scripted failures.
#[derive(Clone, Default)]
pub struct ScriptedApi {
    posts: Arc<Vec<Post>>,
    failures: Arc<Mutex<VecDeque<FetchError>>>,
    fail_from: Option<(u64, u16)>,
    page_cap: Option<usize>,
    calls: Arc<Mutex<Vec<(u64, u32)>>>,
}

impl ScriptedApi {
    pub fn new(posts: Vec<Post>) -> Self {
        Self {
            posts: Arc::new(posts),
            ..Default::default()
        }
    }

    /// Errors returned, one per call, before any page is served.
    pub fn with_failures(mut self, failures: Vec<FetchError>) -> Self {
        self.failures = Arc::new(Mutex::new(VecDeque::from(failures)));
        self
    }

    /// Every request at or beyond `offset` answers with `code`.
    pub fn failing_from(mut self, offset: u64, code: u16) -> Self {
        self.fail_from = Some((offset, code));
        self
    }

    /// Serve at most `cap` posts per page whatever `limit` asks for.
    pub fn with_page_cap(mut self, cap: usize) -> Self {
        self.page_cap = Some(cap);
        self
    }

    pub async fn calls(&self) -> Vec<(u64, u32)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl PostApi for ScriptedApi {
    async fn fetch_page(
        &self,
        _blog: &str,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<Post>, FetchError> {
        self.calls.lock().await.push((offset, limit));
        if let Some(err) = self.failures.lock().await.pop_front() {
            return Err(err);
        }
        if let Some((from, code)) = self.fail_from {
            if offset >= from {
                return Err(status(code));
            }
        }
        let start = (offset as usize).min(self.posts.len());
        let limit = self.page_cap.map_or(limit as usize, |cap| cap.min(limit as usize));
        let end = (start + limit).min(self.posts.len());
        Ok(self.posts[start..end].to_vec())
    }
}
