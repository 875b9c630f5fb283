//! Lazy, paginated retrieval of every post on a blog.
//!
//! `PostSource::fetch_all` walks the listing endpoint with an offset cursor and
//! yields posts one at a time. A new page is only requested once the consumer
//! has drained the previous one, so memory stays bounded by a single page.

use futures::stream::{self, Stream, TryStreamExt};
use std::time::Duration;
use tracing::{debug, warn};

use crate::model::Post;
use crate::tumblr::{FetchError, PostApi};

/// Largest page the listing endpoint serves. Asking for more still returns
/// this many, which would read as a short (final) page.
pub const MAX_PAGE_SIZE: u32 = 20;
pub const DEFAULT_PAGE_SIZE: u32 = MAX_PAGE_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `failed`-th failed attempt: base * 2^(failed-1), capped.
    pub fn delay_for(&self, failed: u32) -> Duration {
        let shift = failed.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1_u32 << shift)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy)]
struct PageCursor {
    offset: u64,
    done: bool,
}

impl PageCursor {
    fn start() -> Self {
        Self {
            offset: 0,
            done: false,
        }
    }

    /// A short page means the listing is exhausted.
    fn advance(self, returned: usize, page_size: u32) -> Self {
        Self {
            offset: self.offset + returned as u64,
            done: returned < page_size as usize,
        }
    }
}

pub struct PostSource<A> {
    api: A,
    page_size: u32,
    retry: RetryPolicy,
}

impl<A: PostApi> PostSource<A> {
    pub fn new(api: A, page_size: u32, retry: RetryPolicy) -> Self {
        Self {
            api,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
            retry,
        }
    }

    /// Every post currently on `blog`, in the order the platform lists them.
    ///
    /// The stream ends with `None` once the listing is exhausted, or after
    /// yielding a single `Err` when a page could not be fetched.
    pub fn fetch_all<'a>(
        &'a self,
        blog: &'a str,
    ) -> impl Stream<Item = Result<Post, FetchError>> + 'a {
        let pages = stream::try_unfold(PageCursor::start(), move |cursor| async move {
            if cursor.done {
                return Ok(None);
            }
            let page = self.fetch_page_with_retry(blog, cursor.offset).await?;
            debug!(blog, offset = cursor.offset, returned = page.len(), "page fetched");
            if page.is_empty() {
                return Ok(None);
            }
            let next = cursor.advance(page.len(), self.page_size);
            Ok(Some((page, next)))
        });

        pages
            .map_ok(|page| stream::iter(page.into_iter().map(Ok::<Post, FetchError>)))
            .try_flatten()
    }

    async fn fetch_page_with_retry(
        &self,
        blog: &str,
        offset: u64,
    ) -> Result<Vec<Post>, FetchError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.api.fetch_page(blog, offset, self.page_size).await {
                Ok(page) => return Ok(page),
                Err(err) => err,
            };
            if !err.is_transient() {
                return Err(err);
            }
            if attempt >= self.retry.max_attempts {
                return Err(FetchError::Exhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }
            let delay = self.retry.delay_for(attempt);
            warn!(blog, offset, attempt, ?delay, error = %err, "page fetch failed; retrying");
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for(40), Duration::from_millis(350));
    }

    #[test]
    fn page_size_is_clamped_to_endpoint_maximum() {
        struct NoApi;
        #[async_trait::async_trait]
        impl PostApi for NoApi {
            async fn fetch_page(
                &self,
                _blog: &str,
                _offset: u64,
                _limit: u32,
            ) -> Result<Vec<Post>, FetchError> {
                Ok(Vec::new())
            }
        }
        let size = |requested| PostSource::new(NoApi, requested, RetryPolicy::default()).page_size;
        assert_eq!(size(50), MAX_PAGE_SIZE);
        assert_eq!(size(0), 1);
        assert_eq!(size(7), 7);
    }

    #[test]
    fn cursor_advances_by_items_returned() {
        let c = PageCursor::start().advance(20, 20);
        assert_eq!(c.offset, 20);
        assert!(!c.done);
        let c = c.advance(7, 20);
        assert_eq!(c.offset, 27);
        assert!(c.done);
    }
}
