use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Credentials;
use crate::model::Post;
use crate::tumblr::model::PostsEnvelope;

pub mod model;
mod oauth;

pub const TUMBLR_API_BASE: &str = "https://api.tumblr.com/";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to reach Tumblr: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("tumblr error {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("unexpected Tumblr response: {0}")]
    Format(String),
    #[error("giving up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// Timeouts, connection failures, 429 and 5xx are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport(_) => true,
            FetchError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            FetchError::Format(_) | FetchError::Exhausted { .. } => false,
        }
    }
}

/// One page of a blog's post listing.
#[async_trait]
pub trait PostApi: Send + Sync {
    async fn fetch_page(&self, blog: &str, offset: u64, limit: u32)
        -> Result<Vec<Post>, FetchError>;
}

#[derive(Clone)]
pub struct TumblrClient {
    http: Client,
    base_url: Url,
    credentials: Credentials,
}

impl fmt::Debug for TumblrClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TumblrClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl TumblrClient {
    pub fn new(credentials: Credentials, base_url: Url) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .user_agent(concat!("tumblr-backup/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url,
            credentials,
        })
    }

    /// A signed `GET` for one page of the listing.
    pub fn build_request(
        &self,
        blog: &str,
        offset: u64,
        limit: u32,
    ) -> Result<reqwest::Request, FetchError> {
        let nonce = Uuid::new_v4().simple().to_string();
        self.build_request_at(blog, offset, limit, &nonce, Utc::now().timestamp())
    }

    /// Like [`build_request`](Self::build_request) with a fixed OAuth nonce and timestamp.
    pub fn build_request_at(
        &self,
        blog: &str,
        offset: u64,
        limit: u32,
        nonce: &str,
        timestamp: i64,
    ) -> Result<reqwest::Request, FetchError> {
        let mut endpoint = self
            .base_url
            .join(&format!("v2/blog/{}/posts", blog_identifier(blog)))
            .map_err(|e| FetchError::Format(format!("invalid Tumblr base URL: {e}")))?;
        endpoint
            .query_pairs_mut()
            .append_pair("api_key", &self.credentials.consumer_key)
            .append_pair("offset", &offset.to_string())
            .append_pair("limit", &limit.to_string())
            .append_pair("reblog_info", "true")
            .append_pair("notes_info", "true");
        let authorization =
            oauth::authorization_header(&self.credentials, "GET", &endpoint, nonce, timestamp)?;
        self.http
            .get(endpoint)
            .header(ACCEPT, "application/json")
            .header(AUTHORIZATION, authorization)
            .build()
            .map_err(|e| FetchError::Format(format!("invalid Tumblr request: {e}")))
    }
}

#[async_trait]
impl PostApi for TumblrClient {
    async fn fetch_page(
        &self,
        blog: &str,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<Post>, FetchError> {
        let request = self.build_request(blog, offset, limit)?;
        debug!(path = request.url().path(), offset, limit, "fetching page");

        let res = self
            .http
            .execute(request)
            .await
            .map_err(FetchError::Transport)?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            if status == StatusCode::TOO_MANY_REQUESTS {
                warn!("Rate limited by Tumblr: {}", body);
            }
            return Err(FetchError::Status { status, body });
        }

        let body = res.text().await.map_err(FetchError::Transport)?;
        parse_page(&body)
    }
}

/// Bare names live under `tumblr.com`; anything dotted is taken as a full hostname.
fn blog_identifier(blog: &str) -> String {
    if blog.contains('.') {
        blog.to_string()
    } else {
        format!("{blog}.tumblr.com")
    }
}

pub fn parse_page(body: &str) -> Result<Vec<Post>, FetchError> {
    let envelope: PostsEnvelope = serde_json::from_str(body)
        .map_err(|e| FetchError::Format(format!("invalid posts envelope: {e}")))?;
    if envelope.meta.status != 200 {
        return Err(FetchError::Format(format!(
            "meta status {} ({})",
            envelope.meta.status, envelope.meta.msg
        )));
    }
    envelope
        .response
        .posts
        .into_iter()
        .map(post_from_value)
        .collect()
}

pub fn post_from_value(value: Value) -> Result<Post, FetchError> {
    let id = value
        .get("id")
        .and_then(Value::as_i64)
        .or_else(|| {
            value
                .get("id_string")
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok())
        })
        .ok_or_else(|| FetchError::Format("post without id".into()))?;
    let field = |name: &str| {
        value
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| FetchError::Format(format!("post {id} without {name}")))
    };
    let post_type = field("type")?;
    let blog_name = field("blog_name")?;
    let timestamp = value
        .get("timestamp")
        .and_then(Value::as_i64)
        .ok_or_else(|| FetchError::Format(format!("post {id} without timestamp")))?;

    Ok(Post {
        id,
        post_type,
        timestamp,
        blog_name,
        content: value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> TumblrClient {
        let creds = Credentials::parse("key-abc\nsecret-def\ntok\nts").unwrap();
        TumblrClient::new(creds, Url::parse(TUMBLR_API_BASE).unwrap()).unwrap()
    }

    #[test]
    fn build_request_targets_posts_endpoint() {
        let req = client().build_request("staff", 40, 20).unwrap();
        let url = req.url();
        assert_eq!(url.host_str(), Some("api.tumblr.com"));
        assert_eq!(url.path(), "/v2/blog/staff.tumblr.com/posts");
        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(query.contains(&("api_key".into(), "key-abc".into())));
        assert!(query.contains(&("offset".into(), "40".into())));
        assert!(query.contains(&("limit".into(), "20".into())));
    }

    #[test]
    fn build_request_is_oauth_signed() {
        let req = client()
            .build_request_at("staff", 40, 20, "nonce-1", 1_700_000_000)
            .unwrap();
        let auth = req.headers()[AUTHORIZATION].to_str().unwrap();
        assert!(auth.starts_with("OAuth "));
        assert!(auth.contains(r#"oauth_consumer_key="key-abc""#));
        assert!(auth.contains(r#"oauth_token="tok""#));
        assert!(auth.contains(r#"oauth_signature_method="HMAC-SHA1""#));
        assert!(auth.contains(r#"oauth_nonce="nonce-1""#));
        assert!(auth.contains(r#"oauth_timestamp="1700000000""#));
        assert!(auth.contains(r#"oauth_signature="uUJxQbm6TUbk%2FBXqwwl4KsS5lR8%3D""#));
        assert!(!auth.contains("secret-def"));
    }

    #[test]
    fn each_request_gets_a_fresh_nonce() {
        let client = client();
        let nonce = |req: reqwest::Request| {
            let auth = req.headers()[AUTHORIZATION].to_str().unwrap().to_string();
            auth.split(", ")
                .find(|f| f.starts_with("oauth_nonce="))
                .map(str::to_string)
                .unwrap()
        };
        let a = nonce(client.build_request("staff", 0, 20).unwrap());
        let b = nonce(client.build_request("staff", 0, 20).unwrap());
        assert_ne!(a, b);
    }

    #[test]
    fn custom_domain_is_used_verbatim() {
        let req = client().build_request("blog.example.com", 0, 20).unwrap();
        assert_eq!(req.url().path(), "/v2/blog/blog.example.com/posts");
    }

    #[test]
    fn debug_hides_credentials() {
        let shown = format!("{:?}", client());
        assert!(!shown.contains("key-abc"));
        assert!(!shown.contains("secret-def"));
    }

    #[test]
    fn parse_page_keeps_payload_verbatim() {
        let body = json!({
            "meta": {"status": 200, "msg": "OK"},
            "response": {
                "posts": [
                    {"id": 11, "type": "text", "timestamp": 1700000000, "blog_name": "staff", "body": "<p>hi</p>"},
                    {"id_string": "10", "type": "photo", "timestamp": 1600000000, "blog_name": "staff"}
                ]
            }
        })
        .to_string();
        let posts = parse_page(&body).unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].id, 11);
        assert_eq!(posts[0].post_type, "text");
        assert_eq!(posts[0].content["body"], "<p>hi</p>");
        assert_eq!(posts[1].id, 10);
        assert_eq!(posts[1].timestamp, 1_600_000_000);
    }

    #[test]
    fn parse_page_rejects_malformed_bodies() {
        assert!(matches!(parse_page("<html>"), Err(FetchError::Format(_))));
        let missing_type = json!({
            "meta": {"status": 200, "msg": "OK"},
            "response": {"posts": [{"id": 1, "timestamp": 1, "blog_name": "b"}]}
        })
        .to_string();
        assert!(matches!(parse_page(&missing_type), Err(FetchError::Format(_))));
    }

    #[test]
    fn transient_classification() {
        let status = |code: u16| FetchError::Status {
            status: StatusCode::from_u16(code).unwrap(),
            body: String::new(),
        };
        assert!(status(429).is_transient());
        assert!(status(503).is_transient());
        assert!(!status(404).is_transient());
        assert!(!status(401).is_transient());
        assert!(!FetchError::Format("x".into()).is_transient());
    }

    #[test]
    fn unusable_base_url_is_permanent() {
        // The first cannot be joined onto; the second joins but has no host to send to.
        for base in ["mailto:nobody@example.com", "unix:/run/"] {
            let creds = Credentials::parse("key-abc\nsecret-def\ntok\nts").unwrap();
            let client = TumblrClient::new(creds, Url::parse(base).unwrap()).unwrap();
            let err = client.build_request("staff", 0, 20).unwrap_err();
            assert!(matches!(err, FetchError::Format(_)), "{base}: {err:?}");
            assert!(!err.is_transient());
        }
    }
}
