use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize, Debug)]
pub struct Meta {
    pub status: u16,
    pub msg: String,
}

#[derive(Deserialize, Debug)]
pub struct PostsResponse {
    pub posts: Vec<Value>,
}

/// Envelope returned by `GET /v2/blog/{blog}/posts`.
#[derive(Deserialize, Debug)]
pub struct PostsEnvelope {
    pub meta: Meta,
    pub response: PostsResponse,
}
