//! Feed paging: the fetch collaborator boundary and its HTTP adapter.
//!
//! The engine only sees [`PageFetcher`]: give it the opaque cursor it stored,
//! get back either a batch of posts or end-of-content. Fetches must be
//! idempotent for a given cursor so the retry executor can safely re-invoke
//! them.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::FetchFailure;
use crate::target::ProfileTarget;

/// One extracted post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub author: String,
    #[serde(default)]
    pub published_at: Option<String>,
    pub text: String,
}

/// A page worth of results, plus where to go next.
#[derive(Debug, Clone)]
pub struct PageBatch {
    /// Posts extracted from this page, in feed order.
    pub posts: Vec<Post>,
    /// Entries present on the page that could not be extracted.
    pub failed_items: u32,
    /// Cursor for the following page. Opaque to the engine.
    pub next_cursor: Value,
    /// Human-readable marker for this page, used in failure annotations.
    pub marker: String,
    /// Feed-reported total post count, when the feed exposes one.
    pub total_estimate: Option<u64>,
}

/// Result of asking the feed for the next page.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Batch(PageBatch),
    EndOfContent,
}

/// Fetch collaborator contract. Implementations must be idempotent with
/// respect to the cursor: the same cursor always addresses the same page.
pub trait PageFetcher {
    async fn fetch_next(&self, cursor: &Value) -> Result<FetchOutcome, FetchFailure>;
}

/// Human-readable marker for the page a cursor addresses.
pub fn cursor_marker(cursor: &Value) -> String {
    match cursor.get("offset").and_then(Value::as_u64) {
        Some(offset) => format!("offset {offset}"),
        None => "start".to_string(),
    }
}

/// Offset encoded in a cursor; zero for the initial (null) cursor.
fn cursor_offset(cursor: &Value) -> u64 {
    cursor.get("offset").and_then(Value::as_u64).unwrap_or(0)
}

/// Wire format of one feed page.
#[derive(Debug, Deserialize)]
struct FeedPage {
    #[serde(default)]
    posts: Vec<Value>,
    #[serde(default)]
    next_offset: Option<u64>,
    #[serde(default)]
    total: Option<u64>,
}

/// HTTP adapter over a paged JSON profile feed.
pub struct FeedClient {
    client: Client,
    base_url: String,
    handle: String,
}

impl FeedClient {
    /// Create a client for one profile. `base_url` has no trailing slash.
    pub fn for_profile(base_url: &str, target: &ProfileTarget) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            handle: target.handle.clone(),
        }
    }

    fn page_url(&self, offset: u64) -> String {
        format!("{}/in/{}/posts?offset={}", self.base_url, self.handle, offset)
    }
}

impl PageFetcher for FeedClient {
    async fn fetch_next(&self, cursor: &Value) -> Result<FetchOutcome, FetchFailure> {
        let offset = cursor_offset(cursor);
        let marker = cursor_marker(cursor);

        let response = self
            .client
            .get(self.page_url(offset))
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, &response.text().await.unwrap_or_default()));
        }

        let page = response
            .json::<FeedPage>()
            .await
            // A non-JSON body usually means an interstitial block page.
            .map_err(|e| FetchFailure::Transient(format!("unreadable feed response: {e}")))?;

        if page.posts.is_empty() {
            return Ok(FetchOutcome::EndOfContent);
        }

        // Lenient per-item decoding: keep what parses, count what doesn't.
        let mut posts = Vec::with_capacity(page.posts.len());
        let mut failed_items = 0u32;
        for entry in page.posts {
            match serde_json::from_value::<Post>(entry) {
                Ok(post) => posts.push(post),
                Err(_) => failed_items += 1,
            }
        }

        let next_offset = page
            .next_offset
            .unwrap_or(offset + posts.len() as u64 + failed_items as u64);

        Ok(FetchOutcome::Batch(PageBatch {
            posts,
            failed_items,
            next_cursor: json!({ "offset": next_offset }),
            marker,
            total_estimate: page.total,
        }))
    }
}

fn classify_transport_error(err: reqwest::Error) -> FetchFailure {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        FetchFailure::Transient(format!("network error: {err}"))
    } else {
        FetchFailure::Transient(err.to_string())
    }
}

fn classify_status(status: reqwest::StatusCode, body: &str) -> FetchFailure {
    use reqwest::StatusCode;
    match status {
        StatusCode::TOO_MANY_REQUESTS => FetchFailure::Transient("rate limited by feed".into()),
        StatusCode::FORBIDDEN => {
            FetchFailure::Transient("access temporarily blocked by feed".into())
        }
        StatusCode::NOT_FOUND => FetchFailure::Fatal("profile not found".into()),
        s if s.is_server_error() => {
            FetchFailure::Transient(format!("feed server error {}", s.as_u16()))
        }
        s => FetchFailure::Fatal(format!(
            "feed rejected request ({}): {}",
            s.as_u16(),
            body.chars().take(120).collect::<String>()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn target() -> ProfileTarget {
        ProfileTarget::parse("https://feed.garimpo.dev/in/maria-silva").unwrap()
    }

    fn post_json(id: &str) -> Value {
        json!({ "id": id, "author": "Maria Silva", "text": format!("post {id}") })
    }

    #[tokio::test]
    async fn fetches_first_page_and_advances_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/in/maria-silva/posts"))
            .and(query_param("offset", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "posts": [post_json("a"), post_json("b")],
                "next_offset": 2,
                "total": 10,
            })))
            .mount(&server)
            .await;

        let client = FeedClient::for_profile(&server.uri(), &target());
        let outcome = client.fetch_next(&Value::Null).await.unwrap();

        let FetchOutcome::Batch(batch) = outcome else {
            panic!("expected a batch");
        };
        assert_eq!(batch.posts.len(), 2);
        assert_eq!(batch.failed_items, 0);
        assert_eq!(batch.next_cursor, json!({ "offset": 2 }));
        assert_eq!(batch.marker, "start");
        assert_eq!(batch.total_estimate, Some(10));
    }

    #[tokio::test]
    async fn empty_page_is_end_of_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/in/maria-silva/posts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "posts": [] })))
            .mount(&server)
            .await;

        let client = FeedClient::for_profile(&server.uri(), &target());
        let outcome = client.fetch_next(&json!({ "offset": 30 })).await.unwrap();
        assert!(matches!(outcome, FetchOutcome::EndOfContent));
    }

    #[tokio::test]
    async fn unparseable_entries_are_counted_not_dropped_silently() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/in/maria-silva/posts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "posts": [post_json("a"), { "id": "broken" }],
            })))
            .mount(&server)
            .await;

        let client = FeedClient::for_profile(&server.uri(), &target());
        let FetchOutcome::Batch(batch) = client.fetch_next(&Value::Null).await.unwrap() else {
            panic!("expected a batch");
        };
        assert_eq!(batch.posts.len(), 1);
        assert_eq!(batch.failed_items, 1);
        // Cursor still advances past everything the page contained.
        assert_eq!(batch.next_cursor, json!({ "offset": 2 }));
    }

    #[tokio::test]
    async fn rate_limit_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client = FeedClient::for_profile(&server.uri(), &target());
        let err = client.fetch_next(&Value::Null).await.unwrap_err();
        assert!(matches!(err, FetchFailure::Transient(_)));
    }

    #[tokio::test]
    async fn missing_profile_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = FeedClient::for_profile(&server.uri(), &target());
        let err = client.fetch_next(&Value::Null).await.unwrap_err();
        assert_eq!(err, FetchFailure::Fatal("profile not found".into()));
    }

    #[tokio::test]
    async fn html_block_page_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>checking your browser</html>"))
            .mount(&server)
            .await;

        let client = FeedClient::for_profile(&server.uri(), &target());
        let err = client.fetch_next(&Value::Null).await.unwrap_err();
        assert!(matches!(err, FetchFailure::Transient(_)));
    }

    #[test]
    fn cursor_marker_reads_offset() {
        assert_eq!(cursor_marker(&Value::Null), "start");
        assert_eq!(cursor_marker(&json!({ "offset": 42 })), "offset 42");
    }
}
