//! Imageboard adapter
//!
//! Talks to a 4chan-style JSON API: `/{board}/catalog.json` enumerates every
//! thread currently visible on the board (a non-chronological catalog, so
//! callers should pair this adapter with the snapshot detection strategy),
//! and `/{board}/thread/{no}.json` returns the full thread. The first post
//! in a thread is the item itself, the rest are its children.

use crate::config::ChanConfig;
use crate::source::{
    classify_status, classify_transport_error, epoch_to_utc, ChildRecord, FetchFailure,
    ItemDetail, ListingEntry, ListingSnapshot, SourceAdapter,
};
use crate::BoardwatchError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// Wire shape of one catalog page
#[derive(Debug, Deserialize)]
struct CatalogPage {
    threads: Vec<CatalogThread>,
}

/// Wire shape of one thread preview in the catalog
#[derive(Debug, Deserialize)]
struct CatalogThread {
    no: i64,
    time: i64,
}

/// Wire shape of a thread detail response
#[derive(Debug, Deserialize)]
struct ThreadResponse {
    #[serde(default)]
    posts: Vec<Value>,
}

/// Adapter for 4chan-style imageboard APIs
pub struct ChanAdapter {
    client: Client,
    endpoint: Url,
}

impl ChanAdapter {
    /// Creates a new imageboard adapter from configuration
    pub fn new(config: &ChanConfig) -> Result<Self, BoardwatchError> {
        let endpoint = Url::parse(&config.endpoint)?;
        let client = Client::builder()
            .user_agent(concat!("boardwatch/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self { client, endpoint })
    }

    fn board_url(&self, board: &str, tail: &str) -> Result<Url, FetchFailure> {
        self.endpoint
            .join(&format!("{}/{}", board, tail))
            .map_err(|e| FetchFailure::Malformed(format!("bad board URL: {}", e)))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, FetchFailure> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }

        response.json::<T>().await.map_err(|e| {
            if e.is_decode() {
                FetchFailure::Malformed(e.to_string())
            } else {
                classify_transport_error(&e)
            }
        })
    }
}

#[async_trait]
impl SourceAdapter for ChanAdapter {
    async fn fetch_listing(&self, source: &str) -> Result<ListingSnapshot, FetchFailure> {
        let url = self.board_url(source, "catalog.json")?;
        let catalog: Vec<CatalogPage> = self.get_json(url).await?;

        let mut entries = Vec::new();
        for page in catalog {
            for thread in page.threads {
                entries.push(ListingEntry {
                    id: thread.no,
                    created_at: epoch_to_utc(thread.time).ok(),
                });
            }
        }

        tracing::debug!(board = source, threads = entries.len(), "fetched catalog");
        Ok(ListingSnapshot { entries })
    }

    async fn fetch_item(&self, source: &str, item_id: i64) -> Result<ItemDetail, FetchFailure> {
        let url = self.board_url(source, &format!("thread/{}.json", item_id))?;
        let thread: ThreadResponse = self.get_json(url).await?;

        let mut posts = thread.posts.into_iter();
        let op = posts.next().ok_or_else(|| {
            FetchFailure::Malformed(format!("thread {} has no posts", item_id))
        })?;

        let created_at = epoch_to_utc(int_field(&op, "time")?)?;

        let mut children = Vec::new();
        for post in posts {
            children.push(parse_reply(&post)?);
        }

        Ok(ItemDetail {
            item_id,
            created_at,
            payload: op,
            children,
        })
    }
}

/// Extracts a required integer field from a post object
fn int_field(post: &Value, key: &str) -> Result<i64, FetchFailure> {
    post.get(key)
        .and_then(Value::as_i64)
        .ok_or_else(|| FetchFailure::Malformed(format!("post missing '{}'", key)))
}

/// Converts a reply post into a child record
///
/// Imageboard replies carry no score; it is recorded as zero.
fn parse_reply(post: &Value) -> Result<ChildRecord, FetchFailure> {
    let child_id = int_field(post, "no")?;
    let created_at = epoch_to_utc(int_field(post, "time")?)?;
    let author = post
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("Anonymous")
        .to_string();
    let body = post
        .get("com")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(ChildRecord {
        child_id,
        author,
        created_at,
        score: 0,
        body,
        payload: post.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_reply() {
        let post = json!({
            "no": 7891011,
            "time": 1700000000,
            "name": "Anonymous",
            "com": "Sample reply content"
        });

        let child = parse_reply(&post).unwrap();
        assert_eq!(child.child_id, 7891011);
        assert_eq!(child.author, "Anonymous");
        assert_eq!(child.body, "Sample reply content");
        assert_eq!(child.score, 0);
        assert_eq!(child.created_at.timestamp(), 1700000000);
    }

    #[test]
    fn test_parse_reply_missing_id() {
        let post = json!({ "time": 1700000000 });
        assert!(matches!(
            parse_reply(&post),
            Err(FetchFailure::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_reply_defaults() {
        let post = json!({ "no": 1, "time": 1700000000 });
        let child = parse_reply(&post).unwrap();
        assert_eq!(child.author, "Anonymous");
        assert_eq!(child.body, "");
    }
}
