//! Reddit adapter
//!
//! Talks to the Reddit OAuth API: `/r/{subreddit}/new.json` lists the most
//! recent submissions (reverse-chronological, so callers should pair this
//! adapter with the high-water-mark detection strategy), and
//! `/comments/{id}.json` returns one submission plus its comment tree.
//! Tokens come from the password-grant flow; an expired token surfaces as
//! [`FetchFailure::AuthExpired`] and is refreshed via `reauthenticate`.

use crate::config::RedditConfig;
use crate::source::{
    classify_status, classify_transport_error, ChildRecord, FetchFailure, ItemDetail,
    ListingEntry, ListingSnapshot, SourceAdapter,
};
use crate::BoardwatchError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;
use url::Url;

/// Adapter for the Reddit OAuth API
pub struct RedditAdapter {
    client: Client,
    endpoint: Url,
    auth_endpoint: Url,
    client_id: String,
    client_secret: String,
    username: String,
    password: String,
    token: Mutex<Option<String>>,
}

impl RedditAdapter {
    /// Creates a new Reddit adapter from configuration
    ///
    /// No token is fetched up front; the first request authenticates lazily.
    pub fn new(config: &RedditConfig) -> Result<Self, BoardwatchError> {
        let endpoint = Url::parse(&config.endpoint)?;
        let auth_endpoint = Url::parse(&config.auth_endpoint)?;
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            endpoint,
            auth_endpoint,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            token: Mutex::new(None),
        })
    }

    /// Returns the current token, authenticating first if there is none
    async fn token(&self) -> Result<String, FetchFailure> {
        {
            let token = self.token.lock().await;
            if let Some(token) = token.as_ref() {
                return Ok(token.clone());
            }
        }

        self.reauthenticate().await?;
        let token = self.token.lock().await;
        token.clone().ok_or(FetchFailure::AuthExpired)
    }

    async fn get_json(&self, url: Url) -> Result<Value, FetchFailure> {
        let token = self.token().await?;
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }

        response.json::<Value>().await.map_err(|e| {
            if e.is_decode() {
                FetchFailure::Malformed(e.to_string())
            } else {
                classify_transport_error(&e)
            }
        })
    }
}

#[async_trait]
impl SourceAdapter for RedditAdapter {
    async fn fetch_listing(&self, source: &str) -> Result<ListingSnapshot, FetchFailure> {
        let url = self
            .endpoint
            .join(&format!("r/{}/new.json?limit=100", source))
            .map_err(|e| FetchFailure::Malformed(format!("bad listing URL: {}", e)))?;

        let body = self.get_json(url).await?;
        let posts = listing_children(&body)?;

        let mut entries = Vec::new();
        for post in posts {
            let data = post
                .get("data")
                .ok_or_else(|| FetchFailure::Malformed("listing child missing data".into()))?;
            entries.push(ListingEntry {
                id: base36_field(data, "id")?,
                created_at: utc_field(data, "created_utc").ok(),
            });
        }

        tracing::debug!(subreddit = source, posts = entries.len(), "fetched listing");
        Ok(ListingSnapshot { entries })
    }

    async fn fetch_item(&self, source: &str, item_id: i64) -> Result<ItemDetail, FetchFailure> {
        let _ = source; // submission ids are globally unique
        let url = self
            .endpoint
            .join(&format!("comments/{}.json", to_base36(item_id)))
            .map_err(|e| FetchFailure::Malformed(format!("bad detail URL: {}", e)))?;

        let body = self.get_json(url).await?;

        // The response is a two-element array: the submission listing
        // followed by the comment listing.
        let listings = body
            .as_array()
            .filter(|a| a.len() >= 2)
            .ok_or_else(|| FetchFailure::Malformed("detail response is not a pair".into()))?;

        let submission = listing_children(&listings[0])?
            .first()
            .and_then(|c| c.get("data"))
            .cloned()
            .ok_or_else(|| FetchFailure::Malformed("detail has no submission".into()))?;

        let created_at = utc_field(&submission, "created_utc")?;

        let mut children = Vec::new();
        for comment in listing_children(&listings[1])? {
            // Skip "more" stubs and anything else that is not a comment
            if comment.get("kind").and_then(Value::as_str) != Some("t1") {
                continue;
            }
            let data = comment
                .get("data")
                .ok_or_else(|| FetchFailure::Malformed("comment missing data".into()))?;
            children.push(parse_comment(data)?);
        }

        Ok(ItemDetail {
            item_id,
            created_at,
            payload: submission,
            children,
        })
    }

    /// Runs the password-grant token flow and stores the fresh token
    async fn reauthenticate(&self) -> Result<(), FetchFailure> {
        tracing::info!("authenticating with reddit");

        let params = [
            ("grant_type", "password"),
            ("username", self.username.as_str()),
            ("password", self.password.as_str()),
        ];

        let response = self
            .client
            .post(self.auth_endpoint.clone())
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&params)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| FetchFailure::Malformed(e.to_string()))?;

        let access_token = body
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| FetchFailure::Malformed("token response missing access_token".into()))?;

        *self.token.lock().await = Some(access_token.to_string());
        Ok(())
    }
}

/// Extracts the `data.children` array from a reddit listing envelope
fn listing_children(listing: &Value) -> Result<&Vec<Value>, FetchFailure> {
    listing
        .get("data")
        .and_then(|d| d.get("children"))
        .and_then(Value::as_array)
        .ok_or_else(|| FetchFailure::Malformed("listing missing data.children".into()))
}

/// Converts a comment's data object into a child record
fn parse_comment(data: &Value) -> Result<ChildRecord, FetchFailure> {
    Ok(ChildRecord {
        child_id: base36_field(data, "id")?,
        author: data
            .get("author")
            .and_then(Value::as_str)
            .unwrap_or("[unknown]")
            .to_string(),
        created_at: utc_field(data, "created_utc")?,
        score: data.get("score").and_then(Value::as_i64).unwrap_or(0),
        body: data
            .get("body")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        payload: data.clone(),
    })
}

/// Reads a base-36 id field as an i64
fn base36_field(data: &Value, key: &str) -> Result<i64, FetchFailure> {
    let raw = data
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| FetchFailure::Malformed(format!("missing '{}'", key)))?;

    i64::from_str_radix(raw, 36)
        .map_err(|_| FetchFailure::Malformed(format!("'{}' is not a base-36 id", raw)))
}

/// Reads an epoch-seconds field (reddit sends floats) as a UTC datetime
fn utc_field(data: &Value, key: &str) -> Result<DateTime<Utc>, FetchFailure> {
    let secs = data
        .get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| FetchFailure::Malformed(format!("missing '{}'", key)))?;

    DateTime::<Utc>::from_timestamp(secs as i64, 0)
        .ok_or_else(|| FetchFailure::Malformed(format!("timestamp {} out of range", secs)))
}

/// Encodes an i64 as a lowercase base-36 string
fn to_base36(mut value: i64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    if value == 0 {
        return "0".to_string();
    }

    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("base-36 digits are ASCII")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_base36_roundtrip() {
        for id in [0, 1, 35, 36, 1_295, 46_655, 9_999_999_999] {
            let encoded = to_base36(id);
            assert_eq!(i64::from_str_radix(&encoded, 36).unwrap(), id);
        }
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn test_parse_comment() {
        let data = json!({
            "id": "k1abc",
            "author": "some_user",
            "created_utc": 1700000000.0,
            "score": 42,
            "body": "a comment"
        });

        let child = parse_comment(&data).unwrap();
        assert_eq!(child.child_id, i64::from_str_radix("k1abc", 36).unwrap());
        assert_eq!(child.author, "some_user");
        assert_eq!(child.score, 42);
        assert_eq!(child.body, "a comment");
        assert_eq!(child.created_at.timestamp(), 1700000000);
    }

    #[test]
    fn test_parse_comment_missing_created() {
        let data = json!({ "id": "abc", "body": "x" });
        assert!(matches!(
            parse_comment(&data),
            Err(FetchFailure::Malformed(_))
        ));
    }
}
