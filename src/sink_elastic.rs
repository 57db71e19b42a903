//! Elasticsearch index sink.
//!
//! Talks to the Elasticsearch REST API with `reqwest`:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | upsert | `PUT /{index}/_doc/{id}` |
//! | delete | `DELETE /{index}/_doc/{id}` (404 counts as deleted) |
//! | enumerate | `POST /{index}/_search?scroll=…`, then `POST /_search/scroll`, ids only |
//! | create index | `PUT /{index}` with the document mapping |
//!
//! Document ids are raw computer names, percent-encoded into the path.
//!
//! Enumeration walks a scroll context rather than `from`/`size`, so it is not
//! bounded by `index.max_result_window`. Offset 0 opens a fresh scroll and
//! each later call must continue at the offset the previous page ended on,
//! which is how [`collect_keys`](inventory_sync_core::sink::collect_keys)
//! calls it. The scroll is cleared once a short page ends the walk.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use inventory_sync_core::models::MergedRecord;
use inventory_sync_core::sink::IndexSink;
use reqwest::{StatusCode, Url};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::{secret_from_env, Config, IndexConfig};

pub struct ElasticsearchSink {
    client: reqwest::Client,
    base: Url,
    index: String,
    auth: Option<(String, String)>,
    scroll: Mutex<Option<ScrollCursor>>,
}

/// How long the cluster keeps a scroll context between pages.
const SCROLL_KEEP_ALIVE: &str = "2m";

/// Open scroll context and the offset its next page starts at.
#[derive(Debug)]
struct ScrollCursor {
    scroll_id: String,
    next_offset: usize,
}

impl ElasticsearchSink {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let base = Url::parse(&config.url)
            .with_context(|| format!("Invalid index.url: '{}'", config.url))?;

        let auth = match &config.username {
            Some(user) => Some((user.clone(), secret_from_env(&config.password_env)?)),
            None => None,
        };

        Ok(Self {
            client,
            base,
            index: config.index.clone(),
            auth,
            scroll: Mutex::new(None),
        })
    }

    pub fn index_name(&self) -> &str {
        &self.index
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.auth {
            Some((user, pass)) => builder.basic_auth(user, Some(pass)),
            None => builder,
        }
    }

    fn index_url(&self, suffix: &[&str]) -> Result<Url> {
        let mut segments = vec![self.index.as_str()];
        segments.extend_from_slice(suffix);
        join_segments(&self.base, &segments)
    }

    /// Cluster name and version, for health listings.
    pub async fn ping(&self) -> Result<String> {
        let resp = self
            .request(reqwest::Method::GET, self.base.clone())
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.base))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Elasticsearch error {}: {}", status, body);
        }
        let info: Value = resp.json().await?;
        Ok(format!(
            "{} {}",
            info["cluster_name"].as_str().unwrap_or("unknown"),
            info["version"]["number"].as_str().unwrap_or("?")
        ))
    }

    /// Create the index with `body` as settings and mappings.
    ///
    /// Returns `false` when the index already exists.
    pub async fn create_index(&self, body: &Value) -> Result<bool> {
        let url = self.index_url(&[])?;
        let resp = self
            .request(reqwest::Method::PUT, url)
            .json(body)
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(true);
        }
        let text = resp.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST && text.contains("resource_already_exists_exception") {
            return Ok(false);
        }
        bail!("Failed to create index '{}': {} {}", self.index, status, text)
    }

    /// First scroll page. `None` when the index does not exist.
    async fn open_scroll(&self, page_size: usize) -> Result<Option<Value>> {
        let mut url = self.index_url(&["_search"])?;
        url.query_pairs_mut().append_pair("scroll", SCROLL_KEEP_ALIVE);
        let body = json!({
            "size": page_size,
            "_source": false,
            "sort": ["_doc"],
            "query": { "match_all": {} }
        });
        let resp = self
            .request(reqwest::Method::POST, url)
            .json(&body)
            .send()
            .await
            .with_context(|| "Search request failed")?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            debug!(index = %self.index, "Index does not exist yet, no keys");
            return Ok(None);
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("Search on '{}' failed: {} {}", self.index, status, text);
        }
        Ok(Some(resp.json().await?))
    }

    async fn continue_scroll(&self, scroll_id: &str) -> Result<Value> {
        let url = join_segments(&self.base, &["_search", "scroll"])?;
        let body = json!({ "scroll": SCROLL_KEEP_ALIVE, "scroll_id": scroll_id });
        let resp = self
            .request(reqwest::Method::POST, url)
            .json(&body)
            .send()
            .await
            .with_context(|| "Scroll request failed")?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("Scroll on '{}' failed: {} {}", self.index, status, text);
        }
        Ok(resp.json().await?)
    }

    /// Release a scroll context. Failures only cost the keep-alive.
    async fn clear_scroll(&self, scroll_id: &str) {
        let url = match join_segments(&self.base, &["_search", "scroll"]) {
            Ok(url) => url,
            Err(_) => return,
        };
        let result = self
            .request(reqwest::Method::DELETE, url)
            .json(&json!({ "scroll_id": scroll_id }))
            .send()
            .await;
        if let Err(e) = result {
            debug!(error = %e, "Failed to clear scroll");
        }
    }
}

#[async_trait]
impl IndexSink for ElasticsearchSink {
    async fn upsert(&self, id: &str, doc: &MergedRecord) -> Result<()> {
        let url = self.index_url(&["_doc", id])?;
        let resp = self
            .request(reqwest::Method::PUT, url)
            .json(doc)
            .send()
            .await
            .with_context(|| format!("Upsert request failed for '{}'", id))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Upsert of '{}' rejected: {} {}", id, status, body);
        }
        Ok(())
    }

    async fn enumerate_keys(&self, offset: usize, page_size: usize) -> Result<Vec<String>> {
        let mut cursor = self.scroll.lock().await;

        let json = if offset == 0 {
            if let Some(stale) = cursor.take() {
                self.clear_scroll(&stale.scroll_id).await;
            }
            match self.open_scroll(page_size).await? {
                Some(json) => json,
                None => return Ok(Vec::new()),
            }
        } else {
            let current = cursor
                .take()
                .ok_or_else(|| anyhow!("No open scroll to continue at offset {}", offset))?;
            if current.next_offset != offset {
                self.clear_scroll(&current.scroll_id).await;
                bail!(
                    "Out-of-order enumeration on '{}': expected offset {}, got {}",
                    self.index,
                    current.next_offset,
                    offset
                );
            }
            self.continue_scroll(&current.scroll_id).await?
        };

        let ids = parse_hit_ids(&json)?;
        let scroll_id = json
            .get("_scroll_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        match scroll_id {
            Some(scroll_id) if ids.len() >= page_size => {
                *cursor = Some(ScrollCursor {
                    scroll_id,
                    next_offset: offset + ids.len(),
                });
            }
            Some(scroll_id) => self.clear_scroll(&scroll_id).await,
            None if ids.len() >= page_size => {
                bail!("Search on '{}' returned a full page without _scroll_id", self.index)
            }
            None => {}
        }
        Ok(ids)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let url = self.index_url(&["_doc", id])?;
        let resp = self
            .request(reqwest::Method::DELETE, url)
            .send()
            .await
            .with_context(|| format!("Delete request failed for '{}'", id))?;
        let status = resp.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        bail!("Delete of '{}' rejected: {} {}", id, status, body)
    }
}

/// `invsync delete`: remove one document by its raw computer name.
pub async fn run_delete(config: &Config, name: &str) -> Result<()> {
    let sink = ElasticsearchSink::new(config.require_index()?)?;
    sink.delete(name).await?;
    println!("Deleted '{}' from {}", name, sink.index_name());
    Ok(())
}

/// Append path segments to `base`, percent-encoding each one.
pub fn join_segments(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| anyhow!("index.url cannot be used as a base URL: {}", base))?;
        path.pop_if_empty();
        for segment in segments {
            path.push(segment);
        }
    }
    Ok(url)
}

/// Extract `hits.hits[]._id` from a search response.
pub fn parse_hit_ids(json: &Value) -> Result<Vec<String>> {
    let hits = json
        .get("hits")
        .and_then(|h| h.get("hits"))
        .and_then(|h| h.as_array())
        .ok_or_else(|| anyhow!("Invalid search response: missing hits.hits"))?;

    hits.iter()
        .map(|hit| {
            hit.get("_id")
                .and_then(|id| id.as_str())
                .map(str::to_string)
                .ok_or_else(|| anyhow!("Invalid search response: hit without _id"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_url_encodes_id() {
        let base = Url::parse("http://localhost:9200").unwrap();
        let url = join_segments(&base, &["computers", "_doc", "PC 01/a"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:9200/computers/_doc/PC%2001%2Fa");
    }

    #[test]
    fn test_document_url_with_base_path() {
        let base = Url::parse("https://es.internal/proxy/").unwrap();
        let url = join_segments(&base, &["computers", "_search"]).unwrap();
        assert_eq!(url.as_str(), "https://es.internal/proxy/computers/_search");
    }

    #[test]
    fn test_parse_hit_ids() {
        let json = json!({
            "hits": {
                "total": {"value": 2},
                "hits": [
                    {"_index": "computers", "_id": "PC01"},
                    {"_index": "computers", "_id": "pc01 "}
                ]
            }
        });
        assert_eq!(parse_hit_ids(&json).unwrap(), vec!["PC01", "pc01 "]);
    }

    #[test]
    fn test_parse_hit_ids_empty() {
        let json = json!({"hits": {"hits": []}});
        assert!(parse_hit_ids(&json).unwrap().is_empty());
    }

    #[test]
    fn test_parse_hit_ids_malformed() {
        assert!(parse_hit_ids(&json!({"error": "boom"})).is_err());
        assert!(parse_hit_ids(&json!({"hits": {"hits": [{"_index": "x"}]}})).is_err());
    }

    #[test]
    fn test_new_without_auth() {
        let cfg = IndexConfig {
            url: "http://localhost:9200".to_string(),
            index: "computers".to_string(),
            username: None,
            password_env: "INVSYNC_TEST_UNSET_VAR".to_string(),
            timeout_secs: 5,
        };
        let sink = ElasticsearchSink::new(&cfg).unwrap();
        assert_eq!(sink.index_name(), "computers");
        assert!(sink.auth.is_none());
    }

    #[test]
    fn test_new_with_auth_requires_env() {
        let cfg = IndexConfig {
            url: "http://localhost:9200".to_string(),
            index: "computers".to_string(),
            username: Some("elastic".to_string()),
            password_env: "INVSYNC_TEST_UNSET_VAR".to_string(),
            timeout_secs: 5,
        };
        assert!(ElasticsearchSink::new(&cfg).is_err());
    }
}
