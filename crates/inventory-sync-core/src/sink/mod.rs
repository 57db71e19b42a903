//! Index sink abstraction.
//!
//! The sync engine writes merged documents through [`IndexSink`] and never
//! talks to the search cluster directly. Documents are addressed by the raw
//! computer name, so two spellings of one machine are two documents.
//!
//! Implementations must be `Send + Sync`; the engine shares one sink across
//! concurrent batch workers behind an `Arc`.

pub mod memory;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::MergedRecord;

/// Destination for merged computer documents.
#[async_trait]
pub trait IndexSink: Send + Sync {
    /// Create or replace the document stored under `id`.
    async fn upsert(&self, id: &str, doc: &MergedRecord) -> Result<()>;

    /// One page of document ids, starting at `offset`.
    ///
    /// A page shorter than `page_size` marks the end. A missing index is an
    /// empty result, not an error. Callers walk pages in order starting at
    /// offset 0; an implementation may hold a cursor between calls and
    /// reject any other order.
    async fn enumerate_keys(&self, offset: usize, page_size: usize) -> Result<Vec<String>>;

    /// Remove the document stored under `id`. Removing a missing id succeeds.
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Page through [`IndexSink::enumerate_keys`] until a short page.
pub async fn collect_keys(sink: &dyn IndexSink, page_size: usize) -> Result<Vec<String>> {
    if page_size == 0 {
        bail!("page_size must be greater than zero");
    }

    let mut keys = Vec::new();
    let mut offset = 0;
    loop {
        let page = sink.enumerate_keys(offset, page_size).await?;
        let len = page.len();
        keys.extend(page);
        if len < page_size {
            break;
        }
        offset += len;
    }
    Ok(keys)
}
