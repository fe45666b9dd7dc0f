//! Knowledge-source extraction and cleaning.
//!
//! This crate provides:
//! - [`DocumentReader`] — one implementation per knowledge source
//! - [`Cleaner`] — per-source normalization of extracted documents
//! - [`DatasourceManager`] — a reader plus its cleaner, isolated per source

pub mod cleaners;
pub mod confluence;
pub mod hackernews;
pub mod manager;
pub mod notion;
pub mod pdf;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use ragkb_shared::{Document, RagKbError, Result};

pub use cleaners::{BasicCleaner, HackernewsCleaner, NotionCleaner};
pub use confluence::ConfluenceReader;
pub use hackernews::HackernewsReader;
pub use manager::DatasourceManager;
pub use notion::NotionReader;
pub use pdf::PdfReader;

/// Produces the complete, ordered document set of one knowledge source.
#[async_trait]
pub trait DocumentReader: Send + Sync {
    async fn read_all(&self) -> Result<Vec<Document>>;
}

/// Source-specific normalization. Pure: no I/O, order preserved.
pub trait Cleaner: Send + Sync {
    fn clean(&self, documents: Vec<Document>) -> Vec<Document>;
}

/// Run `fetch` over `items` with at most `max_concurrency` in flight.
/// Results come back in item order, not completion order.
pub(crate) async fn fetch_ordered<I, T, F, Fut>(
    items: Vec<I>,
    max_concurrency: usize,
    fetch: F,
) -> Vec<Result<T>>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));

    let handles: Vec<_> = items
        .into_iter()
        .map(|item| {
            let sem = semaphore.clone();
            let task = fetch(item);
            tokio::spawn(async move {
                let _permit = sem
                    .acquire_owned()
                    .await
                    .map_err(|e| RagKbError::Network(format!("fetch pool closed: {e}")))?;
                task.await
            })
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(match handle.await {
            Ok(result) => result,
            Err(e) => Err(RagKbError::Network(format!("fetch task failed: {e}"))),
        });
    }
    results
}

/// Keep at most `limit` items.
pub(crate) fn apply_limit<T>(mut items: Vec<T>, limit: Option<usize>) -> Vec<T> {
    if let Some(limit) = limit {
        items.truncate(limit);
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn fetch_ordered_keeps_item_order() {
        // Earlier items sleep longer so they complete last.
        let items: Vec<u64> = (0..6).collect();
        let results = fetch_ordered(items, 3, |i| async move {
            tokio::time::sleep(Duration::from_millis(30 - i * 5)).await;
            Ok(i)
        })
        .await;
        let values: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn limit_truncates() {
        assert_eq!(apply_limit(vec![1, 2, 3], Some(2)), vec![1, 2]);
        assert_eq!(apply_limit(vec![1, 2, 3], None), vec![1, 2, 3]);
        assert_eq!(apply_limit(vec![1], Some(5)), vec![1]);
    }
}
