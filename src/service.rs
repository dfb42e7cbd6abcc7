//! The controller layer: ties ingestion, storage and dispatch together.

use thiserror::Error;

use crate::dispatch::{FatalDispatchError, FetchDispatchQueue};
use crate::feed::opml::{self, StructuralError};
use crate::feed::{FeedDescriptor, Rejected};
use crate::ingest::{ImportReport, SubscriptionIngestor};
use crate::storage::{DatabaseError, Subscription, SubscriptionStore};

/// Whole-call failures of [`SubscriptionService`] operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The URL did not resolve to a feed. Nothing was stored or enqueued.
    #[error(transparent)]
    Rejected(#[from] Rejected),

    /// The OPML file is unreadable. Nothing was stored or enqueued.
    #[error("OPML file unreadable: {0}")]
    Structural(#[from] StructuralError),

    /// Stored, but the fetch worker would not take the batch. Repeating the
    /// call is safe: storage upserts by URL.
    #[error("Subscriptions saved but not scheduled: {0}")]
    Dispatch(#[from] FatalDispatchError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Subscription management on top of an injected store and fetch queue.
pub struct SubscriptionService<S> {
    ingestor: SubscriptionIngestor,
    store: S,
    queue: FetchDispatchQueue,
}

impl<S: SubscriptionStore> SubscriptionService<S> {
    pub fn new(ingestor: SubscriptionIngestor, store: S, queue: FetchDispatchQueue) -> Self {
        Self {
            ingestor,
            store,
            queue,
        }
    }

    /// Subscribes to the feed behind `url`.
    ///
    /// On success the feed is stored and enqueued as a one-feed batch. A
    /// rejected URL leaves both storage and the queue untouched.
    pub async fn add_feed(&self, url: &str) -> Result<(i64, FeedDescriptor), ServiceError> {
        let feed = self.ingestor.add_one(url).await?;
        let id = self.store.add(&feed).await?;
        self.queue.enqueue(vec![feed.clone()]).await?;

        tracing::info!(id = id, url = %feed.canonical_url(), title = %feed.title(), "Subscribed");
        Ok((id, feed))
    }

    /// Imports every usable entry of an OPML document.
    ///
    /// All usable feeds are stored in one transaction, then enqueued as a
    /// single batch in document order. Skipped entries are listed in the
    /// returned report.
    pub async fn import_opml(&self, bytes: &[u8]) -> Result<ImportReport, ServiceError> {
        let report = self.ingestor.import_batch(bytes)?;
        self.store.add_all(&report.feeds).await?;
        self.queue.enqueue(report.feeds.clone()).await?;

        tracing::info!(summary = %report.summary(), "OPML import complete");
        Ok(report)
    }

    /// Renders the current subscriptions as an OPML document, in the order
    /// they were added.
    pub async fn export_opml(&self) -> anyhow::Result<String> {
        let subscriptions = self.store.list().await?;
        opml::encode(subscriptions.iter().map(|s| &s.descriptor))
    }

    pub async fn list(&self) -> Result<Vec<Subscription>, ServiceError> {
        Ok(self.store.list().await?)
    }

    /// Unsubscribes. Returns `false` if `id` was not subscribed.
    pub async fn remove(&self, id: i64) -> Result<bool, ServiceError> {
        let removed = self.store.delete(id).await?;
        if removed {
            tracing::info!(id = id, "Unsubscribed");
        }
        Ok(removed)
    }
}
