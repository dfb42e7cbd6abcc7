//! Entry points for new subscriptions: a single URL or an OPML file.
//!
//! The ingestor only turns input into [`FeedDescriptor`]s. Persisting them
//! and handing them to the fetch queue is the caller's job (see
//! [`SubscriptionService`](crate::service::SubscriptionService)).

use serde::Serialize;

use crate::feed::opml::{self, OpmlWarning, StructuralError};
use crate::feed::{FeedDescriptor, FeedValidator, Rejected};
use crate::util::UrlPolicy;

/// Outcome of a structurally valid OPML import.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    /// Usable feeds, in document order
    pub feeds: Vec<FeedDescriptor>,
    /// One entry per skipped outline
    pub warnings: Vec<OpmlWarning>,
}

impl ImportReport {
    /// Number of feed entries the document offered, usable or not. Empty
    /// folders and other non-feed outlines are not counted.
    pub fn total(&self) -> usize {
        let skipped = self
            .warnings
            .iter()
            .filter(|w| w.problem.is_feed_entry())
            .count();
        self.feeds.len() + skipped
    }

    /// e.g. "12 of 14 feeds imported"
    pub fn summary(&self) -> String {
        format!("{} of {} feeds imported", self.feeds.len(), self.total())
    }
}

/// Turns user input into feed descriptors.
#[derive(Debug, Clone)]
pub struct SubscriptionIngestor {
    validator: FeedValidator,
    policy: UrlPolicy,
}

impl SubscriptionIngestor {
    /// OPML entries are checked against the same URL policy the validator
    /// applies to typed-in URLs.
    pub fn new(validator: FeedValidator) -> Self {
        let policy = validator.settings().policy;
        Self { validator, policy }
    }

    /// Resolves one URL to a feed. See [`FeedValidator::validate`].
    pub async fn add_one(&self, url: &str) -> Result<FeedDescriptor, Rejected> {
        self.validator.validate(url).await
    }

    /// Decodes an OPML document into descriptors plus per-entry warnings.
    ///
    /// Entries are not fetched here; an unreachable feed surfaces later as a
    /// fetch error on the stored subscription.
    ///
    /// # Errors
    ///
    /// [`StructuralError`] when the document as a whole is unreadable.
    pub fn import_batch(&self, bytes: &[u8]) -> Result<ImportReport, StructuralError> {
        let decoded = opml::decode_with_policy(bytes, self.policy)?;

        let report = ImportReport {
            feeds: decoded.feeds,
            warnings: decoded.warnings,
        };
        tracing::info!(
            imported = report.feeds.len(),
            skipped = report.warnings.len(),
            "OPML decoded"
        );
        Ok(report)
    }
}
