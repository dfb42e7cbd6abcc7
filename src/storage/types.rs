use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::feed::FeedDescriptor;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process has locked the database
    #[error("The subscription database is locked by another process. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A stored row no longer satisfies the descriptor invariants
    #[error("Stored feed {id} has an unusable URL: {reason}")]
    CorruptRow { id: i64, reason: String },

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) all mean
/// someone else holds the file.
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Data Structures
// ============================================================================

/// A stored subscription: the descriptor plus fetch bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    pub id: i64,
    pub descriptor: FeedDescriptor,
    /// Unix seconds
    pub created_at: i64,
    /// Unix seconds of the last successful fetch
    pub last_fetched: Option<i64>,
    /// Message of the last failed fetch, cleared on success
    pub error: Option<String>,
    /// Number of consecutive fetch failures (circuit breaker)
    pub consecutive_failures: i64,
}

/// Internal row type for feed queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedDbRow {
    pub id: i64,
    pub title: String,
    pub source_url: String,
    pub url: String,
    pub site_url: Option<String>,
    pub created_at: i64,
    pub last_fetched: Option<i64>,
    pub error: Option<String>,
    pub consecutive_failures: i64,
}

impl FeedDbRow {
    pub(crate) fn into_subscription(self) -> Result<Subscription, DatabaseError> {
        let canonical = Url::parse(&self.url).map_err(|e| DatabaseError::CorruptRow {
            id: self.id,
            reason: e.to_string(),
        })?;
        let site_url = self.site_url.as_deref().and_then(|s| Url::parse(s).ok());

        Ok(Subscription {
            id: self.id,
            descriptor: FeedDescriptor::new(
                self.source_url,
                canonical,
                Some(&self.title),
                site_url,
            ),
            created_at: self.created_at,
            last_fetched: self.last_fetched,
            error: self.error,
            consecutive_failures: self.consecutive_failures,
        })
    }
}
