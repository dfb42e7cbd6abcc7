use std::future::Future;

use url::Url;

use super::schema::Database;
use super::types::{DatabaseError, FeedDbRow, Subscription};
use crate::feed::FeedDescriptor;

const SELECT_FEEDS: &str = r#"
    SELECT id, title, source_url, url, site_url, created_at,
           last_fetched, error, consecutive_failures
    FROM feeds
"#;

/// The persistence capabilities the subscription pipeline relies on.
///
/// `list`/`add`/`delete` serve the front end; the `record_*` pair is how the
/// fetch worker reports back. [`Database`] is the production implementation.
pub trait SubscriptionStore: Send + Sync {
    /// All subscriptions in the order they were first added.
    fn list(&self) -> impl Future<Output = Result<Vec<Subscription>, DatabaseError>> + Send;

    /// Stores a descriptor, keyed by canonical URL. Adding a URL that is
    /// already present refreshes its title and site URL and returns the
    /// existing id.
    fn add(
        &self,
        feed: &FeedDescriptor,
    ) -> impl Future<Output = Result<i64, DatabaseError>> + Send;

    /// Stores several descriptors in one transaction: all or nothing.
    /// Returns ids in input order.
    fn add_all(
        &self,
        feeds: &[FeedDescriptor],
    ) -> impl Future<Output = Result<Vec<i64>, DatabaseError>> + Send;

    /// Removes a subscription. Returns `false` when no such id existed.
    fn delete(&self, id: i64) -> impl Future<Output = Result<bool, DatabaseError>> + Send;

    /// Marks a successful fetch: stamps `last_fetched`, clears the error and
    /// resets the circuit breaker.
    fn record_fetch_success(
        &self,
        url: &Url,
    ) -> impl Future<Output = Result<(), DatabaseError>> + Send;

    /// Records a failed fetch. Returns the new consecutive failure count,
    /// or `None` if the feed was unsubscribed meanwhile.
    fn record_fetch_failure(
        &self,
        url: &Url,
        error: &str,
    ) -> impl Future<Output = Result<Option<i64>, DatabaseError>> + Send;
}

impl Database {
    /// Threshold for consecutive failures after which a feed is reported as
    /// broken
    pub const CIRCUIT_BREAKER_THRESHOLD: i64 = 5;

    /// Looks up one subscription by id.
    pub async fn get_feed(&self, id: i64) -> Result<Option<Subscription>, DatabaseError> {
        let row: Option<FeedDbRow> = sqlx::query_as(&format!("{SELECT_FEEDS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(FeedDbRow::into_subscription).transpose()
    }

    async fn upsert_feed<'e, E>(executor: E, feed: &FeedDescriptor) -> Result<i64, DatabaseError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        let now = chrono::Utc::now().timestamp();
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO feeds (title, source_url, url, site_url, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                title = excluded.title,
                site_url = COALESCE(excluded.site_url, feeds.site_url)
            RETURNING id
        "#,
        )
        .bind(feed.title())
        .bind(feed.source_url())
        .bind(feed.canonical_url().as_str())
        .bind(feed.site_url().map(Url::as_str))
        .bind(now)
        .fetch_one(executor)
        .await?;
        Ok(id)
    }
}

impl SubscriptionStore for Database {
    async fn list(&self) -> Result<Vec<Subscription>, DatabaseError> {
        let rows: Vec<FeedDbRow> = sqlx::query_as(&format!("{SELECT_FEEDS} ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(FeedDbRow::into_subscription).collect()
    }

    async fn add(&self, feed: &FeedDescriptor) -> Result<i64, DatabaseError> {
        let id = Self::upsert_feed(&self.pool, feed).await?;
        tracing::debug!(id = id, url = %feed.canonical_url(), "Stored feed");
        Ok(id)
    }

    async fn add_all(&self, feeds: &[FeedDescriptor]) -> Result<Vec<i64>, DatabaseError> {
        if feeds.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(feeds.len());
        for feed in feeds {
            ids.push(Self::upsert_feed(&mut *tx, feed).await?);
        }
        tx.commit().await?;

        tracing::debug!(count = ids.len(), "Stored feed batch");
        Ok(ids)
    }

    async fn delete(&self, id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_fetch_success(&self, url: &Url) -> Result<(), DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "UPDATE feeds SET last_fetched = ?, error = NULL, consecutive_failures = 0 WHERE url = ?",
        )
        .bind(now)
        .bind(url.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_fetch_failure(
        &self,
        url: &Url,
        error: &str,
    ) -> Result<Option<i64>, DatabaseError> {
        let failures: Option<(i64,)> = sqlx::query_as(
            "UPDATE feeds SET error = ?, consecutive_failures = consecutive_failures + 1
             WHERE url = ? RETURNING consecutive_failures",
        )
        .bind(error)
        .bind(url.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(failures.map(|(n,)| n))
    }
}
