use crate::dispatch::{FetchJob, FetchReceiver};
use crate::feed::FeedDescriptor;
use crate::storage::{Database, SubscriptionStore};
use futures::stream::{self, StreamExt};
use std::time::Duration;
use thiserror::Error;
use url::Url;

const MAX_RETRIES: u32 = 3;
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const FETCH_CONCURRENCY: usize = 10;

/// Errors that can occur while fetching one feed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the fetch timeout
    #[error("Request timed out")]
    Timeout,
    /// Body could not be parsed as RSS, Atom or JSON Feed
    #[error("Parse error: {0}")]
    Parse(String),
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// Tunables for [`FetchWorker`].
#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// Feeds fetched simultaneously within one job
    pub concurrency: usize,
    /// Per-request timeout
    pub timeout: Duration,
    /// Retries for 429, 5xx and truncated bodies
    pub max_retries: u32,
    pub max_body_bytes: usize,
    /// First backoff delay; doubles on each retry
    pub backoff_base: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            concurrency: FETCH_CONCURRENCY,
            timeout: FETCH_TIMEOUT,
            max_retries: MAX_RETRIES,
            max_body_bytes: MAX_FEED_SIZE,
            backoff_base: Duration::from_secs(1),
        }
    }
}

/// Result of a single feed fetch.
#[derive(Debug)]
pub struct FetchResult {
    pub url: Url,
    /// Number of entries in the fetched feed, or the error that occurred
    pub result: Result<usize, FetchError>,
}

/// Totals reported by [`FetchWorker::run`] once the queue closes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub jobs: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// The fetch subsystem: drains [`FetchJob`]s and retrieves every feed in
/// them, recording each outcome in the store.
///
/// Feeds within a job are fetched concurrently (bounded by
/// [`FetchSettings::concurrency`]); jobs are taken one at a time in the order
/// they were enqueued.
pub struct FetchWorker<S> {
    store: S,
    client: reqwest::Client,
    settings: FetchSettings,
}

impl<S: SubscriptionStore> FetchWorker<S> {
    pub fn new(store: S, client: reqwest::Client, settings: FetchSettings) -> Self {
        Self {
            store,
            client,
            settings,
        }
    }

    /// Processes jobs until every [`FetchDispatchQueue`](crate::dispatch::FetchDispatchQueue)
    /// handle is dropped and the backlog is empty.
    pub async fn run(self, mut receiver: FetchReceiver) -> WorkerStats {
        let mut stats = WorkerStats::default();

        while let Some(job) = receiver.recv().await {
            let batch_id = job.batch_id;
            let results = self.process(job).await;

            let failed = results.iter().filter(|r| r.result.is_err()).count();
            stats.jobs += 1;
            stats.failed += failed;
            stats.succeeded += results.len() - failed;

            tracing::debug!(
                batch_id = batch_id,
                fetched = results.len() - failed,
                failed = failed,
                "Fetch job complete"
            );
        }

        tracing::debug!(jobs = stats.jobs, "Fetch queue closed, worker stopping");
        stats
    }

    /// Fetches every feed in `job` and records the outcomes.
    ///
    /// Results are returned in completion order, not input order.
    pub async fn process(&self, job: FetchJob) -> Vec<FetchResult> {
        let concurrency = self.settings.concurrency.max(1);

        stream::iter(job.feeds)
            .map(|feed| async move {
                let result = self.fetch_one(feed.canonical_url()).await;
                self.record(&feed, &result).await;
                FetchResult {
                    url: feed.canonical_url().clone(),
                    result,
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await
    }

    /// Record the result of a feed fetch to the store.
    ///
    /// Store errors are logged and otherwise ignored; the next fetch will
    /// overwrite the status anyway.
    async fn record(&self, feed: &FeedDescriptor, result: &Result<usize, FetchError>) {
        let url = feed.canonical_url();
        match result {
            Ok(entries) => {
                tracing::debug!(url = %url, entries = entries, "Feed fetched");
                if let Err(e) = self.store.record_fetch_success(url).await {
                    tracing::warn!(url = %url, error = %e, "Failed to record fetch success");
                }
            }
            Err(fetch_err) => {
                tracing::info!(url = %url, error = %fetch_err, "Feed fetch failed");
                match self
                    .store
                    .record_fetch_failure(url, &fetch_err.to_string())
                    .await
                {
                    Ok(Some(failures)) if failures >= Database::CIRCUIT_BREAKER_THRESHOLD => {
                        tracing::info!(
                            url = %url,
                            title = %feed.title(),
                            failures = failures,
                            "Feed keeps failing"
                        );
                    }
                    Ok(_) => {}
                    Err(db_err) => {
                        tracing::warn!(
                            url = %url,
                            error = %db_err,
                            "Failed to record fetch failure"
                        );
                    }
                }
            }
        }
    }

    async fn fetch_one(&self, url: &Url) -> Result<usize, FetchError> {
        let max_retries = self.settings.max_retries;
        let mut retry_count = 0;

        let bytes = loop {
            let response =
                tokio::time::timeout(self.settings.timeout, self.client.get(url.clone()).send())
                    .await
                    .map_err(|_| FetchError::Timeout)?
                    .map_err(FetchError::Network)?;

            let status = response.status();

            // Handle rate limiting with exponential backoff
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if retry_count >= max_retries {
                    return Err(FetchError::RateLimited(max_retries));
                }
                let delay = self.backoff(retry_count);
                tracing::warn!(
                    feed = %url,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            // Handle server errors (5xx) with exponential backoff
            if status.is_server_error() {
                if retry_count >= max_retries {
                    return Err(FetchError::HttpStatus(status.as_u16()));
                }
                let delay = self.backoff(retry_count);
                tracing::warn!(
                    feed = %url,
                    status = %status,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Server error, retrying after delay"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            // 4xx errors fail immediately
            if !status.is_success() {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }

            let read = tokio::time::timeout(
                self.settings.timeout,
                read_limited_bytes(response, self.settings.max_body_bytes),
            )
            .await
            .map_err(|_| FetchError::Timeout)?;

            match read {
                Ok(bytes) => break bytes,
                Err(FetchError::IncompleteResponse { expected, received }) => {
                    if retry_count >= max_retries {
                        return Err(FetchError::IncompleteResponse { expected, received });
                    }
                    let delay = self.backoff(retry_count);
                    tracing::debug!(
                        feed = %url,
                        expected = expected,
                        received = received,
                        attempt = retry_count + 1,
                        "Retrying incomplete download"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                    continue;
                }
                Err(e) => return Err(e),
            }
        };

        let feed =
            feed_rs::parser::parse(&bytes[..]).map_err(|e| FetchError::Parse(e.to_string()))?;
        Ok(feed.entries.len())
    }

    fn backoff(&self, retry_count: u32) -> Duration {
        self.settings
            .backoff_base
            .saturating_mul(2u32.saturating_pow(retry_count))
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Capture Content-Length for completeness check
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch;
    use wiremock::matchers::{any, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Test</title>
    <item><guid>1</guid><title>Test</title></item>
</channel></rss>"#;

    fn fast_settings() -> FetchSettings {
        FetchSettings {
            backoff_base: Duration::from_millis(10),
            ..FetchSettings::default()
        }
    }

    async fn setup(url: &str) -> (Database, FetchWorker<Database>, FeedDescriptor) {
        let db = Database::open(":memory:").await.unwrap();
        let feed = FeedDescriptor::new(url, Url::parse(url).unwrap(), Some("Test"), None);
        db.add(&feed).await.unwrap();
        let worker = FetchWorker::new(db.clone(), reqwest::Client::new(), fast_settings());
        (db, worker, feed)
    }

    fn job(feeds: Vec<FeedDescriptor>) -> FetchJob {
        FetchJob { batch_id: 1, feeds }
    }

    #[tokio::test]
    async fn test_fetch_success_records_timestamp() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .insert_header("Content-Type", "application/xml"),
            )
            .mount(&mock_server)
            .await;

        let (db, worker, feed) = setup(&format!("{}/feed", mock_server.uri())).await;

        let results = worker.process(job(vec![feed])).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].result.as_ref().unwrap(), &1);

        let subs = db.list().await.unwrap();
        assert!(subs[0].last_fetched.is_some());
        assert_eq!(subs[0].error, None);
    }

    #[tokio::test]
    async fn test_fetch_404_records_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let (db, worker, feed) = setup(&format!("{}/feed", mock_server.uri())).await;

        let results = worker.process(job(vec![feed])).await;
        match &results[0].result {
            Err(FetchError::HttpStatus(404)) => {}
            other => panic!("Expected HttpStatus(404), got {:?}", other),
        }

        let subs = db.list().await.unwrap();
        assert_eq!(subs[0].error.as_deref(), Some("HTTP error: status 404"));
        assert_eq!(subs[0].consecutive_failures, 1);
        assert_eq!(subs[0].last_fetched, None);
    }

    #[tokio::test]
    async fn test_fetch_500_retries_then_fails() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(4) // Initial request + 3 retries
            .mount(&mock_server)
            .await;

        let (_db, worker, feed) = setup(&format!("{}/feed", mock_server.uri())).await;

        let results = worker.process(job(vec![feed])).await;
        match &results[0].result {
            Err(FetchError::HttpStatus(500)) => {}
            other => panic!("Expected HttpStatus(500), got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_503_retry_then_success() {
        let mock_server = MockServer::start().await;

        // First two requests return 503, third succeeds
        Mock::given(any())
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&mock_server)
            .await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&mock_server)
            .await;

        let (_db, worker, feed) = setup(&format!("{}/feed", mock_server.uri())).await;

        let results = worker.process(job(vec![feed])).await;
        assert_eq!(results[0].result.as_ref().unwrap(), &1);
    }

    #[tokio::test]
    async fn test_rate_limited_gives_up() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(429))
            .expect(4)
            .mount(&mock_server)
            .await;

        let (_db, worker, feed) = setup(&format!("{}/feed", mock_server.uri())).await;

        let results = worker.process(job(vec![feed])).await;
        assert!(matches!(
            results[0].result,
            Err(FetchError::RateLimited(3))
        ));
    }

    #[tokio::test]
    async fn test_malformed_feed_parse_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<not valid xml"))
            .mount(&mock_server)
            .await;

        let (_db, worker, feed) = setup(&format!("{}/feed", mock_server.uri())).await;

        let results = worker.process(job(vec![feed])).await;
        assert!(matches!(results[0].result, Err(FetchError::Parse(_))));
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(4096)))
            .mount(&mock_server)
            .await;

        let (db, _, feed) = setup(&format!("{}/feed", mock_server.uri())).await;
        let worker = FetchWorker::new(
            db,
            reqwest::Client::new(),
            FetchSettings {
                max_body_bytes: 1024,
                ..fast_settings()
            },
        );

        let results = worker.process(job(vec![feed])).await;
        assert!(matches!(results[0].result, Err(FetchError::ResponseTooLarge)));
    }

    #[tokio::test]
    async fn test_run_drains_queue_then_stops() {
        let mock_server = MockServer::start().await;
        Mock::given(path("/a"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(path("/b"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&mock_server)
            .await;

        let (db, worker, feed_a) = setup(&format!("{}/a", mock_server.uri())).await;
        let url_b = format!("{}/b", mock_server.uri());
        let feed_b = FeedDescriptor::new(url_b.as_str(), Url::parse(&url_b).unwrap(), None, None);
        db.add(&feed_b).await.unwrap();

        let (queue, receiver) = dispatch::channel(4);
        queue.enqueue(vec![feed_a]).await.unwrap();
        queue.enqueue(vec![feed_b]).await.unwrap();
        drop(queue);

        let stats = worker.run(receiver).await;
        assert_eq!(
            stats,
            WorkerStats {
                jobs: 2,
                succeeded: 1,
                failed: 1
            }
        );
    }
}
