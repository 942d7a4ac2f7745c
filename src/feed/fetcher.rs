use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use super::decoder::{DecodeError, Decoder};
use super::model::Feed;
use super::reconcile::reconcile;
use super::subscription::FeedJob;
use crate::config::Config;
use crate::storage::SnapshotStore;

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const DEFAULT_MAX_CONCURRENT: usize = 16;

/// Errors that can occur while fetching one feed.
///
/// These cover the full lifecycle of a fetch: network issues, HTTP errors,
/// decoding failures, and a task that died before reporting.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Response body exceeded the configured size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Bytes arrived but could not be turned into a feed
    #[error("{0}")]
    Decode(#[from] DecodeError),
    /// The fetch task panicked
    #[error("Fetch task panicked: {0}")]
    Panicked(String),
}

/// Outcome of one job, tagged with the job's position in the subscription
/// list so a consumer can place it regardless of arrival order.
#[derive(Debug)]
pub struct FetchResult {
    pub index: usize,
    pub url: String,
    pub outcome: Result<Feed, FetchError>,
}

/// Fans subscription jobs out to concurrent fetch tasks.
///
/// Each task downloads its feed, decodes it, loads the previous snapshot
/// for the same URL and carries read state across. Cloning is cheap; the
/// HTTP client and filter are shared.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    decoder: Decoder,
    snapshots: SnapshotStore,
    fetch_timeout: Duration,
    max_feed_bytes: usize,
    max_concurrent: usize,
}

impl Fetcher {
    pub fn new(client: reqwest::Client, decoder: Decoder, snapshots: SnapshotStore) -> Self {
        Self {
            client,
            decoder,
            snapshots,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            max_feed_bytes: DEFAULT_MAX_FEED_SIZE,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }

    /// Builds the HTTP client and decoder from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Network`] if the HTTP client cannot be built
    /// (e.g. no TLS backend available).
    pub fn from_config(config: &Config, snapshots: SnapshotStore) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .build()?;
        let decoder = Decoder::with_command_filter(config.filter_timeout());

        Ok(Self::new(client, decoder, snapshots)
            .with_fetch_timeout(config.fetch_timeout())
            .with_max_feed_bytes(config.max_feed_bytes)
            .with_max_concurrent(config.max_concurrent_fetches))
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_max_feed_bytes(mut self, limit: usize) -> Self {
        self.max_feed_bytes = limit;
        self
    }

    /// Caps how many feeds are fetched at once. 0 means no cap.
    pub fn with_max_concurrent(mut self, limit: usize) -> Self {
        self.max_concurrent = limit;
        self
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Spawns one task per job and returns the stream of their results.
    ///
    /// Results arrive in completion order, each carrying its job's index.
    /// The stream ends once every task has reported. Must be called from
    /// within a tokio runtime.
    pub fn spawn_all(&self, jobs: Vec<FeedJob>) -> FetchRun {
        let total = jobs.len();
        // Capacity = job count, so a task never waits on a slow consumer
        let (tx, rx) = mpsc::channel(total.max(1));
        let permits = match self.max_concurrent {
            0 => Semaphore::MAX_PERMITS,
            n => n,
        };
        let semaphore = Arc::new(Semaphore::new(permits));
        let mut tasks = JoinSet::new();

        for (index, job) in jobs.into_iter().enumerate() {
            let fetcher = self.clone();
            let tx = tx.clone();
            let semaphore = Arc::clone(&semaphore);

            tasks.spawn(async move {
                let result = catch_task_panic(async {
                    // The semaphore is never closed, so acquire cannot fail
                    let _permit = semaphore.acquire().await;
                    fetcher.fetch_one(index, &job).await
                })
                .await
                .unwrap_or_else(|message| {
                    tracing::error!(url = %job.url, panic = %message, "Fetch task panicked");
                    FetchResult {
                        index,
                        url: job.url.clone(),
                        outcome: Err(FetchError::Panicked(message)),
                    }
                });

                if tx.send(result).await.is_err() {
                    tracing::warn!(url = %job.url, "Fetch result dropped (receiver closed)");
                }
            });
        }

        // RES-001: Drop the original sender so the receiver ends when every task is done
        drop(tx);

        tracing::debug!(feeds = total, max_concurrent = self.max_concurrent, "Started fetching");
        FetchRun {
            results: rx,
            tasks,
            total,
        }
    }

    /// Fetches, decodes and reconciles a single job.
    ///
    /// # Errors
    ///
    /// The returned `FetchResult.outcome` may contain:
    /// - [`FetchError::Network`] - Connection or TLS errors
    /// - [`FetchError::Timeout`] - The download exceeded the fetch timeout
    /// - [`FetchError::HttpStatus`] - Non-2xx HTTP response
    /// - [`FetchError::ResponseTooLarge`] - Body exceeded the size limit
    /// - [`FetchError::Decode`] - Filter failure or unrecognized document
    ///
    /// A snapshot that cannot be loaded is logged and skipped; it never fails
    /// the fetch.
    pub async fn fetch_one(&self, index: usize, job: &FeedJob) -> FetchResult {
        let outcome = self.process(job).await;
        match &outcome {
            Ok(feed) => tracing::debug!(
                url = %job.url,
                items = feed.len(),
                unread = feed.unread_count(),
                "Fetched feed"
            ),
            Err(e) => tracing::warn!(url = %job.url, error = %e, "Feed fetch failed"),
        }

        FetchResult {
            index,
            url: job.url.clone(),
            outcome,
        }
    }

    async fn process(&self, job: &FeedJob) -> Result<Feed, FetchError> {
        let bytes = tokio::time::timeout(self.fetch_timeout, self.download(&job.url))
            .await
            .map_err(|_| FetchError::Timeout(self.fetch_timeout))??;

        let fresh = self.decoder.decode(bytes, job).await?;

        let previous = match self.snapshots.load(&job.url).await {
            Ok(previous) => previous,
            Err(e) => {
                tracing::warn!(url = %job.url, error = %e, "Ignoring unreadable snapshot");
                None
            }
        };

        Ok(reconcile(previous.as_ref(), fresh))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().await?;

        // No retries: a failed feed is reported and the run moves on
        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        read_limited_bytes(response, self.max_feed_bytes).await
    }
}

/// Results of a [`Fetcher::spawn_all`] run.
///
/// Dropping the run aborts every task still in flight.
#[derive(Debug)]
pub struct FetchRun {
    results: mpsc::Receiver<FetchResult>,
    tasks: JoinSet<()>,
    total: usize,
}

impl FetchRun {
    /// Number of jobs in this run.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Next result in arrival order, or `None` once every task has reported
    /// (or the run was cancelled).
    pub async fn next(&mut self) -> Option<FetchResult> {
        self.results.recv().await
    }

    /// Aborts outstanding fetches. Results already delivered can still be
    /// drained with [`next`](Self::next).
    pub fn cancel(&mut self) {
        self.tasks.abort_all();
        self.results.close();
        tracing::debug!(total = self.total, "Fetch run cancelled");
    }

    /// Waits for every result, in arrival order.
    pub async fn collect(mut self) -> Vec<FetchResult> {
        let mut results = Vec::with_capacity(self.total);
        while let Some(result) = self.next().await {
            results.push(result);
        }
        results
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
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

    // EDGE-005: Connection closed before Content-Length bytes arrived
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

/// Runs a future, converting a panic inside it into an error message.
async fn catch_task_panic<F, T>(future: F) -> Result<T, String>
where
    F: std::future::Future<Output = T>,
{
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(|panic| panic_message(&*panic))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
