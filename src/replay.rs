//! Session replay.
//!
//! A replay fetches a session's captured target and judges whether the
//! response still looks like a working callback. The judgment lives here,
//! outside the session record: the record only ever hears success or
//! failure, never transport errors or status codes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{Client, Proxy, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::pool::SessionPool;
use crate::repository::RepositoryError;

/// Response bodies shorter than this read as a dead callback rather than
/// a product page.
const MIN_BODY_BYTES: usize = 1024;

/// Substrings that mark a block or interstitial page (lowercase).
const BLOCK_MARKERS: &[&str] = &[
    "unusual traffic",
    "/sorry/index",
    "g-recaptcha",
    "consent.google",
];

/// Errors from the replay layer.
///
/// Transport failures during a fetch are not errors here; they classify
/// as a failed replay and get reported against the session.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("invalid proxy url: {0}")]
    Proxy(#[source] reqwest::Error),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// One fetched response, enough for classification.
#[derive(Debug, Clone)]
pub struct Replay {
    pub status: StatusCode,
    pub body: String,
    pub elapsed: Duration,
}

/// Why a replay counted as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The request never completed (timeout, connection error).
    Transport,
    /// Non-2xx status.
    HttpStatus,
    /// The response is a block or consent interstitial.
    Blocked,
    /// Suspiciously small body.
    EmptyBody,
}

/// Verdict over one replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure(FailureKind),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// Judge one response. Status first, then block markers, then body size;
/// block pages are often large, so markers outrank the size check.
pub fn classify(replay: &Replay) -> Outcome {
    if !replay.status.is_success() {
        return Outcome::Failure(FailureKind::HttpStatus);
    }
    let body = replay.body.to_lowercase();
    if BLOCK_MARKERS.iter().any(|marker| body.contains(marker)) {
        return Outcome::Failure(FailureKind::Blocked);
    }
    if replay.body.len() < MIN_BODY_BYTES {
        return Outcome::Failure(FailureKind::EmptyBody);
    }
    Outcome::Success
}

/// Result of one checkout-fetch-report cycle, for display.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub session_id: Option<i64>,
    pub region: String,
    pub outcome: Outcome,
    pub status: Option<u16>,
    pub body_bytes: usize,
    pub elapsed_ms: u64,
}

/// HTTP client for replaying captured targets.
pub struct ReplayClient {
    client: Client,
}

impl ReplayClient {
    pub fn new(
        user_agent: &str,
        timeout: Duration,
        proxy: Option<&str>,
    ) -> Result<Self, ReplayError> {
        let mut builder = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .cookie_store(true);
        if let Some(proxy) = proxy {
            builder = builder.proxy(Proxy::all(proxy).map_err(ReplayError::Proxy)?);
        }
        let client = builder.build().map_err(ReplayError::Client)?;
        Ok(Self { client })
    }

    /// Fetch a target once.
    pub async fn fetch(&self, target: &str) -> Result<Replay, reqwest::Error> {
        let start = Instant::now();
        let response = self.client.get(target).send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok(Replay {
            status,
            body,
            elapsed: start.elapsed(),
        })
    }

    /// One full cycle: check a session out of the pool, fetch its target,
    /// classify, and report the outcome back. Returns `None` when the
    /// region has no healthy session to offer.
    pub async fn replay_via(
        &self,
        pool: &Arc<Mutex<SessionPool>>,
        region: &str,
    ) -> Result<Option<ReplayReport>, ReplayError> {
        let session = pool.lock().await.checkout(region)?;
        let Some(mut session) = session else {
            return Ok(None);
        };

        let start = Instant::now();
        let (outcome, status, body_bytes) = match self.fetch(&session.target).await {
            Ok(replay) => (
                classify(&replay),
                Some(replay.status.as_u16()),
                replay.body.len(),
            ),
            Err(e) => {
                warn!("replay transport error for session {:?}: {e}", session.id);
                (Outcome::Failure(FailureKind::Transport), None, 0)
            }
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;

        {
            let pool = pool.lock().await;
            match outcome {
                Outcome::Success => pool.report_success(&mut session)?,
                Outcome::Failure(kind) => {
                    debug!("replay failed ({kind:?}) for session {:?}", session.id);
                    pool.report_failure(&mut session)?;
                }
            }
        }

        Ok(Some(ReplayReport {
            session_id: session.id,
            region: session.region.clone(),
            outcome,
            status,
            body_bytes,
            elapsed_ms,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replay(status: StatusCode, body: &str) -> Replay {
        Replay {
            status,
            body: body.to_string(),
            elapsed: Duration::from_millis(5),
        }
    }

    fn product_page() -> String {
        format!("<html><body>{}</body></html>", "price ".repeat(400))
    }

    #[test]
    fn test_classify_success() {
        let outcome = classify(&replay(StatusCode::OK, &product_page()));
        assert_eq!(outcome, Outcome::Success);
        assert!(outcome.is_success());
    }

    #[test]
    fn test_classify_non_2xx_status() {
        assert_eq!(
            classify(&replay(StatusCode::NOT_FOUND, &product_page())),
            Outcome::Failure(FailureKind::HttpStatus)
        );
        assert_eq!(
            classify(&replay(StatusCode::TOO_MANY_REQUESTS, "")),
            Outcome::Failure(FailureKind::HttpStatus)
        );
    }

    #[test]
    fn test_classify_block_page() {
        let body = format!(
            "<html>Our systems have detected Unusual Traffic from your network{}</html>",
            " pad".repeat(500)
        );
        assert_eq!(
            classify(&replay(StatusCode::OK, &body)),
            Outcome::Failure(FailureKind::Blocked)
        );
    }

    #[test]
    fn test_classify_block_marker_beats_size_check() {
        // Tiny consent stub still reads as blocked, not empty.
        let body = "<a href=\"https://consent.google.com/m\">continue</a>";
        assert_eq!(
            classify(&replay(StatusCode::OK, body)),
            Outcome::Failure(FailureKind::Blocked)
        );
    }

    #[test]
    fn test_classify_tiny_body() {
        assert_eq!(
            classify(&replay(StatusCode::OK, "<html></html>")),
            Outcome::Failure(FailureKind::EmptyBody)
        );
    }
}
