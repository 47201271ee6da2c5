//! Original-source capability for bronze spot checks.
//!
//! The bronze suite only registers its spot check when a `SourceClient` is
//! supplied; nothing probes for network access at runtime. Every fetch is
//! bounded by a timeout, and a timeout is one failed sample.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    #[error("source request timed out after {0:?}")]
    Timeout(Duration),

    #[error("source request failed: {0}")]
    Http(String),

    #[error("malformed source response: {0}")]
    Malformed(String),
}

/// Looks up a certificate's shipped pounds at the original source.
pub trait SourceClient: Send + Sync {
    /// `Ok(None)` when the source has no such certificate.
    fn fetch_pounds(&self, certificate_id: &str) -> Result<Option<f64>, SourceError>;
}

// ─── HTTP client ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CertificateResponse {
    pounds: f64,
}

/// `GET {base_url}/certificates/{id}` returning `{ "pounds": <number> }`.
pub struct HttpSourceClient {
    client: reqwest::blocking::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpSourceClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("grainlab/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SourceError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn certificate_url(&self, certificate_id: &str) -> String {
        format!("{}/certificates/{certificate_id}", self.base_url)
    }
}

impl SourceClient for HttpSourceClient {
    fn fetch_pounds(&self, certificate_id: &str) -> Result<Option<f64>, SourceError> {
        let resp = self
            .client
            .get(self.certificate_url(certificate_id))
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    SourceError::Timeout(self.timeout)
                } else {
                    SourceError::Http(e.to_string())
                }
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(SourceError::Http(format!(
                "HTTP {status} for certificate {certificate_id}"
            )));
        }

        let body: CertificateResponse = resp.json().map_err(|e| {
            SourceError::Malformed(format!("certificate {certificate_id}: {e}"))
        })?;
        Ok(Some(body.pounds))
    }
}

// ─── Deadline wrapper ────────────────────────────────────────────────

/// Enforces a hard deadline on any client by running the fetch on a
/// worker thread. A fetch that overruns is abandoned, not cancelled.
pub struct TimeoutSourceClient {
    inner: Arc<dyn SourceClient>,
    timeout: Duration,
}

impl TimeoutSourceClient {
    pub fn new(inner: Arc<dyn SourceClient>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

impl SourceClient for TimeoutSourceClient {
    fn fetch_pounds(&self, certificate_id: &str) -> Result<Option<f64>, SourceError> {
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let id = certificate_id.to_string();
        std::thread::spawn(move || {
            // The receiver may be gone after a timeout; nothing to do then.
            let _ = tx.send(inner.fetch_pounds(&id));
        });
        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(SourceError::Timeout(self.timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(SourceError::Http(format!(
                "source worker for certificate {certificate_id} exited without a response"
            ))),
        }
    }
}
