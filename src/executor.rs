//! Single replayed request execution.
//!
//! [`execute`] never fails: transport errors, non-2xx statuses and deadline
//! overruns all come back as a [`RequestOutcome`] with the latency measured
//! over exactly the same span as a success.

use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::debug;
use url::Url;

use crate::errors::{describe_status, full_message, ErrorKind};
use crate::histogram::ns_to_ms;
use crate::url_transform::UrlError;

/// Result of one replayed request. Created once, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    pub url: String,
    pub success: bool,
    pub status_code: Option<u16>,
    pub error_kind: Option<ErrorKind>,
    pub error_detail: Option<String>,
    pub latency_nanos: u64,
}

impl RequestOutcome {
    fn succeeded(url: String, status_code: u16, latency_nanos: u64) -> Self {
        Self {
            url,
            success: true,
            status_code: Some(status_code),
            error_kind: None,
            error_detail: None,
            latency_nanos,
        }
    }

    fn failed(
        url: String,
        status_code: Option<u16>,
        kind: ErrorKind,
        detail: String,
        latency_nanos: u64,
    ) -> Self {
        Self {
            url,
            success: false,
            status_code,
            error_kind: Some(kind),
            error_detail: Some(detail),
            latency_nanos,
        }
    }

    /// Outcome for a recorded URL that could not be turned into a request.
    pub fn invalid_url(url: &str, error: &UrlError) -> Self {
        Self::failed(
            url.to_string(),
            None,
            ErrorKind::InvalidUrl,
            error.to_string(),
            0,
        )
    }

    /// Outcome for a request dispatched after its pool was closed.
    pub fn pool_closed(url: &str) -> Self {
        Self::failed(
            url.to_string(),
            None,
            ErrorKind::Other,
            "connection pool is closed".to_string(),
            0,
        )
    }

    pub fn latency_ms(&self) -> f64 {
        ns_to_ms(self.latency_nanos as f64)
    }

    /// One-line human-readable summary.
    pub fn summary_line(&self) -> String {
        match (&self.error_kind, self.status_code) {
            (None, Some(status)) => {
                format!("{} GET {} {:.2}ms", status, self.url, self.latency_ms())
            }
            (None, None) => format!("OK GET {} {:.2}ms", self.url, self.latency_ms()),
            (Some(kind), _) => format!(
                "ERROR {} GET {} {:.2}ms: {}",
                kind,
                self.url,
                self.latency_ms(),
                self.error_detail.as_deref().unwrap_or("")
            ),
        }
    }

    /// Prints the summary line: stdout for successes, stderr for failures.
    pub fn emit(&self) {
        if self.success {
            println!("{}", self.summary_line());
        } else {
            eprintln!("{}", self.summary_line());
        }
    }
}

/// Issues one GET with a hard deadline and reads the body to completion.
///
/// The deadline covers the whole exchange, including the body. Redirects are
/// reported as failures, not followed, as long as `client` was built by
/// [`crate::client::build_client`].
pub async fn execute(client: &reqwest::Client, url: Url, timeout: Duration) -> RequestOutcome {
    let url_text = url.to_string();
    let started = Instant::now();

    let result = time::timeout(timeout, fetch(client, url)).await;
    let latency_nanos = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);

    let outcome = match result {
        Err(_) => RequestOutcome::failed(
            url_text,
            None,
            ErrorKind::Timeout,
            format!("no complete response within {}ms", timeout.as_millis()),
            latency_nanos,
        ),
        Ok(Ok(status)) => match ErrorKind::from_status_code(status) {
            None => RequestOutcome::succeeded(url_text, status, latency_nanos),
            Some(kind) => RequestOutcome::failed(
                url_text,
                Some(status),
                kind,
                describe_status(status),
                latency_nanos,
            ),
        },
        Ok(Err(FetchError { status, source })) => {
            let detail = full_message(&source);
            let http_failure =
                status.and_then(|code| ErrorKind::from_status_code(code).map(|kind| (code, kind)));
            match http_failure {
                // Non-2xx status whose body then failed: still an HTTP_<code>.
                Some((code, kind)) => RequestOutcome::failed(
                    url_text,
                    Some(code),
                    kind,
                    format!("{} ({})", describe_status(code), detail),
                    latency_nanos,
                ),
                None => RequestOutcome::failed(
                    url_text,
                    status,
                    ErrorKind::from_reqwest_error(&source),
                    detail,
                    latency_nanos,
                ),
            }
        }
    };

    debug!(
        url = %outcome.url,
        success = outcome.success,
        status_code = ?outcome.status_code,
        latency_ms = outcome.latency_ms(),
        "Request completed"
    );
    outcome.emit();
    outcome
}

/// A failed exchange, with the status if the headers had already arrived.
struct FetchError {
    status: Option<u16>,
    source: reqwest::Error,
}

impl From<reqwest::Error> for FetchError {
    fn from(source: reqwest::Error) -> Self {
        Self {
            status: None,
            source,
        }
    }
}

async fn fetch(client: &reqwest::Client, url: Url) -> Result<u16, FetchError> {
    let mut response = client.get(url).send().await?;
    let status = response.status().as_u16();

    // Drain in chunks; the payload is discarded but must be fully received.
    loop {
        match response.chunk().await {
            Ok(Some(_)) => {}
            Ok(None) => return Ok(status),
            Err(source) => {
                return Err(FetchError {
                    status: Some(status),
                    source,
                })
            }
        }
    }
}
