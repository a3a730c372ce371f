//! Classification of per-request failures.
//!
//! Every failed replayed request is reduced to an [`ErrorKind`] whose
//! [`code`](ErrorKind::code) is what gets printed and aggregated: `HTTP_<status>`
//! for non-2xx responses, `TIMEOUT` for deadline overruns and errno-style codes
//! (`ECONNREFUSED`, `ENOTFOUND`, ...) for transport failures.

use std::error::Error as StdError;
use std::fmt;
use std::io;

use crate::client::DnsLookupError;

/// Kinds of failure a replayed request can end with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Response arrived with a status outside 200..300
    Http(u16),

    /// Deadline elapsed before the response was fully read
    Timeout,

    /// Target actively refused the connection
    ConnectionRefused,

    /// Connection reset by the peer
    ConnectionReset,

    /// Connection aborted locally or by the peer
    ConnectionAborted,

    /// Host name could not be resolved
    DnsFailure,

    /// TLS handshake or certificate failure
    Tls,

    /// Recorded URL could not be turned into a request
    InvalidUrl,

    /// Response body failed mid-stream
    Body,

    /// Anything else reqwest reports
    Other,
}

impl ErrorKind {
    /// Categorize a status code. Returns None for 2xx.
    pub fn from_status_code(status_code: u16) -> Option<Self> {
        match status_code {
            200..=299 => None,
            code => Some(ErrorKind::Http(code)),
        }
    }

    /// Categorize a reqwest error by walking its source chain.
    ///
    /// Only error types are inspected. Message text is never matched, since
    /// reqwest's messages embed the request URL.
    pub fn from_reqwest_error(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            return ErrorKind::Timeout;
        }
        if error.is_builder() {
            return ErrorKind::InvalidUrl;
        }

        if let Some(kind) = error.source().and_then(classify_cause) {
            return kind;
        }

        if error.is_body() || error.is_decode() {
            ErrorKind::Body
        } else {
            ErrorKind::Other
        }
    }

    /// Code printed for the failure and used as the aggregation key.
    pub fn code(&self) -> String {
        match self {
            ErrorKind::Http(status) => format!("HTTP_{}", status),
            other => other.static_code().to_string(),
        }
    }

    fn static_code(&self) -> &'static str {
        match self {
            ErrorKind::Http(_) => "HTTP",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::ConnectionRefused => "ECONNREFUSED",
            ErrorKind::ConnectionReset => "ECONNRESET",
            ErrorKind::ConnectionAborted => "ECONNABORTED",
            ErrorKind::DnsFailure => "ENOTFOUND",
            ErrorKind::Tls => "TLS_ERROR",
            ErrorKind::InvalidUrl => "INVALID_URL",
            ErrorKind::Body => "BODY_ERROR",
            ErrorKind::Other => "REQUEST_ERROR",
        }
    }

    /// Bounded Prometheus label for this kind.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Http(status) if (300..400).contains(status) => "http_3xx",
            ErrorKind::Http(status) if (400..500).contains(status) => "http_4xx",
            ErrorKind::Http(status) if (500..600).contains(status) => "http_5xx",
            ErrorKind::Http(_) => "http_other",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted => "connection",
            ErrorKind::DnsFailure => "dns",
            ErrorKind::Tls => "tls",
            ErrorKind::InvalidUrl => "invalid_url",
            ErrorKind::Body => "body",
            ErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Http(status) => write!(f, "HTTP_{}", status),
            other => f.write_str(other.static_code()),
        }
    }
}

/// Finds the most specific transport failure below `cause`.
///
/// io errors are checked before the hyper error wrapping them, so a reset
/// reported by the socket wins over hyper's generic flags.
fn classify_cause(cause: &(dyn StdError + 'static)) -> Option<ErrorKind> {
    if cause.downcast_ref::<DnsLookupError>().is_some() {
        return Some(ErrorKind::DnsFailure);
    }
    if cause.downcast_ref::<rustls::Error>().is_some() {
        return Some(ErrorKind::Tls);
    }

    if let Some(io_err) = cause.downcast_ref::<io::Error>() {
        match io_err.kind() {
            io::ErrorKind::ConnectionRefused => return Some(ErrorKind::ConnectionRefused),
            io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe => {
                return Some(ErrorKind::ConnectionReset)
            }
            io::ErrorKind::ConnectionAborted => return Some(ErrorKind::ConnectionAborted),
            io::ErrorKind::TimedOut => return Some(ErrorKind::Timeout),
            _ => {}
        }
        // `io::Error::source` skips the wrapped error itself; tokio-rustls
        // hides `rustls::Error` there.
        if let Some(kind) = io_err.get_ref().and_then(|inner| classify_cause(inner)) {
            return Some(kind);
        }
    }

    if let Some(kind) = cause.source().and_then(classify_cause) {
        return Some(kind);
    }

    match cause.downcast_ref::<hyper1::Error>() {
        Some(e) if e.is_incomplete_message() || e.is_canceled() => Some(ErrorKind::ConnectionReset),
        Some(e) if e.is_closed() => Some(ErrorKind::ConnectionAborted),
        Some(e) if e.is_timeout() => Some(ErrorKind::Timeout),
        _ => None,
    }
}

/// Joins an error and all of its sources into one line.
///
/// reqwest's own Display stops at "error sending request", which hides the
/// part operators actually need.
pub fn full_message(error: &(dyn StdError + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

/// Human-readable text for a non-2xx status.
pub fn describe_status(status_code: u16) -> String {
    match reqwest::StatusCode::from_u16(status_code)
        .ok()
        .and_then(|s| s.canonical_reason())
    {
        Some(reason) => format!("{} {}", status_code, reason),
        None => status_code.to_string(),
    }
}
