use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::connection_pool::PoolConfig;
use crate::utils::parse_headers_with_escapes;

/// Errors raised while building an HTTP client.
#[derive(Error, Debug)]
pub enum ClientBuildError {
    #[error("Invalid header format in CUSTOM_HEADERS: '{0}'. Expected 'Name:Value'.")]
    HeaderFormat(String),

    #[error("Invalid header name '{name}': {source}")]
    HeaderName {
        name: String,
        #[source]
        source: reqwest::header::InvalidHeaderName,
    },

    #[error("Invalid header value for '{name}': {source}")]
    HeaderValue {
        name: String,
        #[source]
        source: reqwest::header::InvalidHeaderValue,
    },

    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// A host name that could not be resolved.
#[derive(Error, Debug)]
#[error("failed to resolve '{host}': {source}")]
pub struct DnsLookupError {
    pub host: String,
    #[source]
    pub source: std::io::Error,
}

/// System resolver whose failures carry a [`DnsLookupError`], so they can be
/// told apart from connect errors by type.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl Resolve for SystemResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let host = name.as_str().to_string();
        Box::pin(async move {
            match tokio::net::lookup_host((host.as_str(), 0)).await {
                Ok(addrs) => {
                    let addrs: Vec<_> = addrs.collect();
                    Ok(Box::new(addrs.into_iter()) as Addrs)
                }
                Err(source) => {
                    let err: Box<dyn std::error::Error + Send + Sync> =
                        Box::new(DnsLookupError {
                            host: host.clone(),
                            source,
                        });
                    Err(err)
                }
            }
        })
    }
}

/// Configuration for building the HTTP client behind each connection pool.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub skip_tls_verify: bool,
    pub custom_headers: Option<String>,
    pub pool_config: PoolConfig,
}

impl ClientConfig {
    /// Parses the custom headers once so configuration errors surface early.
    pub fn parsed_headers(&self) -> Result<HeaderMap, ClientBuildError> {
        configure_custom_headers(self.custom_headers.as_deref())
    }
}

/// Builds a reqwest client with its own connection pool.
///
/// Redirects are never followed: a recorded 3xx must be replayed as a 3xx.
pub fn build_client(config: &ClientConfig) -> Result<reqwest::Client, ClientBuildError> {
    let mut client_builder = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .dns_resolver(Arc::new(SystemResolver));

    let parsed_headers = config.parsed_headers()?;
    if !parsed_headers.is_empty() {
        client_builder = client_builder.default_headers(parsed_headers);
    }

    client_builder = config.pool_config.apply_to_builder(client_builder);

    if config.skip_tls_verify {
        client_builder = client_builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true);
    }

    Ok(client_builder.build()?)
}

/// Logs the client-related settings once at startup.
pub fn log_client_config(config: &ClientConfig) {
    if config.skip_tls_verify {
        warn!("Skipping TLS certificate verification");
    }
    match config.parsed_headers() {
        Ok(headers) if !headers.is_empty() => {
            for (name, value) in headers.iter() {
                info!(
                    header = %name,
                    value = value.to_str().unwrap_or("<non-ASCII or sensitive value>"),
                    "Custom header configured"
                );
            }
        }
        _ => {}
    }
    info!(
        max_idle_per_host = config.pool_config.max_idle_per_host,
        idle_timeout = ?config.pool_config.idle_timeout,
        "Connection pool configured"
    );
}

fn configure_custom_headers(
    custom_headers_str: Option<&str>,
) -> Result<HeaderMap, ClientBuildError> {
    let mut parsed_headers = HeaderMap::new();

    let headers_str = match custom_headers_str {
        Some(s) if !s.is_empty() => s,
        _ => return Ok(parsed_headers),
    };

    for header_pair_str in parse_headers_with_escapes(headers_str) {
        let header_pair_str_trimmed = header_pair_str.trim();
        if header_pair_str_trimmed.is_empty() {
            continue;
        }

        let (name_str, value_str) = match header_pair_str_trimmed.split_once(':') {
            Some((name, value)) if !name.trim().is_empty() => (name.trim(), value.trim()),
            _ => {
                return Err(ClientBuildError::HeaderFormat(
                    header_pair_str_trimmed.to_string(),
                ))
            }
        };

        let header_name =
            HeaderName::from_str(name_str).map_err(|source| ClientBuildError::HeaderName {
                name: name_str.to_string(),
                source,
            })?;
        let header_value =
            HeaderValue::from_str(value_str).map_err(|source| ClientBuildError::HeaderValue {
                name: name_str.to_string(),
                source,
            })?;

        parsed_headers.insert(header_name, header_value);
    }

    Ok(parsed_headers)
}
