use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::client::ClientConfig;
use crate::connection_pool::PoolConfig;
use crate::metrics::validate_namespace;
use crate::scheduler::ReplaySettings;
use crate::utils::{parse_bool_flag, parse_duration_string};

/// Default per-request deadline.
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("No replay file given: pass it as the first argument or set REPLAY_FILE")]
    MissingReplayFile,

    #[error("{var}: invalid value '{value}': {message}")]
    Invalid {
        var: &'static str,
        value: String,
        message: String,
    },
}

fn invalid(var: &'static str, value: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        message: message.into(),
    }
}

/// How the final statistics block is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

/// Main configuration for a replay run.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub replay_file: PathBuf,
    pub timeout: Duration,
    pub accelerator: f64,
    pub target_host: Option<String>,
    pub no_cache: bool,
    pub skip_header: bool,
    pub skip_tls_verify: bool,
    pub reset_connections: Option<u64>,
    pub limit: Option<usize>,
    pub custom_headers: Option<String>,
    pub metrics_port: Option<u16>,
    pub report_format: ReportFormat,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// `replay_file_arg` (the first positional argument) takes precedence
    /// over `REPLAY_FILE`.
    pub fn from_env(replay_file_arg: Option<String>) -> Result<Self, ConfigError> {
        let replay_file = replay_file_arg
            .or_else(|| env_opt("REPLAY_FILE"))
            .map(PathBuf::from)
            .ok_or(ConfigError::MissingReplayFile)?;

        let timeout = match env_opt("REQUEST_TIMEOUT") {
            Some(value) => {
                let timeout = parse_duration_string(&value)
                    .map_err(|e| invalid("REQUEST_TIMEOUT", &value, e))?;
                if timeout.is_zero() {
                    return Err(invalid("REQUEST_TIMEOUT", &value, "must be greater than 0"));
                }
                timeout
            }
            None => Duration::from_millis(DEFAULT_TIMEOUT_MS),
        };

        let accelerator = match env_opt("ACCELERATOR") {
            Some(value) => {
                let accelerator: f64 = value
                    .trim()
                    .parse()
                    .map_err(|_| invalid("ACCELERATOR", &value, "must be a number"))?;
                if !accelerator.is_finite() || accelerator <= 0.0 {
                    return Err(invalid(
                        "ACCELERATOR",
                        &value,
                        "must be a finite number greater than 0",
                    ));
                }
                accelerator
            }
            None => 1.0,
        };

        let reset_connections = env_opt("RESET_CONNECTIONS")
            .map(|value| parse_positive("RESET_CONNECTIONS", &value))
            .transpose()?;

        let limit = env_opt("LIMIT")
            .map(|value| parse_positive("LIMIT", &value).map(|n| n as usize))
            .transpose()?;

        let metrics_port = env_opt("METRICS_PORT")
            .map(|value| {
                value
                    .trim()
                    .parse::<u16>()
                    .map_err(|_| invalid("METRICS_PORT", &value, "must be a valid port"))
            })
            .transpose()?;

        if let Some(namespace) = env_opt("METRIC_NAMESPACE") {
            validate_namespace(&namespace).map_err(|_| {
                invalid(
                    "METRIC_NAMESPACE",
                    &namespace,
                    "expected letters, digits and '_' only, not starting with a digit",
                )
            })?;
        }

        let report_format = match env_opt("REPORT_FORMAT") {
            Some(value) => match value.trim().to_lowercase().as_str() {
                "text" => ReportFormat::Text,
                "json" => ReportFormat::Json,
                _ => return Err(invalid("REPORT_FORMAT", &value, "expected 'text' or 'json'")),
            },
            None => ReportFormat::Text,
        };

        Ok(Config {
            replay_file,
            timeout,
            accelerator,
            target_host: env_opt("TARGET_HOST"),
            no_cache: env_flag("NO_CACHE"),
            skip_header: env_flag("SKIP_HEADER"),
            skip_tls_verify: env_flag("SKIP_TLS_VERIFY"),
            reset_connections,
            limit,
            custom_headers: env_opt("CUSTOM_HEADERS"),
            metrics_port,
            report_format,
        })
    }

    /// Creates a ClientConfig from this Config.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            skip_tls_verify: self.skip_tls_verify,
            custom_headers: self.custom_headers.clone(),
            pool_config: PoolConfig::default(),
        }
    }

    /// Scheduler settings from this Config.
    pub fn to_replay_settings(&self) -> ReplaySettings {
        ReplaySettings {
            timeout: self.timeout,
            accelerator: self.accelerator,
            host: self.target_host.clone(),
            no_cache: self.no_cache,
            limit: self.limit,
        }
    }

    /// Prints the configuration summary.
    pub fn print_summary(&self) {
        println!("Starting replay:");
        println!("  Replay file: {}", self.replay_file.display());
        println!("  Request timeout: {}ms", self.timeout.as_millis());
        println!("  Accelerator: {}", self.accelerator);
        if let Some(ref host) = self.target_host {
            println!("  Target host override: {}", host);
        }
        println!("  Cache busting: {}", self.no_cache);
        println!("  Skip header: {}", self.skip_header);
        println!("  Skip TLS Verify: {}", self.skip_tls_verify);
        match self.reset_connections {
            Some(n) => println!("  Reset connections every {} requests", n),
            None => println!("  Reset connections: never"),
        }
        if let Some(limit) = self.limit {
            println!("  Limit: {} records", limit);
        }
    }
}

/// Prints the environment variables the binary understands.
pub fn print_config_help() {
    eprintln!("Usage: traffic_replay <replay-file.csv>");
    eprintln!();
    eprintln!("Input: one 'timestamp,url' record per line, timestamp in epoch milliseconds.");
    eprintln!();
    eprintln!("Optional environment variables:");
    eprintln!("  REPLAY_FILE        - Replay file path when no argument is given");
    eprintln!("  REQUEST_TIMEOUT    - Per-request timeout in ms, or 30s/2m (default: 60000)");
    eprintln!("  ACCELERATOR        - Divide recorded delays by this factor (default: 1)");
    eprintln!("  TARGET_HOST        - Replace host[:port] of every URL");
    eprintln!("  NO_CACHE           - Add cache=false to every URL (default: false)");
    eprintln!("  SKIP_HEADER        - Skip the first line of the file (default: false)");
    eprintln!("  SKIP_TLS_VERIFY    - Skip TLS certificate verification (default: false)");
    eprintln!("  RESET_CONNECTIONS  - Rotate the connection pool every N requests");
    eprintln!("  LIMIT              - Replay at most N records");
    eprintln!("  CUSTOM_HEADERS     - Comma-separated headers (use \\, for literal commas)");
    eprintln!("  METRICS_PORT       - Serve Prometheus metrics on this port during the run");
    eprintln!("  METRIC_NAMESPACE   - Prometheus metric namespace (default: traffic_replay)");
    eprintln!("  REPORT_FORMAT      - text or json (default: text)");
    eprintln!("  LOG_FORMAT         - text or json (default: text)");
}

fn env_opt(var: &str) -> Option<String> {
    env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn env_flag(var: &str) -> bool {
    env_opt(var).map(|v| parse_bool_flag(&v)).unwrap_or(false)
}

fn parse_positive(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(invalid(var, value, "must be an integer greater than 0")),
    }
}
