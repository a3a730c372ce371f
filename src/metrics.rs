use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use prometheus::{
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::env;
use thiserror::Error;
use tracing::{error, info};

pub const DEFAULT_METRIC_NAMESPACE: &str = "traffic_replay";

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("METRIC_NAMESPACE: invalid value '{0}': expected letters, digits and '_' only, not starting with a digit")]
    InvalidNamespace(String),

    #[error("Failed to register metrics: {0}")]
    Registration(#[from] prometheus::Error),
}

/// Checks that `namespace` can prefix a Prometheus metric name.
pub fn validate_namespace(namespace: &str) -> Result<(), MetricsError> {
    let mut chars = namespace.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(MetricsError::InvalidNamespace(namespace.to_string()))
    }
}

fn configured_namespace() -> Option<String> {
    env::var("METRIC_NAMESPACE")
        .ok()
        .filter(|v| !v.trim().is_empty())
}

lazy_static::lazy_static! {
    /// Namespace every metric is registered under. An invalid
    /// `METRIC_NAMESPACE` falls back to the default here and is reported by
    /// [`register_metrics`].
    pub static ref METRIC_NAMESPACE: String = configured_namespace()
        .filter(|ns| validate_namespace(ns).is_ok())
        .unwrap_or_else(|| DEFAULT_METRIC_NAMESPACE.to_string());

    pub static ref REQUESTS_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("requests_total", "Total number of replayed requests dispatched")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref REQUEST_ERRORS_TOTAL: IntCounterVec =
        IntCounterVec::new(
            Opts::new("request_errors_total", "Number of failed replayed requests by error kind")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["kind"]
        ).unwrap();

    pub static ref REQUESTS_IN_FLIGHT: IntGauge =
        IntGauge::with_opts(
            Opts::new("requests_in_flight", "Number of replayed requests currently in flight")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref REQUEST_DURATION_SECONDS: Histogram =
        Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "request_duration_seconds",
                "Replayed request latencies in seconds."
            ).namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref POOL_ROTATIONS_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("pool_rotations_total", "Number of connection pool rotations")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();
}

/// Registers all metrics with the default Prometheus registry.
///
/// Fails before touching any metric if `METRIC_NAMESPACE` is not a valid
/// metric name prefix.
pub fn register_metrics() -> Result<(), MetricsError> {
    if let Some(namespace) = configured_namespace() {
        validate_namespace(&namespace)?;
    }

    let registry = prometheus::default_registry();
    registry.register(Box::new(REQUESTS_TOTAL.clone()))?;
    registry.register(Box::new(REQUEST_ERRORS_TOTAL.clone()))?;
    registry.register(Box::new(REQUESTS_IN_FLIGHT.clone()))?;
    registry.register(Box::new(REQUEST_DURATION_SECONDS.clone()))?;
    registry.register(Box::new(POOL_ROTATIONS_TOTAL.clone()))?;
    Ok(())
}

/// Encodes everything in `registry` in the Prometheus text format.
pub fn gather_metrics_string(registry: &Registry) -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_else(|e| {
        error!(error = %e, "Metrics output was not UTF-8");
        String::from("# ERROR ENCODING METRICS TO UTF-8")
    })
}

/// HTTP handler for the Prometheus metrics endpoint.
pub async fn metrics_handler(
    _req: Request<Body>,
    registry: Registry,
) -> Result<Response<Body>, hyper::Error> {
    let encoder = TextEncoder::new();
    let mut response = Response::new(Body::from(gather_metrics_string(&registry)));
    if let Ok(content_type) = encoder.format_type().parse::<hyper::header::HeaderValue>() {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, content_type);
    }
    Ok(response)
}

/// Serves the metrics endpoint until the process exits.
pub async fn start_metrics_server(port: u16, registry: Registry) {
    let addr = ([0, 0, 0, 0], port).into();

    let make_svc = make_service_fn(move |_conn| {
        let registry = registry.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                let registry = registry.clone();
                async move { metrics_handler(req, registry).await }
            }))
        }
    });

    let server = match Server::try_bind(&addr) {
        Ok(builder) => builder.serve(make_svc),
        Err(e) => {
            error!(port = port, error = %e, "Failed to bind metrics server");
            return;
        }
    };
    info!(port = port, addr = %addr, "Metrics server listening");

    if let Err(e) = server.await {
        error!(error = %e, "Metrics server error");
    }
}
