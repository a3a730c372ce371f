use std::env;
use std::process;

use tracing::error;
use tracing_subscriber::EnvFilter;

use traffic_replay::client::log_client_config;
use traffic_replay::config::{print_config_help, Config, ReportFormat};
use traffic_replay::connection_pool::PoolManager;
use traffic_replay::metrics::{register_metrics, start_metrics_server};
use traffic_replay::record_stream::RecordStream;
use traffic_replay::report::RunReport;
use traffic_replay::scheduler::{run_replay, ReplaySummary};

/// Logs go to stderr so stdout carries only request lines and the report.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let json = env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_report(report: &RunReport, format: ReportFormat) {
    match format {
        ReportFormat::Text => println!("\n{}", report),
        ReportFormat::Json => match report.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!(error = %e, "Failed to render JSON report, falling back to text");
                println!("\n{}", report);
            }
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();

    let first_arg = env::args().nth(1);
    if matches!(first_arg.as_deref(), Some("-h") | Some("--help")) {
        print_config_help();
        return Ok(());
    }

    let config = match Config::from_env(first_arg) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}\n", e);
            print_config_help();
            process::exit(1);
        }
    };

    if let Err(e) = register_metrics() {
        eprintln!("Metrics setup error: {}", e);
        process::exit(1);
    }

    let client_config = config.to_client_config();
    log_client_config(&client_config);
    let pool = PoolManager::new(client_config, config.reset_connections)?;

    config.print_summary();

    if let Some(port) = config.metrics_port {
        let registry = prometheus::default_registry().clone();
        tokio::spawn(async move {
            start_metrics_server(port, registry).await;
        });
    }

    let records = match RecordStream::from_path(&config.replay_file, config.skip_header) {
        Ok(records) => records,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    match run_replay(records, &config.to_replay_settings(), &pool).await {
        Ok(ReplaySummary::NoRequests) => println!("No requests found"),
        Ok(ReplaySummary::Completed(report)) => print_report(&report, config.report_format),
        Err(e) => {
            eprintln!("Replay failed: {}", e);
            process::exit(1);
        }
    }

    Ok(())
}
