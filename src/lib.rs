pub mod client;
pub mod config;
pub mod connection_pool;
pub mod errors;
pub mod executor;
pub mod histogram;
pub mod metrics;
pub mod record_stream;
pub mod report;
pub mod scheduler;
pub mod tracker;
pub mod url_transform;
pub mod utils;
