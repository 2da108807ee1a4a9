//! HTTP load generator with a local campaign database.
//!
//! The engine turns a [`config::LoadConfig`] into a stream of HTTP requests
//! executed by a worker pool and reduces the outcomes into a
//! [`stats::Summary`]. Around it: SQLite persistence of campaigns and
//! summaries, tera-based output templates, and a clap CLI.

pub mod cli;
pub mod commands;
pub mod config;
pub mod progress;
pub mod reducer;
pub mod render;
pub mod runner;
pub mod stats;
pub mod storage;
pub mod timespec;
pub mod transport;

mod worker;

pub use config::{Campaign, ConfigError, Engine, LoadConfig, Tag};
pub use reducer::RunError;
pub use runner::Runner;
pub use stats::{AggregatedStat, RequestStat, Summary};
