//! Command-line definitions.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::config::Engine;
use crate::render;

#[derive(Parser, Debug)]
#[command(
    name = "volley",
    version,
    about = "HTTP load generator with a local campaign database"
)]
pub struct Cli {
    /// Path to the campaign database.
    #[arg(long, global = true, default_value = "volley.db")]
    pub db: PathBuf,

    /// Output template: "default" or the name of a stored template.
    #[arg(long, global = true, default_value = render::DEFAULT_TEMPLATE)]
    pub template: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run and manage load campaigns.
    #[command(subcommand)]
    Loader(LoaderCommand),

    /// Manage campaign tags.
    #[command(subcommand)]
    Tag(TagCommand),

    /// Manage stored output templates.
    #[command(subcommand)]
    Template(TemplateCommand),

    /// Print version information.
    Version,
}

#[derive(Subcommand, Debug)]
pub enum LoaderCommand {
    /// Run an HTTP load campaign.
    Run(RunArgs),

    /// Run a stored campaign and save its summary.
    Start(StartArgs),

    /// Save a campaign to the database without running it.
    Save(RunArgs),

    /// Find stored campaigns and their summaries.
    Find(FindArgs),

    /// Delete a stored campaign with all its summaries.
    Delete(DeleteArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Target host URL.
    #[arg(long)]
    pub host: Option<String>,

    /// Loader configuration file (YAML or JSON) used as the baseline.
    #[arg(short = 'f', long = "config")]
    pub config: Option<PathBuf>,

    /// Campaign name; generated from the current time when omitted.
    #[arg(long)]
    pub name: Option<String>,

    /// Campaign description saved to the database.
    #[arg(long, default_value = "Default loader description")]
    pub description: String,

    /// Custom summary description saved to the database.
    #[arg(long)]
    pub summary_description: Option<String>,

    /// HTTP method.
    #[arg(short, long)]
    pub method: Option<String>,

    /// Header ("Name: value"), can be used multiple times.
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Parameter set ("k1=v1&k2=v2"), can be used multiple times.
    #[arg(short = 'P', long = "parameter")]
    pub parameters: Vec<String>,

    /// Send the data in the HTTP Cookie header.
    #[arg(short = 'b', long)]
    pub cookie: Option<String>,

    /// Path to the request body file.
    #[arg(long)]
    pub body_file: Option<PathBuf>,

    /// Inline request body.
    #[arg(long, conflicts_with = "body_file")]
    pub body: Option<String>,

    /// CA bundle path; when set it is the sole trust root.
    #[arg(long)]
    pub ca: Option<PathBuf>,

    /// Client certificate path.
    #[arg(long)]
    pub cert: Option<PathBuf>,

    /// Client key path.
    #[arg(long)]
    pub key: Option<PathBuf>,

    /// Skip TLS certificate verification.
    #[arg(short = 'i', long)]
    pub insecure: bool,

    /// Concurrent connections.
    #[arg(short = 'c', long)]
    pub connections: Option<usize>,

    /// Requests count.
    #[arg(short = 'r', long)]
    pub requests: Option<u64>,

    /// Run duration; when set the requests count is ignored.
    #[arg(short = 'd', long, value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,

    /// Abort the run after this many failures.
    #[arg(short = 'a', long)]
    pub abort: Option<u64>,

    /// Rate limit in requests per second.
    #[arg(short = 'L', long)]
    pub rate_limit: Option<u32>,

    /// Minimum delay between consecutive requests of one worker.
    #[arg(short = 'D', long, value_parser = humantime::parse_duration)]
    pub request_delay: Option<Duration>,

    /// HTTP keep-alive idle duration.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub keep_alive: Option<Duration>,

    #[arg(long, value_parser = humantime::parse_duration)]
    pub read_timeout: Option<Duration>,

    #[arg(long, value_parser = humantime::parse_duration)]
    pub write_timeout: Option<Duration>,

    /// Overall per-request timeout.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// Hard deadline for count-driven runs.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub benchmark_timeout: Option<Duration>,

    /// Aggregate results into window buckets of this width.
    #[arg(short = 'A', long, value_parser = humantime::parse_duration)]
    pub aggregate_window: Option<Duration>,

    /// HTTP engine.
    #[arg(long, value_enum)]
    pub engine: Option<Engine>,

    /// Save the campaign and its summary to the database.
    #[arg(short = 's', long)]
    pub save: bool,

    /// Save all request stats - HIGH MEMORY USAGE.
    #[arg(long)]
    pub save_requests_stats: bool,

    /// Save aggregated request stats.
    #[arg(long)]
    pub save_aggregate_requests_stats: bool,

    /// Show all gathered request stats.
    #[arg(long)]
    pub show_requests_stats: bool,

    /// Show the aggregated request stats.
    #[arg(long)]
    pub show_aggregate_requests_stats: bool,

    /// Export the effective configuration to a YAML file.
    #[arg(long)]
    pub save_config: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct StartArgs {
    /// UUID of the stored campaign to run.
    #[arg(long)]
    pub uuid: String,

    /// Custom summary description saved to the database.
    #[arg(long)]
    pub summary_description: Option<String>,

    /// Show all gathered request stats.
    #[arg(long)]
    pub show_requests_stats: bool,

    /// Show the aggregated request stats.
    #[arg(long)]
    pub show_aggregate_requests_stats: bool,
}

#[derive(Args, Debug)]
pub struct FindArgs {
    /// Campaign UUID.
    #[arg(long)]
    pub uuid: Option<String>,

    /// Campaign name.
    #[arg(long)]
    pub name: Option<String>,

    /// Tag filter ("key" or "key=value"), can be used multiple times.
    #[arg(short = 't', long = "tag")]
    pub tags: Vec<String>,

    /// Start of the creation-time range (duration ago, or a date).
    #[arg(long)]
    pub from: Option<String>,

    /// End of the creation-time range (duration ago, or a date).
    #[arg(long)]
    pub to: Option<String>,

    /// Maximum number of campaigns (and summaries per campaign).
    #[arg(short = 'l', long, default_value_t = 10)]
    pub limit: i64,

    /// List all campaigns.
    #[arg(long)]
    pub all: bool,

    /// Also list stored summaries.
    #[arg(long)]
    pub summaries: bool,

    /// Include the full per-request stats.
    #[arg(long)]
    pub full_stats: bool,

    /// Include the aggregated window stats.
    #[arg(long)]
    pub aggregated_stats: bool,
}

#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// UUID of the campaign to delete.
    #[arg(long)]
    pub uuid: String,
}

#[derive(Subcommand, Debug)]
pub enum TagCommand {
    /// Attach tags to a campaign.
    Add {
        #[arg(long)]
        uuid: String,

        /// Tag ("key" or "key=value"), can be used multiple times.
        #[arg(short = 't', long = "tag", required = true)]
        tags: Vec<String>,
    },

    /// List the tags of a campaign, or every campaign carrying a tag key.
    Find {
        /// Campaign UUID to list tags for.
        #[arg(long)]
        uuid: Option<String>,

        /// Tag key to look up across all campaigns.
        #[arg(short = 'n', long)]
        name: Option<String>,
    },

    /// Change the value of an existing tag.
    Update {
        #[arg(long)]
        uuid: String,

        #[arg(long)]
        key: String,

        #[arg(long)]
        value: String,
    },

    /// Remove a tag from a campaign.
    Delete {
        #[arg(long)]
        uuid: String,

        #[arg(long)]
        key: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum TemplateCommand {
    /// Store an output template read from a file.
    Add {
        #[arg(long)]
        name: String,

        #[arg(long)]
        file: PathBuf,
    },

    /// Show one or all stored templates.
    Find {
        #[arg(long)]
        name: Option<String>,
    },

    /// Replace the content of a stored template.
    Update {
        #[arg(long)]
        name: String,

        #[arg(long)]
        file: PathBuf,
    },

    /// Delete a stored template.
    Delete {
        #[arg(long)]
        name: String,
    },
}
