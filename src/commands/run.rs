//! `loader run` and `loader start`: execute a campaign and report.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use indicatif::ProgressBar;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::{RunArgs, StartArgs};
use crate::config::{Campaign, LoadConfig, DEFAULT_REQUEST_COUNT};
use crate::progress;
use crate::runner::Runner;
use crate::stats::Summary;

use super::{open_storage, renderer_for};

const DEFAULT_AGGREGATE_WINDOW: Duration = Duration::from_secs(10);

pub(crate) async fn run(db: &Path, template: &str, args: RunArgs) -> anyhow::Result<()> {
    let campaign = build_campaign(&args)?;

    if let Some(path) = &args.save_config {
        let yaml = serde_yaml::to_string(&campaign.config)?;
        std::fs::write(path, yaml)
            .with_context(|| format!("could not write configuration to {}", path.display()))?;
    }

    let storage = open_storage(db).await?;
    let renderer = renderer_for(&storage, template).await?;

    let saved_uuid = if args.save {
        Some(storage.insert_campaign(&campaign).await?)
    } else {
        None
    };

    print_banner(&campaign);
    let summary = execute(&campaign.config).await?;

    if let Some(uuid) = &saved_uuid {
        storage
            .insert_summary(
                uuid,
                &summary,
                args.summary_description.as_deref().unwrap_or(""),
                args.save_requests_stats,
                args.save_aggregate_requests_stats,
            )
            .await?;
    }

    println!(
        "{}",
        renderer.render_summary(
            &summary,
            args.show_requests_stats,
            args.show_aggregate_requests_stats,
        )?
    );

    if let Some(uuid) = saved_uuid {
        println!("\nNew campaign saved: {}", uuid);
    }

    Ok(())
}

pub(crate) async fn start(db: &Path, template: &str, args: StartArgs) -> anyhow::Result<()> {
    let storage = open_storage(db).await?;
    let renderer = renderer_for(&storage, template).await?;

    let campaign = storage.get_campaign(&args.uuid).await?;

    print_banner(&campaign);
    let summary = execute(&campaign.config).await?;

    let summary_uuid = storage
        .insert_summary(
            &args.uuid,
            &summary,
            args.summary_description.as_deref().unwrap_or(""),
            campaign.config.gather_full_stats,
            campaign.config.gather_aggregated_stats,
        )
        .await?;

    println!(
        "{}",
        renderer.render_summary(
            &summary,
            args.show_requests_stats,
            args.show_aggregate_requests_stats,
        )?
    );
    println!("\nNew summary {} saved for campaign {}", summary_uuid, args.uuid);

    Ok(())
}

/// Builds the effective campaign from the optional config file baseline and
/// the command-line overrides.
pub(crate) fn build_campaign(args: &RunArgs) -> anyhow::Result<Campaign> {
    let mut config = match &args.config {
        Some(path) => LoadConfig::from_file(path)?,
        None => LoadConfig::default(),
    };

    if let Some(host) = &args.host {
        config.url = host.clone();
    }
    if let Some(method) = &args.method {
        config.method = method.to_ascii_uppercase();
    }

    for header in &args.headers {
        config.headers.set(header)?;
    }
    if let Some(cookie) = &args.cookie {
        config.headers.set(&format!("Cookie: {}", cookie))?;
    }
    for parameter in &args.parameters {
        config.params.set(parameter)?;
    }

    if let Some(body) = &args.body {
        config.body = Some(body.clone());
    }
    if let Some(path) = &args.body_file {
        let body = std::fs::read_to_string(path)
            .with_context(|| format!("could not read body file {}", path.display()))?;
        config.body = Some(body);
    }

    if args.insecure {
        config.tls.skip_verify = true;
    }
    if let Some(path) = &args.ca {
        config.tls.ca = Some(read_pem(path, "CA")?);
    }
    if let Some(path) = &args.cert {
        config.tls.cert = Some(read_pem(path, "Cert")?);
    }
    if let Some(path) = &args.key {
        config.tls.key = Some(read_pem(path, "Key")?);
    }

    if let Some(connections) = args.connections {
        config.connections = connections;
    }
    if let Some(requests) = args.requests {
        config.request_count = requests;
    }
    if let Some(duration) = args.duration {
        config.duration = duration;
    }
    if let Some(abort) = args.abort {
        config.abort_after = abort;
    }
    if let Some(rate_limit) = args.rate_limit {
        config.rate_limit = rate_limit;
    }
    if let Some(delay) = args.request_delay {
        config.request_delay = delay;
    }
    if let Some(keep_alive) = args.keep_alive {
        config.keep_alive = keep_alive;
    }
    if let Some(read_timeout) = args.read_timeout {
        config.read_timeout = read_timeout;
    }
    if let Some(write_timeout) = args.write_timeout {
        config.write_timeout = write_timeout;
    }
    if let Some(timeout) = args.timeout {
        config.timeout = timeout;
    }
    if let Some(benchmark_timeout) = args.benchmark_timeout {
        config.benchmark_timeout = benchmark_timeout;
    }
    if let Some(engine) = args.engine {
        config.engine = engine;
    }

    if let Some(window) = args.aggregate_window {
        config.aggregate_window = window;
    } else if config.aggregate_window.is_zero() {
        config.aggregate_window = DEFAULT_AGGREGATE_WINDOW;
    }

    // A run always has a termination condition, and a set duration wins.
    if config.request_count == 0 && config.duration.is_zero() {
        config.request_count = DEFAULT_REQUEST_COUNT;
    }
    if !config.duration.is_zero() {
        config.request_count = 0;
    }

    config.gather_full_stats =
        config.gather_full_stats || args.save_requests_stats || args.show_requests_stats;
    config.gather_aggregated_stats = config.gather_aggregated_stats
        || args.save_aggregate_requests_stats
        || args.show_aggregate_requests_stats;

    let name = args.name.clone().unwrap_or_else(|| {
        format!(
            "Configuration {}",
            Utc::now().format("%a, %d %b %Y %H:%M:%S%.3f")
        )
    });

    Ok(Campaign {
        uuid: None,
        name,
        description: args.description.clone(),
        create_date: None,
        config,
        tags: Vec::new(),
    })
}

fn read_pem(path: &Path, what: &str) -> anyhow::Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("could not read {} file {}", what, path.display()))
}

/// Runs the engine with interrupt handling and a progress bar.
pub(crate) async fn execute(config: &LoadConfig) -> anyhow::Result<Summary> {
    let total = config.effective_request_count();
    let duration = config.duration;

    let mut runner = Runner::new(config.clone())?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received interrupt, stopping benchmark");
                cancel.cancel();
            }
        });
    }

    let mut bar_task = None;
    let mut bar = None;

    if total > 0 {
        // Count-driven run: the progress channel carries one pulse per
        // completed request.
        let (tx, mut rx) = progress::channel(64);
        let progress_bar = ProgressBar::new(total);
        bar = Some(progress_bar.clone());
        bar_task = Some(tokio::spawn(async move {
            while rx.recv().await.is_some() {
                progress_bar.inc(1);
            }
        }));
        runner = runner.with_progress(tx);
    } else if !duration.is_zero() {
        // Duration-driven run: the bar just tracks elapsed time.
        let progress_bar = ProgressBar::new(duration.as_secs().max(1));
        bar = Some(progress_bar.clone());
        bar_task = Some(tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            tick.tick().await;
            loop {
                tick.tick().await;
                progress_bar.inc(1);
                if Some(progress_bar.position()) >= progress_bar.length() {
                    break;
                }
            }
        }));
    }

    let summary = runner.run(cancel).await?;

    if let Some(task) = bar_task {
        task.abort();
    }
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_args() -> RunArgs {
        RunArgs {
            host: Some("http://localhost:8080/ok".to_string()),
            config: None,
            name: None,
            description: "Default loader description".to_string(),
            summary_description: None,
            method: None,
            headers: Vec::new(),
            parameters: Vec::new(),
            cookie: None,
            body_file: None,
            body: None,
            ca: None,
            cert: None,
            key: None,
            insecure: false,
            connections: None,
            requests: None,
            duration: None,
            abort: None,
            rate_limit: None,
            request_delay: None,
            keep_alive: None,
            read_timeout: None,
            write_timeout: None,
            timeout: None,
            benchmark_timeout: None,
            aggregate_window: None,
            engine: None,
            save: false,
            save_requests_stats: false,
            save_aggregate_requests_stats: false,
            show_requests_stats: false,
            show_aggregate_requests_stats: false,
            save_config: None,
        }
    }

    #[test]
    fn defaults_fill_in() {
        let campaign = build_campaign(&empty_args()).unwrap();

        assert_eq!(campaign.config.request_count, DEFAULT_REQUEST_COUNT);
        assert_eq!(campaign.config.aggregate_window, DEFAULT_AGGREGATE_WINDOW);
        assert_eq!(campaign.config.method, "GET");
        assert!(campaign.name.starts_with("Configuration "));
    }

    #[test]
    fn duration_clears_request_count() {
        let mut args = empty_args();
        args.requests = Some(500);
        args.duration = Some(Duration::from_secs(30));

        let campaign = build_campaign(&args).unwrap();
        assert_eq!(campaign.config.request_count, 0);
        assert_eq!(campaign.config.duration, Duration::from_secs(30));
    }

    #[test]
    fn cookie_becomes_a_header() {
        let mut args = empty_args();
        args.cookie = Some("session=abc".to_string());

        let campaign = build_campaign(&args).unwrap();
        assert_eq!(
            campaign.config.headers.lines(),
            vec!["Cookie:session=abc"]
        );
    }

    #[test]
    fn show_flags_imply_gathering() {
        let mut args = empty_args();
        args.show_requests_stats = true;
        args.save_aggregate_requests_stats = true;

        let campaign = build_campaign(&args).unwrap();
        assert!(campaign.config.gather_full_stats);
        assert!(campaign.config.gather_aggregated_stats);
    }

    #[test]
    fn method_is_uppercased() {
        let mut args = empty_args();
        args.method = Some("post".to_string());

        let campaign = build_campaign(&args).unwrap();
        assert_eq!(campaign.config.method, "POST");
    }
}

fn print_banner(campaign: &Campaign) {
    println!("Running loader...");
    println!("  Campaign: {}", campaign.name);
    println!("  Target host: {}", campaign.config.url);
    println!(
        "  Concurrent connections: {}",
        campaign.config.connections
    );
    if campaign.config.effective_request_count() > 0 {
        println!(
            "  Requests count: {}",
            campaign.config.effective_request_count()
        );
    }
    if !campaign.config.duration.is_zero() {
        println!(
            "  Duration: {}",
            humantime::format_duration(campaign.config.duration)
        );
    }
    println!();
}
