//! Run orchestration.
//!
//! `Runner` validates the configuration, builds the selected transport,
//! spawns the worker pool and the dispatcher, and reduces the stats stream
//! in the calling task. The dispatcher decides *when* a request may be
//! issued and when the campaign ends; the reducer decides what it all meant.
//!
//! Shutdown is cooperative and one-directional: the dispatcher stops issuing
//! tokens (deadline, cancellation, or abort), dropping the token channel;
//! workers drain it and finish, dropping their stat senders; the closed
//! stats channel is the reducer's signal to finalize. Abort travels the
//! other way as an idempotent `CancellationToken`.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use governor::{Quota, RateLimiter};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{ConfigError, LoadConfig};
use crate::progress::ProgressSender;
use crate::reducer::{RunError, StatsReducer};
use crate::stats::Summary;
use crate::transport::{self, Transport};
use crate::worker::run_worker;

pub struct Runner {
    config: Arc<LoadConfig>,
    transport: Arc<dyn Transport>,
    progress: Option<ProgressSender>,
}

impl Runner {
    /// Validates the configuration and builds the selected transport.
    ///
    /// Fails synchronously, before any task starts.
    pub fn new(config: LoadConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let config = Arc::new(config);
        let transport = transport::build(Arc::clone(&config))?;

        Ok(Self {
            config,
            transport,
            progress: None,
        })
    }

    /// Installs a progress sink receiving one pulse per completed request.
    ///
    /// Only meaningful for count-driven runs, where the total is known.
    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &LoadConfig {
        &self.config
    }

    /// Executes the run to completion and returns the summary.
    ///
    /// A run ended by duration, benchmark timeout, abort, or `cancel` is not
    /// an error: the summary reflects the work actually completed.
    pub async fn run(&self, cancel: CancellationToken) -> Result<Summary, RunError> {
        let connections = self.config.connections;

        // Rendezvous channel at one connection forces tight lockstep; a
        // bounded channel provides backpressure for larger pools.
        let (token_tx, token_rx) = if connections == 1 {
            flume::bounded(0)
        } else {
            flume::bounded(connections)
        };
        let (stat_tx, mut stat_rx) = mpsc::channel(connections);

        let abort = CancellationToken::new();

        let run_start = Utc::now();
        let started = Instant::now();
        let mut reducer = StatsReducer::new(&self.config, run_start)?;

        info!(
            url = %self.config.url,
            connections,
            requests = self.config.effective_request_count(),
            duration = ?self.config.duration,
            engine = %self.config.engine,
            "load run starting"
        );

        let mut workers = Vec::with_capacity(connections);
        for worker_id in 0..connections {
            workers.push(tokio::spawn(run_worker(
                worker_id,
                Arc::clone(&self.transport),
                self.config.request_delay,
                token_rx.clone(),
                stat_tx.clone(),
            )));
        }
        drop(token_rx);
        drop(stat_tx);

        let dispatcher = tokio::spawn(dispatch(
            Arc::clone(&self.config),
            token_tx,
            cancel.clone(),
            abort.clone(),
        ));

        let mut aborted = false;
        loop {
            tokio::select! {
                maybe_stat = stat_rx.recv() => match maybe_stat {
                    Some(stat) => {
                        reducer.observe(stat)?;

                        if let Some(progress) = &self.progress {
                            progress.pulse();
                        }

                        if !aborted && reducer.should_abort() {
                            debug!(fail = reducer.fail_count(), "failure threshold crossed, aborting");
                            abort.cancel();
                            aborted = true;
                        }
                    }
                    None => break,
                },
                _ = cancel.cancelled() => break,
            }
        }

        let end = Utc::now();
        let total_time = started.elapsed();

        // Unblock any worker still trying to report, then wait everything
        // out. In-flight requests are allowed to complete (or hit their own
        // transport timeouts); the dispatcher reacts within one tick.
        drop(stat_rx);

        dispatcher
            .await
            .map_err(|e| RunError::Task(e.to_string()))?;
        for worker in workers {
            worker.await.map_err(|e| RunError::Task(e.to_string()))?;
        }

        let summary = reducer.finalize(end, total_time);

        info!(
            req_count = summary.req_count,
            success = summary.success_req,
            fail = summary.fail_req,
            req_per_sec = summary.req_per_sec,
            "load run finished"
        );

        Ok(summary)
    }
}

/// Token issue loop.
///
/// All termination conditions are merged into one wait set alongside the
/// token hand-off: run duration, benchmark timeout, external cancellation,
/// and the reducer's abort. A stalled worker pool therefore never makes a
/// termination signal unobservable, and the rate-limiter wait stays
/// responsive to shutdown too.
///
/// The hand-off only ever competes with termination signals: if a signal
/// wins the race against an already-accepted token, the loop is breaking
/// anyway and the overshoot is bounded by one. The strict request-count
/// bound is enforced on the counted hand-offs alone.
async fn dispatch(
    config: Arc<LoadConfig>,
    tokens: flume::Sender<()>,
    cancel: CancellationToken,
    abort: CancellationToken,
) {
    let request_count = config.effective_request_count();

    let far_future = Instant::now() + Duration::from_secs(86_400 * 365);
    let duration_deadline = if config.duration.is_zero() {
        far_future
    } else {
        Instant::now() + config.duration
    };
    let timeout_deadline = if config.benchmark_timeout.is_zero() {
        far_future
    } else {
        Instant::now() + config.benchmark_timeout
    };

    let limiter =
        NonZeroU32::new(config.rate_limit).map(|r| RateLimiter::direct(Quota::per_second(r)));

    let mut issued: u64 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = abort.cancelled() => break,
            _ = tokio::time::sleep_until(duration_deadline) => break,
            _ = tokio::time::sleep_until(timeout_deadline) => break,
            sent = tokens.send_async(()) => {
                if sent.is_err() {
                    break;
                }

                if let Some(limiter) = &limiter {
                    // Take an immediately-available slot, otherwise wait on
                    // the bucket while staying responsive to shutdown.
                    if limiter.check().is_err() {
                        tokio::select! {
                            _ = limiter.until_ready() => {}
                            _ = cancel.cancelled() => break,
                            _ = abort.cancelled() => break,
                        }
                    }
                }

                issued += 1;
                if request_count > 0 && issued >= request_count {
                    break;
                }
            }
        }
    }

    debug!(issued, "dispatcher stopping");
    // Dropping the sender closes the token channel; workers drain whatever
    // is buffered and exit.
}
