//! Worker task: one token in, one `RequestStat` out.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::stats::RequestStat;
use crate::transport::Transport;

/// Runs a single worker until the token channel closes.
///
/// For every token received the worker enforces the per-worker request delay
/// (measured from the completion of its previous request), performs one
/// request, and hands the stat to the reducer. Within one worker stats are
/// emitted in issue order.
pub(crate) async fn run_worker(
    worker_id: usize,
    transport: Arc<dyn Transport>,
    request_delay: Duration,
    tokens: flume::Receiver<()>,
    stats: mpsc::Sender<RequestStat>,
) {
    debug!(worker_id, "worker starting");

    let mut last_request: Option<Instant> = None;

    while tokens.recv_async().await.is_ok() {
        if let Some(prev) = last_request {
            if !request_delay.is_zero() {
                // sleep_until returns immediately when the deadline passed.
                tokio::time::sleep_until(prev + request_delay).await;
            }
        }

        let stat = transport.request().await;
        last_request = Some(Instant::now());

        if stats.send(stat).await.is_err() {
            // Reducer is gone; nothing left to report to.
            break;
        }
    }

    debug!(worker_id, "worker stopping");
}
