//! Result models produced by a load run.
//!
//! A `RequestStat` is emitted per request by the transport, reduced into
//! running aggregates and finally into a `Summary`.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a single HTTP request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestStat {
    /// Wall-clock time the request was sent.
    pub start: DateTime<Utc>,

    /// Wall-clock time the response body was fully drained (or the failure
    /// was observed).
    pub end: DateTime<Utc>,

    /// Monotonic request duration.
    pub duration: Duration,

    /// Response body size in bytes (0 on failure).
    pub body_size: usize,

    /// HTTP status code, 0 when the request failed before a response code
    /// was obtained.
    pub ret_code: u16,

    /// Transport error description; non-empty iff the request failed before
    /// a response code was obtained.
    pub error: String,
}

impl RequestStat {
    /// A request counts as successful when it returned a 2xx code and the
    /// transport reported no error.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.ret_code) && self.error.is_empty()
    }

    /// Builds a failed stat for an error observed before or during the
    /// exchange.
    pub(crate) fn failed(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        duration: Duration,
        error: String,
    ) -> Self {
        Self {
            start,
            end,
            duration,
            body_size: 0,
            ret_code: 0,
            error,
        }
    }
}

/// Request timings bucketed into one fixed-width time window `[start, end)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedStat {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,

    /// `end - start`, except for the last window which is truncated to the
    /// actual end of the run.
    pub duration: Duration,

    pub min_request_time: Duration,
    pub max_request_time: Duration,

    /// Sum of all request durations in the window; renderers divide by
    /// `request_count` to show a mean.
    pub sum_request_time: Duration,

    pub request_count: u64,
}

impl AggregatedStat {
    pub(crate) fn empty(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            duration: Duration::ZERO,
            min_request_time: Duration::ZERO,
            max_request_time: Duration::ZERO,
            sum_request_time: Duration::ZERO,
            request_count: 0,
        }
    }

    pub(crate) fn observe(&mut self, duration: Duration) {
        if self.request_count == 0 {
            self.min_request_time = duration;
            self.max_request_time = duration;
        } else {
            self.min_request_time = self.min_request_time.min(duration);
            self.max_request_time = self.max_request_time.max(duration);
        }
        self.sum_request_time += duration;
        self.request_count += 1;
    }
}

/// Final result of a load run.
///
/// Produced by the reducer after the stats channel closes; a run terminated
/// by cancellation, duration, benchmark timeout, or abort still yields a
/// summary reflecting the work actually completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub url: String,

    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,

    /// Monotonic run duration.
    pub total_time: Duration,

    pub req_count: u64,
    pub success_req: u64,
    pub fail_req: u64,
    pub data_transferred: u64,

    /// Successful requests per second; for runs shorter than a second this
    /// is the raw success count.
    pub req_per_sec: f64,

    pub avg_req_time: Duration,
    pub min_req_time: Duration,
    pub max_req_time: Duration,

    pub p50_req_time: Duration,
    pub p75_req_time: Duration,
    pub p90_req_time: Duration,
    pub p99_req_time: Duration,

    /// Failure counts keyed by error class: the transport error string, or
    /// the canonical status reason phrase for non-2xx responses.
    pub errors: BTreeMap<String, u64>,

    /// Response counts keyed by HTTP status code (failed transports absent).
    pub http_codes: BTreeMap<u16, u64>,

    pub aggregated_stats: Vec<AggregatedStat>,
    pub request_stats: Vec<RequestStat>,
}

/// Canonical reason phrase for an HTTP status code.
pub fn status_reason(code: u16) -> &'static str {
    http::StatusCode::from_u16(code)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown Status")
}
