//! Single-owner statistics reducer.
//!
//! The reducer consumes every `RequestStat` produced by the workers and owns
//! all accumulators: counters, min/max/sum durations, the quantile sketch,
//! the windowed aggregates, the error and status-code histograms, and the
//! optional full request log. Workers never touch any of this state.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hdrhistogram::Histogram;
use thiserror::Error;

use crate::config::LoadConfig;
use crate::stats::{status_reason, AggregatedStat, RequestStat, Summary};

/// Sketch domain: 1 µs to 10 minutes, 3 significant digits.
const SKETCH_LOW_US: u64 = 1;
const SKETCH_HIGH_US: u64 = 600_000_000;
const SKETCH_SIGFIG: u8 = 3;

#[derive(Error, Debug)]
pub enum RunError {
    /// The quantile sketch is invariant-critical; a recording failure aborts
    /// the run.
    #[error("quantile sketch error: {0}")]
    Sketch(String),

    /// A worker or dispatcher task died instead of finishing.
    #[error("task failure: {0}")]
    Task(String),
}

pub(crate) struct StatsReducer {
    url: String,
    run_start: DateTime<Utc>,

    window_ns: i64,
    gather_windows: bool,
    gather_full: bool,
    abort_after: u64,

    success: u64,
    fail: u64,
    data_transferred: u64,

    min_duration: Duration,
    max_duration: Duration,
    sum_duration: Duration,

    sketch: Histogram<u64>,

    agg_stats: Vec<AggregatedStat>,
    errors: BTreeMap<String, u64>,
    http_codes: BTreeMap<u16, u64>,
    request_stats: Vec<RequestStat>,
}

impl StatsReducer {
    pub(crate) fn new(config: &LoadConfig, run_start: DateTime<Utc>) -> Result<Self, RunError> {
        let sketch = Histogram::new_with_bounds(SKETCH_LOW_US, SKETCH_HIGH_US, SKETCH_SIGFIG)
            .map_err(|e| RunError::Sketch(e.to_string()))?;

        let gather_windows = !config.aggregate_window.is_zero() && config.gather_aggregated_stats;
        let window_ns = config.aggregate_window.as_nanos().min(i64::MAX as u128) as i64;

        let mut agg_stats = Vec::new();
        if gather_windows {
            agg_stats.push(AggregatedStat::empty(
                run_start,
                run_start + chrono::Duration::nanoseconds(window_ns),
            ));
        }

        Ok(Self {
            url: config.url.clone(),
            run_start,
            window_ns,
            gather_windows,
            gather_full: config.gather_full_stats,
            abort_after: config.abort_after,
            success: 0,
            fail: 0,
            data_transferred: 0,
            min_duration: Duration::ZERO,
            max_duration: Duration::ZERO,
            sum_duration: Duration::ZERO,
            sketch,
            agg_stats,
            errors: BTreeMap::new(),
            http_codes: BTreeMap::new(),
            request_stats: Vec::new(),
        })
    }

    /// Folds one stat into the accumulators.
    pub(crate) fn observe(&mut self, stat: RequestStat) -> Result<(), RunError> {
        if self.req_count() == 0 {
            self.min_duration = stat.duration;
            self.max_duration = stat.duration;
        } else {
            self.min_duration = self.min_duration.min(stat.duration);
            self.max_duration = self.max_duration.max(stat.duration);
        }
        self.sum_duration += stat.duration;

        let micros = (stat.duration.as_micros() as u64).clamp(SKETCH_LOW_US, SKETCH_HIGH_US);
        self.sketch
            .record(micros)
            .map_err(|e| RunError::Sketch(e.to_string()))?;

        if self.gather_windows {
            self.aggregate(&stat);
        }

        if stat.is_success() {
            self.success += 1;
            self.data_transferred += stat.body_size as u64;
        } else {
            self.fail += 1;
            let err_class = if stat.error.is_empty() {
                status_reason(stat.ret_code).to_string()
            } else {
                stat.error.clone()
            };
            *self.errors.entry(err_class).or_insert(0) += 1;
        }

        if stat.error.is_empty() {
            *self.http_codes.entry(stat.ret_code).or_insert(0) += 1;
        }

        if self.gather_full {
            self.request_stats.push(stat);
        }

        Ok(())
    }

    /// Buckets the stat into its aggregation window, appending empty windows
    /// as needed. A start preceding the run start (clock skew) maps to
    /// window 0.
    fn aggregate(&mut self, stat: &RequestStat) {
        let offset_ns = stat
            .start
            .signed_duration_since(self.run_start)
            .num_nanoseconds()
            .unwrap_or(0)
            .max(0);
        let win = (offset_ns / self.window_ns) as usize;

        while self.agg_stats.len() <= win {
            let k = self.agg_stats.len() as i64;
            let start = self.run_start + chrono::Duration::nanoseconds(self.window_ns * k);
            let end = self.run_start + chrono::Duration::nanoseconds(self.window_ns * (k + 1));
            self.agg_stats.push(AggregatedStat::empty(start, end));
        }

        self.agg_stats[win].observe(stat.duration);
    }

    pub(crate) fn fail_count(&self) -> u64 {
        self.fail
    }

    fn req_count(&self) -> u64 {
        self.success + self.fail
    }

    /// Whether the abort-after-failures threshold has been crossed.
    pub(crate) fn should_abort(&self) -> bool {
        self.abort_after > 0 && self.fail >= self.abort_after
    }

    /// Closes the books: window durations, quantiles, averages, throughput.
    pub(crate) fn finalize(mut self, end: DateTime<Utc>, total_time: Duration) -> Summary {
        let last = self.agg_stats.len().saturating_sub(1);
        for (i, agg) in self.agg_stats.iter_mut().enumerate() {
            let window_end = if i < last { agg.end } else { end };
            agg.duration = window_end
                .signed_duration_since(agg.start)
                .to_std()
                .unwrap_or(Duration::ZERO);
        }

        let p50 = Duration::from_micros(self.sketch.value_at_quantile(0.50));
        let p75 = Duration::from_micros(self.sketch.value_at_quantile(0.75));
        let p90 = Duration::from_micros(self.sketch.value_at_quantile(0.90));
        let p99 = Duration::from_micros(self.sketch.value_at_quantile(0.99));

        // The accumulator sums every observed duration but divides by the
        // success count; see DESIGN.md.
        let avg = if self.success > 0 {
            self.sum_duration / self.success as u32
        } else {
            Duration::ZERO
        };

        let req_per_sec = if total_time > Duration::from_secs(1) {
            self.success as f64 / total_time.as_secs_f64()
        } else {
            self.success as f64
        };

        Summary {
            url: self.url,
            start: self.run_start,
            end,
            total_time,
            req_count: self.success + self.fail,
            success_req: self.success,
            fail_req: self.fail,
            data_transferred: self.data_transferred,
            req_per_sec,
            avg_req_time: avg,
            min_req_time: self.min_duration,
            max_req_time: self.max_duration,
            p50_req_time: p50,
            p75_req_time: p75,
            p90_req_time: p90,
            p99_req_time: p99,
            errors: self.errors,
            http_codes: self.http_codes,
            aggregated_stats: self.agg_stats,
            request_stats: self.request_stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LoadConfig {
        LoadConfig {
            url: "http://localhost:8080/ok".to_string(),
            request_count: 10,
            ..Default::default()
        }
    }

    fn stat(start: DateTime<Utc>, duration: Duration, ret_code: u16, error: &str) -> RequestStat {
        RequestStat {
            start,
            end: start + chrono::Duration::from_std(duration).unwrap(),
            duration,
            body_size: if (200..300).contains(&ret_code) { 2 } else { 0 },
            ret_code,
            error: error.to_string(),
        }
    }

    #[test]
    fn counts_and_histograms() {
        let start = Utc::now();
        let mut reducer = StatsReducer::new(&config(), start).unwrap();

        reducer
            .observe(stat(start, Duration::from_millis(10), 200, ""))
            .unwrap();
        reducer
            .observe(stat(start, Duration::from_millis(20), 404, ""))
            .unwrap();
        reducer
            .observe(stat(start, Duration::from_millis(30), 0, "connection refused"))
            .unwrap();

        let summary = reducer.finalize(Utc::now(), Duration::from_millis(60));

        assert_eq!(summary.req_count, 3);
        assert_eq!(summary.success_req, 1);
        assert_eq!(summary.fail_req, 2);
        assert_eq!(summary.data_transferred, 2);

        assert_eq!(summary.errors["Not Found"], 1);
        assert_eq!(summary.errors["connection refused"], 1);
        assert_eq!(summary.errors.values().sum::<u64>(), summary.fail_req);

        // Transport failures with no response never show up in http_codes.
        assert_eq!(summary.http_codes.get(&0), None);
        assert_eq!(summary.http_codes[&200], 1);
        assert_eq!(summary.http_codes[&404], 1);
    }

    #[test]
    fn min_max_avg_rule() {
        let start = Utc::now();
        let mut reducer = StatsReducer::new(&config(), start).unwrap();

        reducer
            .observe(stat(start, Duration::from_millis(10), 200, ""))
            .unwrap();
        reducer
            .observe(stat(start, Duration::from_millis(30), 200, ""))
            .unwrap();
        reducer
            .observe(stat(start, Duration::from_millis(20), 500, ""))
            .unwrap();

        let summary = reducer.finalize(Utc::now(), Duration::from_millis(60));

        assert_eq!(summary.min_req_time, Duration::from_millis(10));
        assert_eq!(summary.max_req_time, Duration::from_millis(30));
        // Sum over all durations (60ms) divided by the success count (2).
        assert_eq!(summary.avg_req_time, Duration::from_millis(30));
        assert!(summary.min_req_time <= summary.avg_req_time);
        assert!(summary.avg_req_time <= summary.max_req_time);
    }

    #[test]
    fn avg_is_zero_without_successes() {
        let start = Utc::now();
        let mut reducer = StatsReducer::new(&config(), start).unwrap();

        reducer
            .observe(stat(start, Duration::from_millis(10), 404, ""))
            .unwrap();

        let summary = reducer.finalize(Utc::now(), Duration::from_millis(20));
        assert_eq!(summary.avg_req_time, Duration::ZERO);
    }

    #[test]
    fn quantiles_are_ordered() {
        let start = Utc::now();
        let mut reducer = StatsReducer::new(&config(), start).unwrap();

        for i in 1..=100u64 {
            reducer
                .observe(stat(start, Duration::from_millis(i), 200, ""))
                .unwrap();
        }

        let summary = reducer.finalize(Utc::now(), Duration::from_secs(2));

        assert!(summary.p50_req_time <= summary.p75_req_time);
        assert!(summary.p75_req_time <= summary.p90_req_time);
        assert!(summary.p90_req_time <= summary.p99_req_time);
        // The sketch keeps 3 significant digits; the median of 1..=100 ms is
        // within a millisecond of 50ms.
        assert!(summary.p50_req_time >= Duration::from_millis(49));
        assert!(summary.p50_req_time <= Duration::from_millis(52));
    }

    #[test]
    fn windows_are_appended_and_truncated() {
        let start = Utc::now();
        let cfg = LoadConfig {
            aggregate_window: Duration::from_secs(10),
            gather_aggregated_stats: true,
            ..config()
        };
        let mut reducer = StatsReducer::new(&cfg, start).unwrap();

        // Window 0, window 2 (skipping window 1) and a skewed start.
        reducer
            .observe(stat(start, Duration::from_millis(5), 200, ""))
            .unwrap();
        reducer
            .observe(stat(
                start + chrono::Duration::seconds(25),
                Duration::from_millis(7),
                200,
                "",
            ))
            .unwrap();
        reducer
            .observe(stat(
                start - chrono::Duration::seconds(3),
                Duration::from_millis(9),
                200,
                "",
            ))
            .unwrap();

        let end = start + chrono::Duration::seconds(27);
        let summary = reducer.finalize(end, Duration::from_secs(27));

        assert_eq!(summary.aggregated_stats.len(), 3);
        assert_eq!(summary.aggregated_stats[0].request_count, 2);
        assert_eq!(summary.aggregated_stats[1].request_count, 0);
        assert_eq!(summary.aggregated_stats[2].request_count, 1);

        // Full-width windows keep end - start; the last is truncated to the
        // actual end of the run.
        assert_eq!(summary.aggregated_stats[0].duration, Duration::from_secs(10));
        assert_eq!(summary.aggregated_stats[1].duration, Duration::from_secs(10));
        assert_eq!(summary.aggregated_stats[2].duration, Duration::from_secs(7));
    }

    #[test]
    fn windowing_disabled_without_flag() {
        let start = Utc::now();
        let cfg = LoadConfig {
            aggregate_window: Duration::from_secs(10),
            gather_aggregated_stats: false,
            ..config()
        };
        let mut reducer = StatsReducer::new(&cfg, start).unwrap();
        reducer
            .observe(stat(start, Duration::from_millis(5), 200, ""))
            .unwrap();

        let summary = reducer.finalize(Utc::now(), Duration::from_secs(1));
        assert!(summary.aggregated_stats.is_empty());
    }

    #[test]
    fn full_log_kept_when_requested() {
        let start = Utc::now();
        let cfg = LoadConfig {
            gather_full_stats: true,
            ..config()
        };
        let mut reducer = StatsReducer::new(&cfg, start).unwrap();

        for _ in 0..5 {
            reducer
                .observe(stat(start, Duration::from_millis(5), 200, ""))
                .unwrap();
        }

        let summary = reducer.finalize(Utc::now(), Duration::from_secs(1));
        assert_eq!(summary.request_stats.len(), 5);
        assert_eq!(summary.request_stats.len() as u64, summary.req_count);
    }

    #[test]
    fn abort_threshold() {
        let start = Utc::now();
        let cfg = LoadConfig {
            abort_after: 2,
            ..config()
        };
        let mut reducer = StatsReducer::new(&cfg, start).unwrap();

        reducer
            .observe(stat(start, Duration::from_millis(5), 404, ""))
            .unwrap();
        assert!(!reducer.should_abort());

        reducer
            .observe(stat(start, Duration::from_millis(5), 404, ""))
            .unwrap();
        assert!(reducer.should_abort());
        assert_eq!(reducer.fail_count(), 2);
    }

    #[test]
    fn aggregation_is_idempotent_under_replay() {
        let start = Utc::now();
        let cfg = LoadConfig {
            aggregate_window: Duration::from_secs(5),
            gather_aggregated_stats: true,
            gather_full_stats: true,
            ..config()
        };

        let stats: Vec<RequestStat> = (0..20)
            .map(|i| {
                stat(
                    start + chrono::Duration::seconds(i),
                    Duration::from_millis(10 + i as u64),
                    if i % 4 == 0 { 500 } else { 200 },
                    "",
                )
            })
            .collect();

        let end = start + chrono::Duration::seconds(20);

        let mut first = StatsReducer::new(&cfg, start).unwrap();
        for s in &stats {
            first.observe(s.clone()).unwrap();
        }
        let first = first.finalize(end, Duration::from_secs(20));

        // Replaying the recorded request log yields identical aggregates.
        let mut second = StatsReducer::new(&cfg, start).unwrap();
        for s in &first.request_stats {
            second.observe(s.clone()).unwrap();
        }
        let second = second.finalize(end, Duration::from_secs(20));

        assert_eq!(first.req_count, second.req_count);
        assert_eq!(first.errors, second.errors);
        assert_eq!(first.http_codes, second.http_codes);
        assert_eq!(
            first.aggregated_stats.len(),
            second.aggregated_stats.len()
        );
        for (a, b) in first
            .aggregated_stats
            .iter()
            .zip(second.aggregated_stats.iter())
        {
            assert_eq!(a.request_count, b.request_count);
            assert_eq!(a.min_request_time, b.min_request_time);
            assert_eq!(a.max_request_time, b.max_request_time);
            assert_eq!(a.sum_request_time, b.sum_request_time);
        }
    }
}
