//! Summary persistence.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use crate::stats::{AggregatedStat, RequestStat, Summary};

use super::{dur_from_ns, dur_to_ns, from_ns, to_ns, Storage, StorageError};

const INSERT_SUMMARY: &str = "\
INSERT INTO summary (
    uuid, campaign_uuid, description, url, start_time, end_time, total_time_ns,
    req_count, success_req, fail_req, data_transferred, req_per_sec,
    avg_req_time_ns, min_req_time_ns, max_req_time_ns,
    p50_req_time_ns, p75_req_time_ns, p90_req_time_ns, p99_req_time_ns
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
RETURNING uuid";

/// A summary as read back from the database.
#[derive(Debug, Clone)]
pub struct StoredSummary {
    pub uuid: String,
    pub campaign_uuid: String,
    pub description: String,
    pub summary: Summary,
}

/// Query options for listing summaries.
#[derive(Debug, Clone, Default)]
pub struct SummaryQuery {
    /// Maximum rows; non-positive means all.
    pub limit: i64,

    /// Inclusive start-time range.
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,

    /// Also load per-request and aggregated stats.
    pub with_requests: bool,
}

impl Storage {
    /// Saves a summary under a campaign; the full request log and the
    /// aggregated windows are stored only when asked for.
    pub async fn insert_summary(
        &self,
        campaign_uuid: &str,
        summary: &Summary,
        description: &str,
        save_requests: bool,
        save_aggregated: bool,
    ) -> Result<String, StorageError> {
        let mut tx = self.pool().begin().await?;

        let uuid = Uuid::new_v4().to_string();

        let row = sqlx::query(INSERT_SUMMARY)
            .bind(&uuid)
            .bind(campaign_uuid)
            .bind(description)
            .bind(&summary.url)
            .bind(to_ns(&summary.start))
            .bind(to_ns(&summary.end))
            .bind(dur_to_ns(summary.total_time))
            .bind(summary.req_count as i64)
            .bind(summary.success_req as i64)
            .bind(summary.fail_req as i64)
            .bind(summary.data_transferred as i64)
            .bind(summary.req_per_sec)
            .bind(dur_to_ns(summary.avg_req_time))
            .bind(dur_to_ns(summary.min_req_time))
            .bind(dur_to_ns(summary.max_req_time))
            .bind(dur_to_ns(summary.p50_req_time))
            .bind(dur_to_ns(summary.p75_req_time))
            .bind(dur_to_ns(summary.p90_req_time))
            .bind(dur_to_ns(summary.p99_req_time))
            .fetch_optional(&mut *tx)
            .await?;

        let uuid: String = row
            .ok_or(StorageError::EmptyInsertReturn)?
            .try_get("uuid")?;

        for (name, count) in &summary.errors {
            sqlx::query("INSERT INTO summary_error (summary_uuid, name, count) VALUES (?, ?, ?)")
                .bind(&uuid)
                .bind(name)
                .bind(*count as i64)
                .execute(&mut *tx)
                .await?;
        }

        for (code, count) in &summary.http_codes {
            sqlx::query(
                "INSERT INTO summary_http_code (summary_uuid, code, count) VALUES (?, ?, ?)",
            )
            .bind(&uuid)
            .bind(*code as i64)
            .bind(*count as i64)
            .execute(&mut *tx)
            .await?;
        }

        if save_requests {
            for stat in &summary.request_stats {
                sqlx::query(
                    "INSERT INTO request_stat \
                     (summary_uuid, start_time, end_time, duration_ns, body_size, ret_code, error) \
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&uuid)
                .bind(to_ns(&stat.start))
                .bind(to_ns(&stat.end))
                .bind(dur_to_ns(stat.duration))
                .bind(stat.body_size as i64)
                .bind(stat.ret_code as i64)
                .bind(&stat.error)
                .execute(&mut *tx)
                .await?;
            }
        }

        if save_aggregated {
            for agg in &summary.aggregated_stats {
                sqlx::query(
                    "INSERT INTO aggregated_stat \
                     (summary_uuid, start_time, end_time, duration_ns, \
                      min_request_time_ns, max_request_time_ns, sum_request_time_ns, request_count) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&uuid)
                .bind(to_ns(&agg.start))
                .bind(to_ns(&agg.end))
                .bind(dur_to_ns(agg.duration))
                .bind(dur_to_ns(agg.min_request_time))
                .bind(dur_to_ns(agg.max_request_time))
                .bind(dur_to_ns(agg.sum_request_time))
                .bind(agg.request_count as i64)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        debug!(%uuid, campaign_uuid, "summary saved");

        Ok(uuid)
    }

    /// Lists stored summaries for a campaign, newest first.
    pub async fn get_summaries(
        &self,
        campaign_uuid: &str,
        query: &SummaryQuery,
    ) -> Result<Vec<StoredSummary>, StorageError> {
        let limit = if query.limit > 0 { query.limit } else { -1 };

        let rows = match (query.from, query.to) {
            (Some(from), to) => {
                let to = to.unwrap_or_else(Utc::now);
                sqlx::query(
                    "SELECT * FROM summary WHERE campaign_uuid = ? \
                     AND start_time BETWEEN ? AND ? ORDER BY start_time DESC LIMIT ?",
                )
                .bind(campaign_uuid)
                .bind(to_ns(&from))
                .bind(to_ns(&to))
                .bind(limit)
                .fetch_all(self.pool())
                .await?
            }
            _ => {
                sqlx::query(
                    "SELECT * FROM summary WHERE campaign_uuid = ? \
                     ORDER BY start_time DESC LIMIT ?",
                )
                .bind(campaign_uuid)
                .bind(limit)
                .fetch_all(self.pool())
                .await?
            }
        };

        let mut summaries = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut stored = summary_from_row(row)?;
            self.load_histograms(&mut stored).await?;
            if query.with_requests {
                self.load_requests(&mut stored).await?;
            }
            summaries.push(stored);
        }

        Ok(summaries)
    }

    async fn load_histograms(&self, stored: &mut StoredSummary) -> Result<(), StorageError> {
        let mut errors = BTreeMap::new();
        let rows =
            sqlx::query("SELECT name, count FROM summary_error WHERE summary_uuid = ?")
                .bind(&stored.uuid)
                .fetch_all(self.pool())
                .await?;
        for row in &rows {
            errors.insert(
                row.try_get::<String, _>("name")?,
                row.try_get::<i64, _>("count")?.max(0) as u64,
            );
        }
        stored.summary.errors = errors;

        let mut http_codes = BTreeMap::new();
        let rows =
            sqlx::query("SELECT code, count FROM summary_http_code WHERE summary_uuid = ?")
                .bind(&stored.uuid)
                .fetch_all(self.pool())
                .await?;
        for row in &rows {
            http_codes.insert(
                row.try_get::<i64, _>("code")?.max(0) as u16,
                row.try_get::<i64, _>("count")?.max(0) as u64,
            );
        }
        stored.summary.http_codes = http_codes;

        Ok(())
    }

    async fn load_requests(&self, stored: &mut StoredSummary) -> Result<(), StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM request_stat WHERE summary_uuid = ? ORDER BY start_time",
        )
        .bind(&stored.uuid)
        .fetch_all(self.pool())
        .await?;
        stored.summary.request_stats = rows
            .iter()
            .map(request_stat_from_row)
            .collect::<Result<_, _>>()?;

        let rows = sqlx::query(
            "SELECT * FROM aggregated_stat WHERE summary_uuid = ? ORDER BY start_time",
        )
        .bind(&stored.uuid)
        .fetch_all(self.pool())
        .await?;
        stored.summary.aggregated_stats = rows
            .iter()
            .map(aggregated_stat_from_row)
            .collect::<Result<_, _>>()?;

        Ok(())
    }
}

fn summary_from_row(row: &SqliteRow) -> Result<StoredSummary, StorageError> {
    let summary = Summary {
        url: row.try_get("url")?,
        start: from_ns(row.try_get("start_time")?),
        end: from_ns(row.try_get("end_time")?),
        total_time: dur_from_ns(row.try_get("total_time_ns")?),
        req_count: row.try_get::<i64, _>("req_count")?.max(0) as u64,
        success_req: row.try_get::<i64, _>("success_req")?.max(0) as u64,
        fail_req: row.try_get::<i64, _>("fail_req")?.max(0) as u64,
        data_transferred: row.try_get::<i64, _>("data_transferred")?.max(0) as u64,
        req_per_sec: row.try_get("req_per_sec")?,
        avg_req_time: dur_from_ns(row.try_get("avg_req_time_ns")?),
        min_req_time: dur_from_ns(row.try_get("min_req_time_ns")?),
        max_req_time: dur_from_ns(row.try_get("max_req_time_ns")?),
        p50_req_time: dur_from_ns(row.try_get("p50_req_time_ns")?),
        p75_req_time: dur_from_ns(row.try_get("p75_req_time_ns")?),
        p90_req_time: dur_from_ns(row.try_get("p90_req_time_ns")?),
        p99_req_time: dur_from_ns(row.try_get("p99_req_time_ns")?),
        errors: BTreeMap::new(),
        http_codes: BTreeMap::new(),
        aggregated_stats: Vec::new(),
        request_stats: Vec::new(),
    };

    Ok(StoredSummary {
        uuid: row.try_get("uuid")?,
        campaign_uuid: row.try_get("campaign_uuid")?,
        description: row.try_get("description")?,
        summary,
    })
}

fn request_stat_from_row(row: &SqliteRow) -> Result<RequestStat, StorageError> {
    Ok(RequestStat {
        start: from_ns(row.try_get("start_time")?),
        end: from_ns(row.try_get("end_time")?),
        duration: dur_from_ns(row.try_get("duration_ns")?),
        body_size: row.try_get::<i64, _>("body_size")?.max(0) as usize,
        ret_code: row.try_get::<i64, _>("ret_code")?.max(0) as u16,
        error: row.try_get("error")?,
    })
}

fn aggregated_stat_from_row(row: &SqliteRow) -> Result<AggregatedStat, StorageError> {
    Ok(AggregatedStat {
        start: from_ns(row.try_get("start_time")?),
        end: from_ns(row.try_get("end_time")?),
        duration: dur_from_ns(row.try_get("duration_ns")?),
        min_request_time: dur_from_ns(row.try_get("min_request_time_ns")?),
        max_request_time: dur_from_ns(row.try_get("max_request_time_ns")?),
        sum_request_time: dur_from_ns(row.try_get("sum_request_time_ns")?),
        request_count: row.try_get::<i64, _>("request_count")?.max(0) as u64,
    })
}
