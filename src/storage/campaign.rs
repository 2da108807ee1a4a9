//! Campaign (stored load configuration) persistence, including tags.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use crate::config::{Campaign, Engine, Headers, LoadConfig, ParamSets, Tag, TlsOptions};

use super::{dur_from_ns, dur_to_ns, from_ns, on_unique_violation, to_ns, Storage, StorageError};

const INSERT_CAMPAIGN: &str = "\
INSERT INTO campaign (
    uuid, name, description, url, method, engine, create_date,
    skip_verify, ca, cert, key, body,
    gather_full_stats, gather_aggregated_stats,
    request_count, abort_after, connections, rate_limit,
    duration_ns, benchmark_timeout_ns, aggregate_window_ns,
    keep_alive_ns, request_delay_ns, read_timeout_ns, write_timeout_ns, timeout_ns
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
RETURNING uuid";

const SELECT_CAMPAIGN: &str = "SELECT * FROM campaign";

impl Storage {
    /// Saves a campaign with its headers, parameter sets and tags.
    ///
    /// Assigns a fresh UUID when the campaign has none. A duplicate
    /// name+URL pair is reported as [`StorageError::DuplicateCampaign`].
    pub async fn insert_campaign(&self, campaign: &Campaign) -> Result<String, StorageError> {
        let mut tx = self.pool().begin().await?;

        let uuid = campaign
            .uuid
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let create_date = campaign.create_date.unwrap_or_else(Utc::now);
        let config = &campaign.config;

        let row = sqlx::query(INSERT_CAMPAIGN)
            .bind(&uuid)
            .bind(&campaign.name)
            .bind(&campaign.description)
            .bind(&config.url)
            .bind(&config.method)
            .bind(config.engine.to_string())
            .bind(to_ns(&create_date))
            .bind(config.tls.skip_verify)
            .bind(&config.tls.ca)
            .bind(&config.tls.cert)
            .bind(&config.tls.key)
            .bind(&config.body)
            .bind(config.gather_full_stats)
            .bind(config.gather_aggregated_stats)
            .bind(config.request_count as i64)
            .bind(config.abort_after as i64)
            .bind(config.connections as i64)
            .bind(config.rate_limit as i64)
            .bind(dur_to_ns(config.duration))
            .bind(dur_to_ns(config.benchmark_timeout))
            .bind(dur_to_ns(config.aggregate_window))
            .bind(dur_to_ns(config.keep_alive))
            .bind(dur_to_ns(config.request_delay))
            .bind(dur_to_ns(config.read_timeout))
            .bind(dur_to_ns(config.write_timeout))
            .bind(dur_to_ns(config.timeout))
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| {
                on_unique_violation(
                    e,
                    StorageError::DuplicateCampaign {
                        name: campaign.name.clone(),
                        url: config.url.clone(),
                    },
                )
            })?;

        let uuid: String = row
            .ok_or(StorageError::EmptyInsertReturn)?
            .try_get("uuid")?;

        for header in config.headers.lines() {
            sqlx::query("INSERT INTO campaign_header (campaign_uuid, header) VALUES (?, ?)")
                .bind(&uuid)
                .bind(header)
                .execute(&mut *tx)
                .await?;
        }

        for parameter in config.params.lines() {
            sqlx::query("INSERT INTO campaign_parameter (campaign_uuid, parameter) VALUES (?, ?)")
                .bind(&uuid)
                .bind(parameter)
                .execute(&mut *tx)
                .await?;
        }

        for tag in &campaign.tags {
            insert_tag(&mut tx, &uuid, tag).await?;
        }

        tx.commit().await?;
        debug!(%uuid, name = %campaign.name, "campaign saved");

        Ok(uuid)
    }

    pub async fn get_campaign(&self, uuid: &str) -> Result<Campaign, StorageError> {
        let query = format!("{} WHERE uuid = ?", SELECT_CAMPAIGN);
        let row = sqlx::query(&query)
            .bind(uuid)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StorageError::CampaignNotFound(uuid.to_string()))?;

        let mut campaign = campaign_from_row(&row)?;
        self.load_details(&mut campaign).await?;
        Ok(campaign)
    }

    pub async fn get_campaigns_by_name(&self, name: &str) -> Result<Vec<Campaign>, StorageError> {
        let query = format!("{} WHERE name = ? ORDER BY create_date DESC", SELECT_CAMPAIGN);
        let rows = sqlx::query(&query).bind(name).fetch_all(self.pool()).await?;
        self.collect_campaigns(rows).await
    }

    /// Lists the most recent campaigns; a non-positive limit lists them all.
    pub async fn get_campaigns(&self, limit: i64) -> Result<Vec<Campaign>, StorageError> {
        let query = format!(
            "{} ORDER BY create_date DESC LIMIT ?",
            SELECT_CAMPAIGN
        );
        let rows = sqlx::query(&query)
            .bind(if limit > 0 { limit } else { -1 })
            .fetch_all(self.pool())
            .await?;
        self.collect_campaigns(rows).await
    }

    pub async fn get_campaigns_by_time_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Campaign>, StorageError> {
        let query = format!(
            "{} WHERE create_date BETWEEN ? AND ? ORDER BY create_date DESC LIMIT ?",
            SELECT_CAMPAIGN
        );
        let rows = sqlx::query(&query)
            .bind(to_ns(&from))
            .bind(to_ns(&to))
            .bind(if limit > 0 { limit } else { -1 })
            .fetch_all(self.pool())
            .await?;
        self.collect_campaigns(rows).await
    }

    /// Finds campaigns carrying all the given tags (value checked only when
    /// non-empty).
    pub async fn get_campaigns_by_tags(&self, tags: &[Tag]) -> Result<Vec<Campaign>, StorageError> {
        let mut matching: Option<Vec<String>> = None;

        for tag in tags {
            let uuids: Vec<String> = if tag.value.is_empty() {
                sqlx::query_scalar("SELECT campaign_uuid FROM campaign_tag WHERE key = ?")
                    .bind(&tag.key)
                    .fetch_all(self.pool())
                    .await?
            } else {
                sqlx::query_scalar(
                    "SELECT campaign_uuid FROM campaign_tag WHERE key = ? AND value = ?",
                )
                .bind(&tag.key)
                .bind(&tag.value)
                .fetch_all(self.pool())
                .await?
            };

            matching = Some(match matching {
                None => uuids,
                Some(prev) => prev.into_iter().filter(|u| uuids.contains(u)).collect(),
            });
        }

        let mut campaigns = Vec::new();
        for uuid in matching.unwrap_or_default() {
            campaigns.push(self.get_campaign(&uuid).await?);
        }
        Ok(campaigns)
    }

    pub async fn delete_campaign(&self, uuid: &str) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM campaign WHERE uuid = ?")
            .bind(uuid)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::CampaignNotFound(uuid.to_string()));
        }
        Ok(())
    }

    pub async fn add_tags(&self, uuid: &str, tags: &[Tag]) -> Result<(), StorageError> {
        // Fail fast with a clear error instead of a foreign-key violation.
        self.get_campaign(uuid).await?;

        let mut tx = self.pool().begin().await?;
        for tag in tags {
            insert_tag(&mut tx, uuid, tag).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn tags_for(&self, uuid: &str) -> Result<Vec<Tag>, StorageError> {
        let rows = sqlx::query(
            "SELECT key, value, create_date, update_date FROM campaign_tag \
             WHERE campaign_uuid = ? ORDER BY key",
        )
        .bind(uuid)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(tag_from_row).collect()
    }

    /// Finds every campaign carrying a tag with the given key, mapped from
    /// campaign UUID to the tag itself.
    pub async fn tags_by_key(
        &self,
        key: &str,
    ) -> Result<BTreeMap<String, Tag>, StorageError> {
        let rows = sqlx::query(
            "SELECT campaign_uuid, key, value, create_date, update_date FROM campaign_tag \
             WHERE key = ? ORDER BY campaign_uuid",
        )
        .bind(key)
        .fetch_all(self.pool())
        .await?;

        let mut tags = BTreeMap::new();
        for row in &rows {
            tags.insert(row.try_get("campaign_uuid")?, tag_from_row(row)?);
        }
        Ok(tags)
    }

    pub async fn update_tag(&self, uuid: &str, key: &str, value: &str) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE campaign_tag SET value = ?, update_date = ? \
             WHERE campaign_uuid = ? AND key = ?",
        )
        .bind(value)
        .bind(to_ns(&Utc::now()))
        .bind(uuid)
        .bind(key)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::TagNotFound {
                uuid: uuid.to_string(),
                key: key.to_string(),
            });
        }
        Ok(())
    }

    pub async fn delete_tag(&self, uuid: &str, key: &str) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM campaign_tag WHERE campaign_uuid = ? AND key = ?")
            .bind(uuid)
            .bind(key)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::TagNotFound {
                uuid: uuid.to_string(),
                key: key.to_string(),
            });
        }
        Ok(())
    }

    async fn collect_campaigns(
        &self,
        rows: Vec<SqliteRow>,
    ) -> Result<Vec<Campaign>, StorageError> {
        let mut campaigns = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut campaign = campaign_from_row(row)?;
            self.load_details(&mut campaign).await?;
            campaigns.push(campaign);
        }
        Ok(campaigns)
    }

    /// Hydrates headers, parameter sets and tags from their side tables.
    async fn load_details(&self, campaign: &mut Campaign) -> Result<(), StorageError> {
        let uuid = campaign
            .uuid
            .clone()
            .ok_or_else(|| StorageError::Corrupt("campaign row without uuid".to_string()))?;

        let headers: Vec<String> = sqlx::query_scalar(
            "SELECT header FROM campaign_header WHERE campaign_uuid = ? ORDER BY id",
        )
        .bind(&uuid)
        .fetch_all(self.pool())
        .await?;

        for header in &headers {
            campaign
                .config
                .headers
                .set(header)
                .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        }

        let parameters: Vec<String> = sqlx::query_scalar(
            "SELECT parameter FROM campaign_parameter WHERE campaign_uuid = ? ORDER BY id",
        )
        .bind(&uuid)
        .fetch_all(self.pool())
        .await?;

        for parameter in &parameters {
            campaign
                .config
                .params
                .set(parameter)
                .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        }

        campaign.tags = self.tags_for(&uuid).await?;
        Ok(())
    }
}

async fn insert_tag(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    uuid: &str,
    tag: &Tag,
) -> Result<(), StorageError> {
    let now = to_ns(&Utc::now());
    sqlx::query(
        "INSERT INTO campaign_tag (campaign_uuid, key, value, create_date, update_date) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(uuid)
    .bind(&tag.key)
    .bind(&tag.value)
    .bind(tag.create_date.map(|d| to_ns(&d)).unwrap_or(now))
    .bind(tag.update_date.map(|d| to_ns(&d)).unwrap_or(now))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn campaign_from_row(row: &SqliteRow) -> Result<Campaign, StorageError> {
    let engine: String = row.try_get("engine")?;
    let engine: Engine = engine
        .parse()
        .map_err(|e: crate::config::ConfigError| StorageError::Corrupt(e.to_string()))?;

    let config = LoadConfig {
        url: row.try_get("url")?,
        method: row.try_get("method")?,
        body: row.try_get("body")?,
        headers: Headers::new(),
        params: ParamSets::new(),
        tls: TlsOptions {
            skip_verify: row.try_get("skip_verify")?,
            ca: row.try_get("ca")?,
            cert: row.try_get("cert")?,
            key: row.try_get("key")?,
        },
        connections: row.try_get::<i64, _>("connections")?.max(0) as usize,
        request_count: row.try_get::<i64, _>("request_count")?.max(0) as u64,
        duration: dur_from_ns(row.try_get("duration_ns")?),
        benchmark_timeout: dur_from_ns(row.try_get("benchmark_timeout_ns")?),
        abort_after: row.try_get::<i64, _>("abort_after")?.max(0) as u64,
        rate_limit: row.try_get::<i64, _>("rate_limit")?.max(0) as u32,
        request_delay: dur_from_ns(row.try_get("request_delay_ns")?),
        keep_alive: dur_from_ns(row.try_get("keep_alive_ns")?),
        read_timeout: dur_from_ns(row.try_get("read_timeout_ns")?),
        write_timeout: dur_from_ns(row.try_get("write_timeout_ns")?),
        timeout: dur_from_ns(row.try_get("timeout_ns")?),
        aggregate_window: dur_from_ns(row.try_get("aggregate_window_ns")?),
        gather_full_stats: row.try_get("gather_full_stats")?,
        gather_aggregated_stats: row.try_get("gather_aggregated_stats")?,
        engine,
    };

    Ok(Campaign {
        uuid: Some(row.try_get("uuid")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        create_date: Some(from_ns(row.try_get("create_date")?)),
        config,
        tags: Vec::new(),
    })
}

fn tag_from_row(row: &SqliteRow) -> Result<Tag, StorageError> {
    Ok(Tag {
        key: row.try_get("key")?,
        value: row.try_get("value")?,
        create_date: Some(from_ns(row.try_get("create_date")?)),
        update_date: Some(from_ns(row.try_get("update_date")?)),
    })
}
