//! Text rendering of summaries, campaigns and tags.
//!
//! A default template set ships embedded in the binary; user-defined
//! templates stored in the database replace the summary template when
//! selected with `--template`. Durations and timestamps are pre-formatted
//! before reaching the template context, so templates only deal in strings
//! and numbers.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tera::Tera;
use thiserror::Error;

use crate::config::{Campaign, Tag};
use crate::stats::{AggregatedStat, Summary};

const SUMMARY_TEMPLATE: &str = include_str!("templates/summary.tera");
const CAMPAIGNS_TEMPLATE: &str = include_str!("templates/campaigns.tera");
const TAGS_TEMPLATE: &str = include_str!("templates/tags.tera");
const TAGS_MAP_TEMPLATE: &str = include_str!("templates/tags_map.tera");

/// Name resolving to the embedded template set.
pub const DEFAULT_TEMPLATE: &str = "default";

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("template error: {0}")]
    Template(#[from] tera::Error),
}

pub struct Renderer {
    tera: Tera,
}

impl Renderer {
    /// Renderer with the embedded default templates.
    pub fn new() -> Result<Self, RenderError> {
        let mut tera = Tera::default();
        tera.add_raw_template("summary", SUMMARY_TEMPLATE)?;
        tera.add_raw_template("campaigns", CAMPAIGNS_TEMPLATE)?;
        tera.add_raw_template("tags", TAGS_TEMPLATE)?;
        tera.add_raw_template("tags_map", TAGS_MAP_TEMPLATE)?;
        Ok(Self { tera })
    }

    /// Renderer whose summary template is replaced by user-supplied content.
    pub fn with_summary_template(content: &str) -> Result<Self, RenderError> {
        let mut renderer = Self::new()?;
        renderer.tera.add_raw_template("summary", content)?;
        Ok(renderer)
    }

    pub fn render_summary(
        &self,
        summary: &Summary,
        show_full_stats: bool,
        show_aggregated_stats: bool,
    ) -> Result<String, RenderError> {
        let context = tera::Context::from_serialize(summary_context(
            summary,
            show_full_stats,
            show_aggregated_stats,
        ))?;
        Ok(self.tera.render("summary", &context)?)
    }

    pub fn render_campaigns(&self, campaigns: &[Campaign]) -> Result<String, RenderError> {
        let entries: Vec<_> = campaigns
            .iter()
            .map(|campaign| {
                json!({
                    "uuid": campaign.uuid.clone().unwrap_or_default(),
                    "name": campaign.name,
                    "description": campaign.description,
                    "create_date": campaign.create_date.map(fmt_time).unwrap_or_default(),
                    "url": campaign.config.url,
                    "method": campaign.config.method,
                    "engine": campaign.config.engine.to_string(),
                    "connections": campaign.config.connections,
                    "request_count": campaign.config.request_count,
                    "duration": fmt_optional_duration(campaign.config.duration),
                    "tags": campaign.tags.iter().map(tag_entry).collect::<Vec<_>>(),
                })
            })
            .collect();

        let context = tera::Context::from_serialize(json!({ "campaigns": entries }))?;
        Ok(self.tera.render("campaigns", &context)?)
    }

    pub fn render_tags(&self, campaign_uuid: &str, tags: &[Tag]) -> Result<String, RenderError> {
        let context = tera::Context::from_serialize(json!({
            "campaign_uuid": campaign_uuid,
            "tags": tags.iter().map(tag_entry).collect::<Vec<_>>(),
        }))?;
        Ok(self.tera.render("tags", &context)?)
    }

    /// Renders the campaign-to-tag map produced by a tag-key lookup.
    pub fn render_tags_map(
        &self,
        key: &str,
        tags: &BTreeMap<String, Tag>,
    ) -> Result<String, RenderError> {
        let entries: Vec<_> = tags
            .iter()
            .map(|(campaign_uuid, tag)| {
                let mut entry = tag_entry(tag);
                entry["campaign_uuid"] = json!(campaign_uuid);
                entry
            })
            .collect();

        let context = tera::Context::from_serialize(json!({
            "key": key,
            "entries": entries,
        }))?;
        Ok(self.tera.render("tags_map", &context)?)
    }
}

fn summary_context(
    summary: &Summary,
    show_full_stats: bool,
    show_aggregated_stats: bool,
) -> serde_json::Value {
    let errors: Vec<_> = summary
        .errors
        .iter()
        .map(|(name, count)| json!({ "name": name, "count": count }))
        .collect();

    let http_codes: Vec<_> = summary
        .http_codes
        .iter()
        .map(|(code, count)| json!({ "code": code, "count": count }))
        .collect();

    let aggregated_stats: Vec<_> = if show_aggregated_stats {
        summary.aggregated_stats.iter().map(window_entry).collect()
    } else {
        Vec::new()
    };

    let request_stats: Vec<_> = if show_full_stats {
        summary
            .request_stats
            .iter()
            .map(|stat| {
                json!({
                    "start": fmt_time(stat.start),
                    "duration": fmt_duration(stat.duration),
                    "ret_code": stat.ret_code,
                    "body_size": stat.body_size,
                    "error": stat.error,
                })
            })
            .collect()
    } else {
        Vec::new()
    };

    json!({
        "url": summary.url,
        "start": fmt_time(summary.start),
        "end": fmt_time(summary.end),
        "total_time": fmt_duration(summary.total_time),
        "req_count": summary.req_count,
        "success_req": summary.success_req,
        "fail_req": summary.fail_req,
        "data_transferred": summary.data_transferred,
        "req_per_sec": format!("{:.2}", summary.req_per_sec),
        "avg_req_time": fmt_duration(summary.avg_req_time),
        "min_req_time": fmt_duration(summary.min_req_time),
        "max_req_time": fmt_duration(summary.max_req_time),
        "p50_req_time": fmt_duration(summary.p50_req_time),
        "p75_req_time": fmt_duration(summary.p75_req_time),
        "p90_req_time": fmt_duration(summary.p90_req_time),
        "p99_req_time": fmt_duration(summary.p99_req_time),
        "errors": errors,
        "http_codes": http_codes,
        "aggregated_stats": aggregated_stats,
        "request_stats": request_stats,
    })
}

fn window_entry(window: &AggregatedStat) -> serde_json::Value {
    let avg = if window.request_count > 0 {
        Duration::from_nanos(
            (window.sum_request_time.as_nanos() / window.request_count as u128) as u64,
        )
    } else {
        Duration::ZERO
    };

    json!({
        "start": fmt_time(window.start),
        "end": fmt_time(window.end),
        "duration": fmt_duration(window.duration),
        "min_request_time": fmt_duration(window.min_request_time),
        "max_request_time": fmt_duration(window.max_request_time),
        "avg_request_time": fmt_duration(avg),
        "request_count": window.request_count,
    })
}

fn tag_entry(tag: &Tag) -> serde_json::Value {
    json!({
        "key": tag.key,
        "value": tag.value,
        "create_date": tag.create_date.map(fmt_time).unwrap_or_default(),
        "update_date": tag.update_date.map(fmt_time).unwrap_or_default(),
    })
}

/// Durations are truncated to microseconds before formatting; nanosecond
/// noise helps nobody in a report.
fn fmt_duration(d: Duration) -> String {
    humantime::format_duration(Duration::from_micros(d.as_micros() as u64)).to_string()
}

fn fmt_optional_duration(d: Duration) -> String {
    if d.is_zero() {
        String::new()
    } else {
        fmt_duration(d)
    }
}

fn fmt_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample_summary() -> Summary {
        let mut errors = BTreeMap::new();
        errors.insert("Not Found".to_string(), 3);

        let mut http_codes = BTreeMap::new();
        http_codes.insert(200, 7);
        http_codes.insert(404, 3);

        Summary {
            url: "http://localhost:8080/ok".to_string(),
            start: Utc::now(),
            end: Utc::now(),
            total_time: Duration::from_secs(5),
            req_count: 10,
            success_req: 7,
            fail_req: 3,
            data_transferred: 14,
            req_per_sec: 1.4,
            avg_req_time: Duration::from_millis(12),
            min_req_time: Duration::from_millis(3),
            max_req_time: Duration::from_millis(40),
            p50_req_time: Duration::from_millis(10),
            p75_req_time: Duration::from_millis(15),
            p90_req_time: Duration::from_millis(25),
            p99_req_time: Duration::from_millis(39),
            errors,
            http_codes,
            aggregated_stats: Vec::new(),
            request_stats: Vec::new(),
        }
    }

    #[test]
    fn default_summary_template_renders() {
        let renderer = Renderer::new().unwrap();
        let output = renderer.render_summary(&sample_summary(), false, false).unwrap();

        assert!(output.contains("http://localhost:8080/ok"));
        assert!(output.contains("Requests count:      10"));
        assert!(output.contains("Not Found: 3"));
        assert!(output.contains("200: 7"));
        assert!(output.contains("1.40"));
    }

    #[test]
    fn custom_summary_template() {
        let renderer =
            Renderer::with_summary_template("{{ url }} -> {{ success_req }}/{{ req_count }}")
                .unwrap();
        let output = renderer.render_summary(&sample_summary(), false, false).unwrap();

        assert_eq!(output, "http://localhost:8080/ok -> 7/10");
    }

    #[test]
    fn bad_template_is_an_error() {
        assert!(Renderer::with_summary_template("{{ unclosed").is_err());
    }

    #[test]
    fn tags_map_renders_per_campaign() {
        let mut tags = BTreeMap::new();
        tags.insert("uuid-1".to_string(), Tag::parse("env=dev"));
        tags.insert("uuid-2".to_string(), Tag::parse("env=prod"));

        let renderer = Renderer::new().unwrap();
        let output = renderer.render_tags_map("env", &tags).unwrap();

        assert!(output.contains("Campaigns tagged 'env'"));
        assert!(output.contains("uuid-1: env=dev"));
        assert!(output.contains("uuid-2: env=prod"));
    }

    #[test]
    fn campaigns_render_with_tags() {
        use crate::config::{Campaign, LoadConfig, Tag};

        let campaign = Campaign {
            uuid: Some("abc-123".to_string()),
            name: "smoke".to_string(),
            description: "smoke test".to_string(),
            create_date: Some(Utc::now()),
            config: LoadConfig {
                url: "http://localhost:9000/".to_string(),
                request_count: 100,
                ..Default::default()
            },
            tags: vec![Tag::parse("env=dev")],
        };

        let renderer = Renderer::new().unwrap();
        let output = renderer.render_campaigns(&[campaign]).unwrap();

        assert!(output.contains("abc-123"));
        assert!(output.contains("smoke"));
        assert!(output.contains("env=dev"));
    }
}
