//! On-disk storage round-trips.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;

use volley::config::{Campaign, Engine, LoadConfig, Tag};
use volley::stats::{AggregatedStat, RequestStat, Summary};
use volley::storage::{Storage, StorageError, SummaryQuery};

async fn open_storage() -> (TempDir, Storage) {
    let dir = TempDir::new().expect("temp dir");
    let storage = Storage::open(&dir.path().join("volley.db"))
        .await
        .expect("open storage");
    (dir, storage)
}

fn sample_campaign(name: &str) -> Campaign {
    let mut config = LoadConfig {
        url: "http://localhost:8080/ok".to_string(),
        method: "POST".to_string(),
        body: Some("payload".to_string()),
        connections: 4,
        request_count: 100,
        abort_after: 5,
        rate_limit: 50,
        duration: Duration::ZERO,
        benchmark_timeout: Duration::from_secs(60),
        request_delay: Duration::from_millis(10),
        keep_alive: Duration::from_secs(30),
        timeout: Duration::from_secs(5),
        aggregate_window: Duration::from_secs(10),
        gather_full_stats: true,
        gather_aggregated_stats: true,
        engine: Engine::Standard,
        ..Default::default()
    };
    config.headers.set("Content-type: application/json").unwrap();
    config.headers.set("Cookie-set: language=pl").unwrap();
    config.headers.set("Cookie-set: id=123").unwrap();
    config.params.set("key1=value1&key2=value2").unwrap();
    config.params.set("key1=other").unwrap();

    Campaign {
        uuid: None,
        name: name.to_string(),
        description: "test campaign".to_string(),
        create_date: None,
        config,
        tags: vec![Tag::parse("env=dev"), Tag::parse("smoke")],
    }
}

fn sample_summary() -> Summary {
    let start = Utc::now();
    let end = start + chrono::Duration::seconds(10);

    let mut errors = BTreeMap::new();
    errors.insert("Not Found".to_string(), 2);

    let mut http_codes = BTreeMap::new();
    http_codes.insert(200, 8);
    http_codes.insert(404, 2);

    Summary {
        url: "http://localhost:8080/ok".to_string(),
        start,
        end,
        total_time: Duration::from_secs(10),
        req_count: 10,
        success_req: 8,
        fail_req: 2,
        data_transferred: 160,
        req_per_sec: 0.8,
        avg_req_time: Duration::from_millis(12),
        min_req_time: Duration::from_millis(2),
        max_req_time: Duration::from_millis(50),
        p50_req_time: Duration::from_millis(10),
        p75_req_time: Duration::from_millis(20),
        p90_req_time: Duration::from_millis(30),
        p99_req_time: Duration::from_millis(49),
        errors,
        http_codes,
        aggregated_stats: vec![AggregatedStat {
            start,
            end,
            duration: Duration::from_secs(10),
            min_request_time: Duration::from_millis(2),
            max_request_time: Duration::from_millis(50),
            sum_request_time: Duration::from_millis(120),
            request_count: 10,
        }],
        request_stats: vec![RequestStat {
            start,
            end: start + chrono::Duration::milliseconds(12),
            duration: Duration::from_millis(12),
            body_size: 20,
            ret_code: 200,
            error: String::new(),
        }],
    }
}

#[tokio::test]
async fn campaign_round_trip() {
    let (_dir, storage) = open_storage().await;

    let campaign = sample_campaign("round-trip");
    let uuid = storage.insert_campaign(&campaign).await.unwrap();

    let loaded = storage.get_campaign(&uuid).await.unwrap();

    assert_eq!(loaded.name, "round-trip");
    assert_eq!(loaded.description, "test campaign");
    assert_eq!(loaded.config.url, campaign.config.url);
    assert_eq!(loaded.config.method, "POST");
    assert_eq!(loaded.config.engine, Engine::Standard);
    assert_eq!(loaded.config.connections, 4);
    assert_eq!(loaded.config.request_count, 100);
    assert_eq!(loaded.config.benchmark_timeout, Duration::from_secs(60));
    assert_eq!(loaded.config.request_delay, Duration::from_millis(10));
    assert_eq!(loaded.config.headers, campaign.config.headers);
    assert_eq!(loaded.config.params, campaign.config.params);
    assert_eq!(loaded.tags.len(), 2);
    assert!(loaded.tags.iter().any(|t| t.key == "env" && t.value == "dev"));
}

#[tokio::test]
async fn duplicate_campaign_name_and_url_is_rejected() {
    let (_dir, storage) = open_storage().await;

    storage
        .insert_campaign(&sample_campaign("dup"))
        .await
        .unwrap();
    let err = storage
        .insert_campaign(&sample_campaign("dup"))
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::DuplicateCampaign { .. }));
}

#[tokio::test]
async fn missing_campaign_is_not_found() {
    let (_dir, storage) = open_storage().await;

    let err = storage.get_campaign("no-such-uuid").await.unwrap_err();
    assert!(matches!(err, StorageError::CampaignNotFound(_)));

    let err = storage.delete_campaign("no-such-uuid").await.unwrap_err();
    assert!(matches!(err, StorageError::CampaignNotFound(_)));
}

#[tokio::test]
async fn find_campaigns_by_name_and_tags() {
    let (_dir, storage) = open_storage().await;

    let mut campaign = sample_campaign("tagged");
    campaign.config.url = "http://localhost:8080/a".to_string();
    storage.insert_campaign(&campaign).await.unwrap();

    let mut other = sample_campaign("other");
    other.config.url = "http://localhost:8080/b".to_string();
    other.tags = vec![Tag::parse("env=prod")];
    storage.insert_campaign(&other).await.unwrap();

    let by_name = storage.get_campaigns_by_name("tagged").await.unwrap();
    assert_eq!(by_name.len(), 1);
    assert_eq!(by_name[0].name, "tagged");

    let by_tag = storage
        .get_campaigns_by_tags(&[Tag::parse("env=dev")])
        .await
        .unwrap();
    assert_eq!(by_tag.len(), 1);
    assert_eq!(by_tag[0].name, "tagged");

    // Key-only tags match any value.
    let by_key = storage
        .get_campaigns_by_tags(&[Tag::parse("env")])
        .await
        .unwrap();
    assert_eq!(by_key.len(), 2);

    let all = storage.get_campaigns(-1).await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn summary_round_trip_with_requests() {
    let (_dir, storage) = open_storage().await;

    let campaign_uuid = storage
        .insert_campaign(&sample_campaign("with-summary"))
        .await
        .unwrap();

    let summary = sample_summary();
    let summary_uuid = storage
        .insert_summary(&campaign_uuid, &summary, "first run", true, true)
        .await
        .unwrap();
    assert!(!summary_uuid.is_empty());

    let stored = storage
        .get_summaries(
            &campaign_uuid,
            &SummaryQuery {
                with_requests: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(stored.len(), 1);
    let loaded = &stored[0];
    assert_eq!(loaded.description, "first run");
    assert_eq!(loaded.summary.req_count, 10);
    assert_eq!(loaded.summary.success_req, 8);
    assert_eq!(loaded.summary.fail_req, 2);
    assert_eq!(loaded.summary.errors["Not Found"], 2);
    assert_eq!(loaded.summary.http_codes[&200], 8);
    assert_eq!(loaded.summary.p99_req_time, Duration::from_millis(49));
    assert_eq!(loaded.summary.request_stats.len(), 1);
    assert_eq!(loaded.summary.request_stats[0].body_size, 20);
    assert_eq!(loaded.summary.aggregated_stats.len(), 1);
    assert_eq!(
        loaded.summary.aggregated_stats[0].sum_request_time,
        Duration::from_millis(120)
    );
}

#[tokio::test]
async fn summary_children_are_skipped_unless_requested() {
    let (_dir, storage) = open_storage().await;

    let campaign_uuid = storage
        .insert_campaign(&sample_campaign("lean"))
        .await
        .unwrap();
    storage
        .insert_summary(&campaign_uuid, &sample_summary(), "", false, false)
        .await
        .unwrap();

    let stored = storage
        .get_summaries(
            &campaign_uuid,
            &SummaryQuery {
                with_requests: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(stored.len(), 1);
    assert!(stored[0].summary.request_stats.is_empty());
    assert!(stored[0].summary.aggregated_stats.is_empty());
}

#[tokio::test]
async fn delete_campaign_cascades() {
    let (_dir, storage) = open_storage().await;

    let campaign_uuid = storage
        .insert_campaign(&sample_campaign("doomed"))
        .await
        .unwrap();
    storage
        .insert_summary(&campaign_uuid, &sample_summary(), "", true, true)
        .await
        .unwrap();

    storage.delete_campaign(&campaign_uuid).await.unwrap();

    let err = storage.get_campaign(&campaign_uuid).await.unwrap_err();
    assert!(matches!(err, StorageError::CampaignNotFound(_)));

    let summaries = storage
        .get_summaries(&campaign_uuid, &SummaryQuery::default())
        .await
        .unwrap();
    assert!(summaries.is_empty());
}

#[tokio::test]
async fn tag_lifecycle() {
    let (_dir, storage) = open_storage().await;

    let uuid = storage
        .insert_campaign(&sample_campaign("tag-ops"))
        .await
        .unwrap();

    storage
        .add_tags(&uuid, &[Tag::parse("team=core")])
        .await
        .unwrap();

    let tags = storage.tags_for(&uuid).await.unwrap();
    assert_eq!(tags.len(), 3, "two initial tags plus one added");

    storage.update_tag(&uuid, "team", "infra").await.unwrap();
    let tags = storage.tags_for(&uuid).await.unwrap();
    let team = tags.iter().find(|t| t.key == "team").unwrap();
    assert_eq!(team.value, "infra");

    storage.delete_tag(&uuid, "team").await.unwrap();
    let tags = storage.tags_for(&uuid).await.unwrap();
    assert!(tags.iter().all(|t| t.key != "team"));

    let err = storage.update_tag(&uuid, "ghost", "x").await.unwrap_err();
    assert!(matches!(err, StorageError::TagNotFound { .. }));
}

#[tokio::test]
async fn tags_by_key_maps_campaigns() {
    let (_dir, storage) = open_storage().await;

    let mut first = sample_campaign("first");
    first.config.url = "http://localhost:8080/a".to_string();
    let first_uuid = storage.insert_campaign(&first).await.unwrap();

    let mut second = sample_campaign("second");
    second.config.url = "http://localhost:8080/b".to_string();
    second.tags = vec![Tag::parse("env=prod")];
    let second_uuid = storage.insert_campaign(&second).await.unwrap();

    let by_key = storage.tags_by_key("env").await.unwrap();
    assert_eq!(by_key.len(), 2);
    assert_eq!(by_key[&first_uuid].value, "dev");
    assert_eq!(by_key[&second_uuid].value, "prod");

    // "smoke" exists only on the first campaign.
    let smoke = storage.tags_by_key("smoke").await.unwrap();
    assert_eq!(smoke.len(), 1);
    assert!(smoke.contains_key(&first_uuid));

    assert!(storage.tags_by_key("ghost").await.unwrap().is_empty());
}

#[tokio::test]
async fn adding_tags_to_missing_campaign_fails() {
    let (_dir, storage) = open_storage().await;

    let err = storage
        .add_tags("no-such-uuid", &[Tag::parse("a=b")])
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::CampaignNotFound(_)));
}

#[tokio::test]
async fn template_lifecycle() {
    let (_dir, storage) = open_storage().await;

    storage
        .insert_template("short", "{{ url }}: {{ req_count }}")
        .await
        .unwrap();

    let template = storage.get_template("short").await.unwrap();
    assert_eq!(template.content, "{{ url }}: {{ req_count }}");

    let err = storage
        .insert_template("short", "other")
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::DuplicateTemplate(_)));

    storage.update_template("short", "{{ url }}").await.unwrap();
    let template = storage.get_template("short").await.unwrap();
    assert_eq!(template.content, "{{ url }}");

    let all = storage.list_templates().await.unwrap();
    assert_eq!(all.len(), 1);

    storage.delete_template("short").await.unwrap();
    let err = storage.get_template("short").await.unwrap_err();
    assert!(matches!(err, StorageError::TemplateNotFound(_)));
}
