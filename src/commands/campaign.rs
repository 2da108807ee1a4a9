//! `loader save`, `loader find` and `loader delete`.

use std::path::Path;

use chrono::Utc;

use crate::cli::{DeleteArgs, FindArgs, RunArgs};
use crate::config::{Campaign, Tag};
use crate::storage::SummaryQuery;
use crate::timespec;

use super::{open_storage, renderer_for, run::build_campaign};

pub(crate) async fn save(db: &Path, args: RunArgs) -> anyhow::Result<()> {
    let campaign = build_campaign(&args)?;

    let storage = open_storage(db).await?;
    let uuid = storage.insert_campaign(&campaign).await?;

    println!("New campaign saved: {}", uuid);
    Ok(())
}

pub(crate) async fn find(db: &Path, template: &str, args: FindArgs) -> anyhow::Result<()> {
    let storage = open_storage(db).await?;
    let renderer = renderer_for(&storage, template).await?;

    let limit = if args.all { -1 } else { args.limit };
    let from = args
        .from
        .as_deref()
        .map(timespec::parse_time)
        .transpose()?;
    let to = args.to.as_deref().map(timespec::parse_time).transpose()?;

    let campaigns: Vec<Campaign> = if let Some(uuid) = &args.uuid {
        vec![storage.get_campaign(uuid).await?]
    } else if let Some(name) = &args.name {
        storage.get_campaigns_by_name(name).await?
    } else if !args.tags.is_empty() {
        let tags: Vec<Tag> = args.tags.iter().map(|t| Tag::parse(t)).collect();
        storage.get_campaigns_by_tags(&tags).await?
    } else if let Some(from) = from {
        storage
            .get_campaigns_by_time_range(from, to.unwrap_or_else(Utc::now), limit)
            .await?
    } else {
        storage.get_campaigns(limit).await?
    };

    if campaigns.is_empty() {
        println!("No campaigns found");
        return Ok(());
    }

    println!("{}", renderer.render_campaigns(&campaigns)?);

    if args.summaries {
        let query = SummaryQuery {
            limit,
            from,
            to,
            with_requests: args.full_stats || args.aggregated_stats,
        };

        for campaign in &campaigns {
            let Some(uuid) = &campaign.uuid else { continue };

            for stored in storage.get_summaries(uuid, &query).await? {
                println!("Summary {} of campaign {}:", stored.uuid, uuid);
                if !stored.description.is_empty() {
                    println!("  Description: {}", stored.description);
                }
                println!(
                    "{}",
                    renderer.render_summary(
                        &stored.summary,
                        args.full_stats,
                        args.aggregated_stats,
                    )?
                );
            }
        }
    }

    Ok(())
}

pub(crate) async fn delete(db: &Path, args: DeleteArgs) -> anyhow::Result<()> {
    let storage = open_storage(db).await?;
    storage.delete_campaign(&args.uuid).await?;

    println!("Campaign {} deleted", args.uuid);
    Ok(())
}
