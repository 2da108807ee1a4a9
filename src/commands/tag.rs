//! `tag` subcommands.

use std::path::Path;

use crate::cli::TagCommand;
use crate::config::Tag;

use super::{open_storage, renderer_for};

pub(crate) async fn dispatch(db: &Path, template: &str, command: TagCommand) -> anyhow::Result<()> {
    let storage = open_storage(db).await?;

    match command {
        TagCommand::Add { uuid, tags } => {
            let tags: Vec<Tag> = tags.iter().map(|t| Tag::parse(t)).collect();
            storage.add_tags(&uuid, &tags).await?;
            println!("Added {} tag(s) to campaign {}", tags.len(), uuid);
        }
        TagCommand::Find { uuid, name } => {
            let renderer = renderer_for(&storage, template).await?;

            if let Some(uuid) = uuid {
                let tags = storage.tags_for(&uuid).await?;
                if tags.is_empty() {
                    println!("No tags on campaign {}", uuid);
                } else {
                    println!("{}", renderer.render_tags(&uuid, &tags)?);
                }
            } else if let Some(name) = name {
                let tags = storage.tags_by_key(&name).await?;
                if tags.is_empty() {
                    println!("No campaigns carry tag '{}'", name);
                } else {
                    println!("{}", renderer.render_tags_map(&name, &tags)?);
                }
            } else {
                anyhow::bail!("either --uuid or --name is required");
            }
        }
        TagCommand::Update { uuid, key, value } => {
            storage.update_tag(&uuid, &key, &value).await?;
            println!("Tag {} updated on campaign {}", key, uuid);
        }
        TagCommand::Delete { uuid, key } => {
            storage.delete_tag(&uuid, &key).await?;
            println!("Tag {} deleted from campaign {}", key, uuid);
        }
    }

    Ok(())
}
