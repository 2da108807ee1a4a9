//! `template` subcommands.

use std::path::Path;

use anyhow::Context;

use crate::cli::TemplateCommand;

use super::open_storage;

pub(crate) async fn dispatch(db: &Path, command: TemplateCommand) -> anyhow::Result<()> {
    let storage = open_storage(db).await?;

    match command {
        TemplateCommand::Add { name, file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("could not read template file {}", file.display()))?;
            storage.insert_template(&name, &content).await?;
            println!("Template {} saved", name);
        }
        TemplateCommand::Find { name } => match name {
            Some(name) => {
                let template = storage.get_template(&name).await?;
                println!("Template {} (created {}):", template.name, template.create_date);
                println!("{}", template.content);
            }
            None => {
                let templates = storage.list_templates().await?;
                if templates.is_empty() {
                    println!("No templates stored");
                }
                for template in templates {
                    println!("{} (created {})", template.name, template.create_date);
                }
            }
        },
        TemplateCommand::Update { name, file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("could not read template file {}", file.display()))?;
            storage.update_template(&name, &content).await?;
            println!("Template {} updated", name);
        }
        TemplateCommand::Delete { name } => {
            storage.delete_template(&name).await?;
            println!("Template {} deleted", name);
        }
    }

    Ok(())
}
