//! Command implementations behind the CLI surface.

mod campaign;
mod run;
mod tag;
mod template;

use std::path::Path;

use crate::cli::{Cli, Command, LoaderCommand};
use crate::render::{self, Renderer};
use crate::storage::Storage;

pub async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let Cli {
        db,
        template,
        command,
    } = cli;

    match command {
        Command::Loader(LoaderCommand::Run(args)) => run::run(&db, &template, args).await,
        Command::Loader(LoaderCommand::Start(args)) => run::start(&db, &template, args).await,
        Command::Loader(LoaderCommand::Save(args)) => campaign::save(&db, args).await,
        Command::Loader(LoaderCommand::Find(args)) => campaign::find(&db, &template, args).await,
        Command::Loader(LoaderCommand::Delete(args)) => campaign::delete(&db, args).await,
        Command::Tag(command) => tag::dispatch(&db, &template, command).await,
        Command::Template(command) => template::dispatch(&db, command).await,
        Command::Version => {
            println!("volley {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Opens the database at the configured path.
pub(crate) async fn open_storage(db: &Path) -> anyhow::Result<Storage> {
    Ok(Storage::open(db).await?)
}

/// Builds the renderer for the selected template name: the embedded default
/// or a template stored in the database.
pub(crate) async fn renderer_for(storage: &Storage, template: &str) -> anyhow::Result<Renderer> {
    if template == render::DEFAULT_TEMPLATE {
        Ok(Renderer::new()?)
    } else {
        let stored = storage.get_template(template).await?;
        Ok(Renderer::with_summary_template(&stored.content)?)
    }
}
