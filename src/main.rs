use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tailburrow::app::AppContext;
use tailburrow::cli::{commands, Cli, Commands, CredsAction, E621Action, FeedAction, LibraryAction};
use tailburrow::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config_path = Config::default_config_path()?;

    if let Commands::Library {
        action: LibraryAction::Init { path },
    } = &cli.command
    {
        commands::init_library(&config_path, path)?;
        return Ok(());
    }

    let config = Config::load_from(&config_path)?;
    let ctx = AppContext::new(config, cli.library)?;

    match cli.command {
        Commands::Library { action } => match action {
            LibraryAction::Init { .. } => {}
            LibraryAction::Stats => commands::library_stats(&ctx)?,
        },
        Commands::Creds { action } => match action {
            CredsAction::Show { source } => commands::show_credentials(&ctx, source)?,
            CredsAction::Set {
                source,
                username,
                secret,
            } => commands::set_credentials(&ctx, source, &username, secret.as_deref())?,
            CredsAction::Clear { source } => commands::clear_credentials(&ctx, source)?,
        },
        Commands::Sync { source, max, json } => {
            commands::sync(&ctx, source, max, json).await?;
        }
        Commands::Recheck => {
            commands::recheck(&ctx).await?;
        }
        Commands::List { limit, offset } => {
            commands::list_items(&ctx, limit, offset)?;
        }
        Commands::Tags { item, tags } => {
            commands::set_tags(&ctx, item, &tags)?;
        }
        Commands::Trash { item } => {
            commands::trash(&ctx, item)?;
        }
        Commands::Restore { item } => {
            commands::restore(&ctx, item)?;
        }
        Commands::Purge => {
            commands::purge(&ctx)?;
        }
        Commands::Unavailable { limit } => {
            commands::list_unavailable(&ctx, limit)?;
        }
        Commands::Feed { action } => match action {
            FeedAction::Add { name, query } => commands::add_feed(&ctx, &name, &query)?,
            FeedAction::List => commands::list_feeds(&ctx)?,
            FeedAction::Remove { name } => commands::remove_feed(&ctx, &name)?,
            FeedAction::Browse { name } => commands::browse_feed(&ctx, &name).await?,
        },
        Commands::E621 { action } => match action {
            E621Action::Test => commands::e621_test(&ctx).await?,
            E621Action::Favorite { id } => commands::e621_favorite(&ctx, id).await?,
        },
    }

    Ok(())
}
