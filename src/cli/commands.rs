use std::path::Path;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};

use crate::app::{AppContext, BurrowError, Result};
use crate::config::Config;
use crate::domain::{Feed, RunOutcome, Source};
use crate::fetcher::PageFetcher;
use crate::library::{self, Library};
use crate::store::{SqliteStore, Store};
use crate::sync::{SyncOptions, SyncStatus};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub fn init_library(config_path: &Path, root: &Path) -> Result<()> {
    let library = Library::open(root)?;
    // Opening runs the migrations.
    SqliteStore::new(library.db_path())?;
    Config::save_library_root(config_path, library.root())?;

    println!("Library ready at {}", library.root().display());
    println!("Saved to {}", config_path.display());
    Ok(())
}

pub fn library_stats(ctx: &AppContext) -> Result<()> {
    let library = ctx.library()?;
    let total = ctx.store.count_items()?;
    let primary = ctx.store.list_by_source(Source::E621)?.len();
    let exclusives = ctx.store.list_by_source(Source::FurAffinity)?.len();
    let unavailable = ctx.store.list_unavailable(u32::MAX)?.len();

    println!("Library: {}", library.root().display());
    println!("  Items:        {}", total);
    println!("  e621:         {}", primary);
    println!("  FA exclusive: {}", exclusives);
    println!("  Unavailable:  {}", unavailable);
    Ok(())
}

pub fn show_credentials(ctx: &AppContext, source: Source) -> Result<()> {
    let info = ctx.credentials.get_cred_info(source)?;
    match info.username {
        Some(username) => println!(
            "{}: {} (secret {})",
            source,
            username,
            if info.has_secret { "stored" } else { "missing" }
        ),
        None => println!("{}: no credentials", source),
    }
    Ok(())
}

pub fn set_credentials(
    ctx: &AppContext,
    source: Source,
    username: &str,
    secret: Option<&str>,
) -> Result<()> {
    ctx.credentials
        .set_credentials(source, username, secret.unwrap_or_default())?;
    println!("Saved credentials for {}", source);
    Ok(())
}

pub fn clear_credentials(ctx: &AppContext, source: Source) -> Result<()> {
    ctx.credentials.clear_credentials(source)?;
    println!("Cleared credentials for {}", source);
    Ok(())
}

/// Runs a sync in the background and reports progress until it ends.
/// Ctrl-C requests cancellation; the run stops at its next safe point.
pub async fn sync(ctx: &AppContext, source: Source, max: Option<u32>, json: bool) -> Result<()> {
    let options = SyncOptions {
        max_new_downloads: max,
    };
    let task = ctx.sync.start(source, options)?;

    let mut ticker = interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut cancel_requested = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let status = ctx.sync.status(source);
                print_status(&status, json)?;
                if !is_running(&status) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c(), if !cancel_requested => {
                cancel_requested = true;
                eprintln!("Cancelling...");
                match ctx.sync.cancel(source) {
                    Ok(()) | Err(BurrowError::NotRunning(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }
    }

    if let Err(e) = task.await {
        return Err(BurrowError::Other(format!("sync task failed: {}", e)));
    }

    let status = ctx.sync.status(source);
    if !json {
        print_summary(&status);
    }
    match outcome(&status) {
        Some(RunOutcome::Failed) => Err(BurrowError::Other(
            last_error(&status).unwrap_or("sync failed").to_string(),
        )),
        _ => Ok(()),
    }
}

fn is_running(status: &SyncStatus) -> bool {
    match status {
        SyncStatus::Primary(run) => run.running,
        SyncStatus::Secondary(run) => run.running,
    }
}

fn outcome(status: &SyncStatus) -> Option<RunOutcome> {
    match status {
        SyncStatus::Primary(run) => run.outcome,
        SyncStatus::Secondary(run) => run.outcome,
    }
}

fn last_error(status: &SyncStatus) -> Option<&str> {
    match status {
        SyncStatus::Primary(run) => run.last_error.as_deref(),
        SyncStatus::Secondary(run) => run.last_error.as_deref(),
    }
}

fn print_status(status: &SyncStatus, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(status)?);
        return Ok(());
    }

    match status {
        SyncStatus::Primary(run) => {
            let c = &run.counters;
            println!(
                "[page {}] scanned {} | new {} | skipped {} | upgraded {} | failed {} | unavailable {} | {}",
                run.scanned_pages,
                c.scanned_posts,
                c.downloaded_ok,
                c.skipped_existing,
                c.upgraded,
                c.failed_downloads,
                c.unavailable,
                run.current_message
            );
        }
        SyncStatus::Secondary(run) => {
            let c = &run.counters;
            println!(
                "[page {}] scanned {} | imported {} | upgraded {} | skipped {} | errors {} | {}",
                run.scanned_pages,
                c.scanned,
                c.imported,
                c.upgraded,
                c.skipped_url + c.skipped_md5,
                c.errors,
                run.current_message
            );
        }
    }
    Ok(())
}

fn print_summary(status: &SyncStatus) {
    let outcome = match outcome(status) {
        Some(RunOutcome::Completed) => "completed",
        Some(RunOutcome::Cancelled) => "cancelled",
        Some(RunOutcome::Failed) => "failed",
        None => "unknown",
    };
    println!("Sync {}", outcome);
    if let Some(error) = last_error(status) {
        eprintln!("Last error: {}", error);
    }
}

pub async fn recheck(ctx: &AppContext) -> Result<()> {
    println!("Rechecking FurAffinity exclusives against e621...");
    let report = ctx.sync.recheck_exclusives().await?;
    println!(
        "Checked {}, upgraded {}, errors {}",
        report.checked, report.upgraded, report.errors
    );
    Ok(())
}

pub fn list_items(ctx: &AppContext, limit: u32, offset: u32) -> Result<()> {
    let items = ctx.store.list_items(limit, offset)?;

    if items.is_empty() {
        println!("No items");
        return Ok(());
    }

    for item in items {
        let artist = item.primary_artist.as_deref().unwrap_or("unknown_artist");
        let rating = item.rating.as_deref().unwrap_or("-");
        println!(
            "{:>6}  {:<11} {:<10} {} [{}] {}",
            item.id,
            item.source,
            item.source_id,
            artist,
            rating,
            item.file_path
        );
    }
    Ok(())
}

pub fn set_tags(ctx: &AppContext, item_id: i64, tags: &[String]) -> Result<()> {
    ctx.store.update_item_tags(item_id, tags)?;
    println!("Updated tags for item {}", item_id);
    Ok(())
}

pub fn trash(ctx: &AppContext, item_id: i64) -> Result<()> {
    library::trash_item(ctx.store.as_ref(), ctx.library()?, item_id)?;
    println!("Moved item {} to trash", item_id);
    Ok(())
}

pub fn restore(ctx: &AppContext, item_id: i64) -> Result<()> {
    library::restore_item(ctx.store.as_ref(), ctx.library()?, item_id)?;
    println!("Restored item {}", item_id);
    Ok(())
}

pub fn purge(ctx: &AppContext) -> Result<()> {
    let retention = i64::from(ctx.config.sync.trash_retention_days);
    let purged = library::purge_expired_trash(ctx.store.as_ref(), ctx.library()?, retention)?;
    println!("Purged {} items older than {} days", purged, retention);
    Ok(())
}

pub fn list_unavailable(ctx: &AppContext, limit: u32) -> Result<()> {
    let records = ctx.store.list_unavailable(limit)?;

    if records.is_empty() {
        println!("No unavailable posts");
        return Ok(());
    }

    for record in records {
        println!(
            "{} {:<11} {:<10} {}",
            record.seen_at.format("%Y-%m-%d %H:%M"),
            record.source,
            record.source_id,
            record.reason
        );
        for link in &record.sources {
            println!("    {}", link);
        }
    }
    Ok(())
}

pub fn add_feed(ctx: &AppContext, name: &str, query: &str) -> Result<()> {
    if ctx.store.get_feed(name)?.is_some() {
        println!("Feed already exists: {}", name);
        return Ok(());
    }
    ctx.store.add_feed(&Feed::new(name, query))?;
    println!("Added feed: {} ({})", name, query);
    Ok(())
}

pub fn list_feeds(ctx: &AppContext) -> Result<()> {
    let feeds = ctx.store.list_feeds()?;

    if feeds.is_empty() {
        println!("No feeds");
        return Ok(());
    }

    for feed in feeds {
        println!("{:<20} {}", feed.name, feed.query);
    }
    Ok(())
}

pub fn remove_feed(ctx: &AppContext, name: &str) -> Result<()> {
    if !ctx.store.delete_feed(name)? {
        return Err(BurrowError::InvalidOptions(format!("no feed named {}", name)));
    }
    println!("Removed feed: {}", name);
    Ok(())
}

/// Shows the first page of a saved query. Nothing is downloaded.
pub async fn browse_feed(ctx: &AppContext, name: &str) -> Result<()> {
    let feed = ctx
        .store
        .get_feed(name)?
        .ok_or_else(|| BurrowError::InvalidOptions(format!("no feed named {}", name)))?;

    let client = ctx.e621_client()?;
    let page = client.fetch_page(&feed.query, None).await?;

    if page.posts.is_empty() {
        println!("No posts for {}", feed.query);
        return Ok(());
    }

    for post in &page.posts {
        let archived = ctx.store.exists(post.source, &post.source_id)?;
        println!(
            "{} {:<10} {:<20} [{}] {}",
            if archived { "*" } else { " " },
            post.source_id,
            post.primary_artist(),
            post.rating.as_deref().unwrap_or("-"),
            post.page_url()
        );
    }
    Ok(())
}

pub async fn e621_test(ctx: &AppContext) -> Result<()> {
    ctx.e621_client()?.test_connection().await?;
    println!("e621 credentials accepted");
    Ok(())
}

pub async fn e621_favorite(ctx: &AppContext, post_id: u64) -> Result<()> {
    ctx.e621_client()?.favorite(post_id).await?;
    println!("Favorited post {}", post_id);
    Ok(())
}
