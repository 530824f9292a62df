use chrono::Utc;
use clap::Parser;
use colored::*;
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};
use stitchkeep::api::{HostSignal, Vault};
use stitchkeep::backup::SnapshotType;
use stitchkeep::config::VaultConfig;
use stitchkeep::error::{Result, VaultError};
use stitchkeep::gateway::{DataSource, SaveReport};
use stitchkeep::integrity::IntegrityReport;
use stitchkeep::model::{Collection, Record};
use stitchkeep::remote::http::HttpCollectionApi;
use stitchkeep::search::SearchCriteria;
use stitchkeep::store::fs_backend::FsStore;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod args;
use args::{BackupAction, Cli, Commands, FilterArgs, SavedAction};

type LiveVault = Vault<FsStore, HttpCollectionApi>;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("stitchkeep=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

struct AppContext {
    vault: LiveVault,
    home: PathBuf,
    config: VaultConfig,
}

async fn run(cli: Cli) -> Result<()> {
    let mut ctx = init_context(&cli).await?;

    match cli.command {
        Commands::Status => handle_status(&ctx).await,
        Commands::Pull => handle_pull(&mut ctx).await,
        Commands::Push => handle_push(&mut ctx).await,
        Commands::Backup(action) => handle_backup(&mut ctx, action).await,
        Commands::Export { file, gzip } => handle_export(&ctx, &file, gzip),
        Commands::Import { file } => handle_import(&mut ctx, &file).await,
        Commands::Search { collection, text } => handle_search(&ctx, collection, &text),
        Commands::Filter(args) => handle_filter(&mut ctx, args),
        Commands::Saved(action) => handle_saved(&ctx, action),
        Commands::History { limit } => handle_history(&ctx, limit),
        Commands::Watch => handle_watch(&mut ctx).await,
    }
}

async fn init_context(cli: &Cli) -> Result<AppContext> {
    let home = match &cli.home {
        Some(home) => home.clone(),
        None => ProjectDirs::from("com", "stitchkeep", "stitchkeep")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or_else(|| {
                VaultError::Config("could not determine a data directory, pass --home".into())
            })?,
    };

    let mut config = VaultConfig::load(&home)?;
    if let Some(url) = &cli.api_url {
        config.api_url = url.clone();
    }
    if let Some(secret) = &cli.api_secret {
        config.api_secret = Some(secret.clone());
    }

    let store = FsStore::new(home.join("store")).with_quota(config.local_quota_bytes);
    let api = HttpCollectionApi::new(
        &config.api_url,
        config.remote_timeout(),
        config.api_secret.clone(),
    )?;
    let vault = Vault::open(store, api, &config).await?;

    Ok(AppContext {
        vault,
        home,
        config,
    })
}

async fn handle_status(ctx: &AppContext) -> Result<()> {
    match ctx.vault.health().await {
        Ok(health) => println!(
            "{} {} (database: {})",
            "remote:".bold(),
            health.status.green(),
            health.database
        ),
        Err(e) => println!("{} {} ({})", "remote:".bold(), "unavailable".yellow(), e),
    }
    print_source(ctx.vault.last_source());
    print_counts(&ctx.vault);
    Ok(())
}

async fn handle_pull(ctx: &mut AppContext) -> Result<()> {
    let report = ctx.vault.reload().await?;
    print_source(Some(report.source));
    if let Some(reason) = &report.remote_error {
        println!("  {}", reason.dimmed());
    }
    print_integrity(&report.integrity);
    print_counts(&ctx.vault);
    Ok(())
}

async fn handle_push(ctx: &mut AppContext) -> Result<()> {
    let report = ctx.vault.save().await?;
    print_save(&report);
    Ok(())
}

async fn handle_backup(ctx: &mut AppContext, action: BackupAction) -> Result<()> {
    match action {
        BackupAction::Create => {
            let entry = ctx.vault.create_snapshot(SnapshotType::Manual)?;
            println!(
                "{} snapshot {} ({} items)",
                "Created".green(),
                entry.id.bold(),
                entry.total_items
            );
        }
        BackupAction::List => {
            let snapshots = ctx.vault.list_snapshots()?;
            if snapshots.is_empty() {
                println!("No snapshots.");
                return Ok(());
            }
            let formatter = timeago::Formatter::new();
            let now = Utc::now();
            for entry in snapshots {
                let age = entry
                    .created_at()
                    .and_then(|t| (now - t).to_std().ok())
                    .map(|d| formatter.convert(d))
                    .unwrap_or_default();
                println!(
                    "{:<15} {:<12} {:>6} items  {}",
                    entry.id.bold(),
                    entry.kind.to_string().cyan(),
                    entry.total_items,
                    age.dimmed()
                );
            }
        }
        BackupAction::Restore { id } => {
            let report = ctx.vault.restore_snapshot(&id).await?;
            println!(
                "{} snapshot {} (previous state kept as a pre-restore snapshot)",
                "Restored".green(),
                id.bold()
            );
            print_save(&report);
        }
        BackupAction::Delete { id } => {
            ctx.vault.delete_snapshot(&id)?;
            println!("{} snapshot {}", "Deleted".green(), id.bold());
        }
        BackupAction::Auto {
            enable,
            disable,
            hours,
        } => {
            if let Some(hours) = hours {
                if hours <= 0 {
                    return Err(VaultError::Config("--hours must be positive".into()));
                }
                ctx.config.auto_backup_interval_hours = hours;
            }
            if enable {
                ctx.config.auto_backup = true;
            } else if disable {
                ctx.config.auto_backup = false;
            }
            ctx.config.save(&ctx.home)?;

            if ctx.config.auto_backup {
                ctx.vault.enable_auto_backup(ctx.config.auto_backup_interval());
                println!(
                    "Auto-backup {} (every {}h)",
                    "enabled".green(),
                    ctx.config.auto_backup_interval_hours
                );
            } else {
                ctx.vault.disable_auto_backup();
                println!("Auto-backup {}", "disabled".yellow());
            }
        }
    }
    Ok(())
}

fn handle_export(ctx: &AppContext, file: &Path, gzip: bool) -> Result<()> {
    let bytes = ctx.vault.export(gzip)?;
    fs::write(file, bytes)?;
    println!(
        "{} {} items to {}",
        "Exported".green(),
        ctx.vault.working_set().total_items(),
        file.display()
    );
    Ok(())
}

async fn handle_import(ctx: &mut AppContext, file: &Path) -> Result<()> {
    let bytes = fs::read(file)?;
    let report = ctx.vault.import(&bytes).await?;
    println!(
        "{} {} items from {} (previous state kept as a pre-import snapshot)",
        "Imported".green(),
        ctx.vault.working_set().total_items(),
        file.display()
    );
    print_save(&report);
    Ok(())
}

fn handle_search(ctx: &AppContext, collection: Collection, text: &str) -> Result<()> {
    let results = ctx.vault.search_now(collection, text)?;
    if results.matches.is_empty() {
        println!("No matches in {}.", collection);
    }
    for record in &results.matches {
        println!("{}", record_line(record));
    }
    if !results.suggestions.is_empty() {
        println!();
        println!("{} {}", "Suggestions:".dimmed(), results.suggestions.join(", "));
    }
    Ok(())
}

fn handle_filter(ctx: &mut AppContext, args: FilterArgs) -> Result<()> {
    let criteria = SearchCriteria {
        text: args.text,
        status: args.status,
        priority: args.priority,
        customer: args.customer,
        location: args.location,
        date_from: args.from,
        date_to: args.to,
        price_min: args.min_price,
        price_max: args.max_price,
        tags: args.tags,
    };

    if let Some(size) = args.page_size {
        ctx.vault.pager_mut().set_page_size(size);
    }
    // First pass learns the total so the requested page can be clamped
    let total = ctx.vault.filter_view(args.collection, &criteria).total_items;
    ctx.vault.pager_mut().go_to(args.page, total);
    let page = ctx.vault.filter_view(args.collection, &criteria);

    for record in &page.data {
        println!("{}", record_line(record));
    }
    println!(
        "{}",
        format!(
            "page {}/{} ({} matching)",
            page.current_page,
            page.total_pages.max(1),
            page.total_items
        )
        .dimmed()
    );

    if let Some(name) = args.save_as {
        let saved = ctx.vault.save_search(&name, args.collection, criteria)?;
        println!("{} search '{}' as {}", "Saved".green(), name, saved.id.bold());
    }
    Ok(())
}

fn handle_saved(ctx: &AppContext, action: SavedAction) -> Result<()> {
    match action {
        SavedAction::List => {
            let saved = ctx.vault.list_saved_searches()?;
            if saved.is_empty() {
                println!("No saved searches.");
            }
            for s in saved {
                println!("{}  {} ({})", s.id.bold(), s.name, s.collection.to_string().cyan());
            }
        }
        SavedAction::Run { id } => {
            for record in ctx.vault.apply_saved_search(&id)? {
                println!("{}", record_line(&record));
            }
        }
        SavedAction::Delete { id } => {
            ctx.vault.delete_saved_search(&id)?;
            println!("{} saved search {}", "Deleted".green(), id.bold());
        }
    }
    Ok(())
}

fn handle_history(ctx: &AppContext, limit: usize) -> Result<()> {
    let entries = ctx.vault.recent_changes(limit)?;
    if entries.is_empty() {
        println!("No changes recorded.");
    }
    for entry in entries {
        let target = entry
            .collection
            .map(|c| format!(" [{}]", c))
            .unwrap_or_default();
        println!(
            "{}  {:<8}{} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            format!("{:?}", entry.action).to_lowercase(),
            target.cyan(),
            entry.summary
        );
    }
    Ok(())
}

async fn handle_watch(ctx: &mut AppContext) -> Result<()> {
    let (tx, rx) = mpsc::channel(4);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(HostSignal::Shutdown).await;
        }
    });

    println!(
        "Watching {} for changes (Ctrl-C to stop)",
        ctx.home.display().to_string().bold()
    );
    ctx.vault.run(rx).await
}

fn print_source(source: Option<DataSource>) {
    match source {
        Some(DataSource::Remote) => println!("{} remote", "source:".bold()),
        Some(DataSource::Local) => {
            println!("{} {}", "source:".bold(), "local store (remote unavailable)".yellow())
        }
        None => {}
    }
}

fn print_counts(vault: &LiveVault) {
    for (collection, records) in vault.working_set().iter() {
        println!("  {:<10} {:>5}", collection.to_string(), records.len());
    }
}

fn print_integrity(report: &IntegrityReport) {
    if !report.healed.is_empty() {
        println!(
            "{} removed {} corrupt image field(s)",
            "Repaired:".yellow(),
            report.healed.len()
        );
    }
    if !report.duplicate_ids.is_empty() {
        println!(
            "{} duplicate ids across collections: {}",
            "Warning:".yellow(),
            report.duplicate_ids.join(", ")
        );
    }
}

fn print_save(report: &SaveReport) {
    if report.remote_synced() {
        println!("{} to remote and local store", "Saved".green());
    } else {
        let failed: Vec<String> = report
            .remote_failures
            .iter()
            .map(|(c, _)| c.to_string())
            .collect();
        println!(
            "{} locally; remote unavailable for {}",
            "Saved".yellow(),
            failed.join(", ")
        );
    }
    if let Some(cleanup) = &report.cleanup {
        println!(
            "{} local store was full: stripped {} image(s), removed {} key(s)",
            "Note:".yellow(),
            cleanup.stripped_images,
            cleanup.removed_keys.len()
        );
    }
    print_integrity(&report.integrity);
}

fn record_line(record: &Record) -> String {
    let name = record.name().unwrap_or("(unnamed)");
    let id = record.id().unwrap_or_default();
    let status = record.get_str("status").unwrap_or("");
    format!("{:<32} {:<10} {}", name, status, id.dimmed())
}
