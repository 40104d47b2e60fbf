use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use parcelscout_core::{
    AutoRefresh, Carrier, Config, Exporter, HttpTrackingService, NewPackage, Package,
    PackagePatch, PackageStatus, PackageStore, RefreshOutcome, Tracker,
};
use parcelscout_storage::{MemoryStorage, SqliteStorage, Storage};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "parcelscout")]
#[command(version, about = "Track parcels across carriers from one place", long_about = None)]
struct Cli {
    /// Tracking service base URL (overrides config and PARCELSCOUT_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Package database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Keep state in memory only, nothing is written to disk
    #[arg(long, global = true)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Start tracking a package
    Add {
        tracking_number: String,
        /// usps, ups, fedex, dhl, amazon, ontrac or lasership; detected when omitted
        #[arg(long)]
        carrier: Option<Carrier>,
        #[arg(long)]
        nickname: Option<String>,
    },
    /// List tracked packages
    List {
        /// Show the archive instead of active packages
        #[arg(long)]
        archived: bool,
        #[arg(long)]
        carrier: Option<Carrier>,
        /// Only delivered packages
        #[arg(long, conflicts_with = "in_transit")]
        delivered: bool,
        /// Only packages still on their way
        #[arg(long)]
        in_transit: bool,
    },
    /// Show one package with its full event history
    Show { id: String },
    /// Refresh one package by tracking number
    Refresh { tracking_number: String },
    /// Refresh every active package
    RefreshAll,
    /// Keep refreshing on a timer until Ctrl+C
    Watch {
        /// Seconds between refreshes (default from config, 300)
        #[arg(long)]
        interval_secs: Option<u64>,
    },
    /// Move a package to the archive
    Archive { id: String },
    /// Bring a package back from the archive
    Unarchive { id: String },
    /// Stop tracking a package
    Remove { id: String },
    /// Set or clear a package's nickname
    Rename { id: String, nickname: Option<String> },
    /// Write active packages to packages-<date>.json
    Export {
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
    /// Add packages from an exported JSON file
    Import { file: PathBuf },
    /// Summary counts
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Ask the service which carrier a tracking number belongs to
    Detect { tracking_number: String },
    /// List supported carriers
    Carriers,
    /// Forget every package, active and archived
    Clear {
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so exports and --json output stay pipeable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parcelscout=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let Some(command) = cli.command else {
        println!("No command specified. Try --help");
        return Ok(());
    };

    let mut config = Config::load().context("Failed to load config")?;
    if let Some(url) = cli.api_url {
        config.service.base_url = url;
    }
    if let Some(db) = cli.db {
        config.storage.path = Some(db);
    }

    let storage: Arc<dyn Storage> = if cli.ephemeral {
        debug!("Ephemeral session, nothing will be persisted");
        Arc::new(MemoryStorage::new())
    } else {
        let path = config.database_path()?;
        debug!("Opening package database at {}", path.display());
        Arc::new(
            SqliteStorage::open(&path)
                .with_context(|| format!("Failed to open {}", path.display()))?,
        )
    };

    let store = PackageStore::open(storage)
        .context("Failed to read saved packages")?
        .into_shared();
    debug!("Tracking service at {}", config.service.base_url);
    let service = HttpTrackingService::new(&config.service.base_url)?;
    let tracker = Arc::new(Tracker::new(store, Arc::new(service)));

    run(command, &config, tracker).await
}

async fn run(command: Commands, config: &Config, tracker: Arc<Tracker>) -> anyhow::Result<()> {
    let store = tracker.store();

    match command {
        Commands::Add {
            tracking_number,
            carrier,
            nickname,
        } => {
            let mut request = NewPackage::new(tracking_number);
            request.carrier = carrier;
            request.nickname = nickname;

            let package = tracker.add_package(request).await?;
            println!(
                "Now tracking {} ({}) - {}",
                package.display_name(),
                package.carrier,
                package.status
            );
            println!("id: {}", package.id);
        }
        Commands::List {
            archived,
            carrier,
            delivered,
            in_transit,
        } => {
            let store = store.lock();
            let mut packages: Vec<&Package> = if archived {
                store.archived().iter().collect()
            } else if delivered {
                store.delivered()
            } else if in_transit {
                store.active_undelivered()
            } else {
                store.active().iter().collect()
            };
            if let Some(carrier) = carrier {
                packages.retain(|p| p.carrier == carrier);
            }

            if packages.is_empty() {
                println!("No packages.");
            }
            for package in packages {
                print_row(package);
            }
        }
        Commands::Show { id } => {
            let store = store.lock();
            match store.get(&id) {
                Some(package) => print_details(package),
                None => println!("No package with id {}", id),
            }
        }
        Commands::Refresh { tracking_number } => {
            match tracker.refresh_package(&tracking_number).await {
                RefreshOutcome::Updated => {
                    if let Some(package) = store.lock().find_by_tracking_number(&tracking_number) {
                        print_row(package);
                    }
                }
                RefreshOutcome::Failed => {
                    println!("Refresh failed, keeping the last known status (see log).")
                }
                RefreshOutcome::NotFound => {
                    println!("No active package with tracking number {}", tracking_number)
                }
            }
        }
        Commands::RefreshAll => {
            tracker.refresh_all().await;
            print_stats(&store.lock().stats());
        }
        Commands::Watch { interval_secs } => {
            if interval_secs.is_none() && !config.refresh.auto_refresh {
                anyhow::bail!("auto_refresh is disabled in config; pass --interval-secs to override");
            }
            let period = interval_secs
                .map(|s| std::time::Duration::from_secs(s.max(1)))
                .unwrap_or_else(|| config.refresh.interval());

            let handle = AutoRefresh::spawn(Arc::clone(&tracker), period);
            println!(
                "Refreshing every {}s. Press Ctrl+C to stop.",
                period.as_secs()
            );
            tokio::signal::ctrl_c().await?;
            handle.shutdown().await;
        }
        Commands::Archive { id } => {
            let mut store = store.lock();
            if !is_present(store.active().iter().any(|p| p.id == id), &id, "active") {
                return Ok(());
            }
            store.archive(&id);
            println!("Archived {}", id);
        }
        Commands::Unarchive { id } => {
            let mut store = store.lock();
            if !is_present(store.archived().iter().any(|p| p.id == id), &id, "archived") {
                return Ok(());
            }
            store.unarchive(&id);
            println!("Restored {}", id);
        }
        Commands::Remove { id } => {
            let mut store = store.lock();
            if !is_present(store.get(&id).is_some(), &id, "tracked") {
                return Ok(());
            }
            store.remove(&id);
            println!("Removed {}", id);
        }
        Commands::Rename { id, nickname } => {
            let mut store = store.lock();
            if !is_present(store.active().iter().any(|p| p.id == id), &id, "active") {
                return Ok(());
            }
            let nickname = nickname
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty());
            store.update(&id, PackagePatch::nickname(nickname));
            println!("Renamed {}", id);
        }
        Commands::Export { dir } => {
            let today = chrono::Local::now().date_naive();
            let path = Exporter::export_to_dir(&store.lock(), &dir, today)?;
            println!("Exported to {}", path.display());
        }
        Commands::Import { file } => {
            let added = Exporter::import_file(&mut store.lock(), &file)
                .with_context(|| format!("Failed to import {}", file.display()))?;
            println!("Imported {} new packages", added);
        }
        Commands::Stats { json } => {
            let stats = store.lock().stats();
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_stats(&stats);
            }
        }
        Commands::Detect { tracking_number } => {
            let carrier = tracker.detect_carrier(&tracking_number).await?;
            println!("{}", carrier);
            if let Some(url) = carrier.tracking_url(tracking_number.trim()) {
                println!("{}", url);
            }
        }
        Commands::Carriers => {
            for carrier in Carrier::all() {
                println!("{:<10} {}", carrier.as_str(), carrier.label());
            }
        }
        Commands::Clear { yes } => {
            if !yes {
                anyhow::bail!("This forgets every package. Re-run with --yes to confirm.");
            }
            store.lock().clear();
            println!("Cleared.");
        }
    }

    Ok(())
}

/// Missing ids are a notice, not a failure: the command is simply a no-op
fn is_present(found: bool, id: &str, partition: &str) -> bool {
    if !found {
        println!("No {} package with id {}, nothing to do", partition, id);
    }
    found
}

fn status_marker(status: PackageStatus) -> &'static str {
    match status {
        PackageStatus::Delivered => "✔",
        PackageStatus::OutForDelivery => "→",
        PackageStatus::Exception | PackageStatus::Returned => "!",
        _ => "·",
    }
}

fn print_row(package: &Package) {
    let latest = package
        .latest_event()
        .map(|e| e.description.as_str())
        .unwrap_or("-");
    println!(
        "{} {:<24} {:<8} {:<16} {}  [{}]",
        status_marker(package.status),
        package.display_name(),
        package.carrier.label(),
        package.status.label(),
        latest,
        package.id
    );
}

fn print_details(package: &Package) {
    println!("{}", package.display_name());
    println!("  id:        {}", package.id);
    println!("  tracking:  {}", package.tracking_number);
    println!(
        "  carrier:   {}{}",
        package.carrier,
        if package.carrier_detected { " (detected)" } else { "" }
    );
    println!("  status:    {}", package.status);
    if let Some(eta) = package.estimated_delivery {
        println!("  eta:       {}", eta.format("%Y-%m-%d %H:%M"));
    }
    if let Some(at) = package.delivered_at {
        println!("  delivered: {}", at.format("%Y-%m-%d %H:%M"));
    }
    println!("  updated:   {}", package.last_updated.format("%Y-%m-%d %H:%M"));
    if package.archived {
        println!("  (archived)");
    }
    if let Some(url) = package.tracking_url() {
        println!("  {}", url);
    }

    if !package.events.is_empty() {
        println!();
    }
    for event in &package.events {
        println!(
            "  {}  {:<28} {}",
            event.timestamp.format("%Y-%m-%d %H:%M"),
            event.location.as_deref().unwrap_or(""),
            event.description
        );
    }
}

fn print_stats(stats: &parcelscout_core::PackageStats) {
    println!("Total:      {}", stats.total);
    println!("Active:     {}", stats.active);
    println!("In transit: {}", stats.in_transit);
    println!("Delivered:  {}", stats.delivered);
    println!("Exceptions: {}", stats.exception);
    for (carrier, count) in &stats.carrier_breakdown {
        println!("  {:<10} {}", carrier.label(), count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parcelscout_core::STORAGE_KEY;

    fn offline_tracker(storage: Arc<dyn Storage>) -> Arc<Tracker> {
        let store = PackageStore::open(storage).unwrap().into_shared();
        // Never contacted by the commands below
        let service = HttpTrackingService::new("http://127.0.0.1:9/api").unwrap();
        Arc::new(Tracker::new(store, Arc::new(service)))
    }

    #[tokio::test]
    async fn test_missing_id_commands_succeed_without_writing() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let tracker = offline_tracker(Arc::clone(&storage));
        let config = Config::default();

        let commands = vec![
            Commands::Archive { id: "nope".to_string() },
            Commands::Unarchive { id: "nope".to_string() },
            Commands::Remove { id: "nope".to_string() },
            Commands::Rename {
                id: "nope".to_string(),
                nickname: Some("Shoes".to_string()),
            },
        ];
        for command in commands {
            assert!(run(command, &config, Arc::clone(&tracker)).await.is_ok());
        }

        assert_eq!(storage.get(STORAGE_KEY).unwrap(), None);
        assert!(tracker.store().lock().active().is_empty());
    }

    #[test]
    fn test_cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["parcelscout", "archive", "ups_1Z", "--ephemeral"]).unwrap();
        assert!(cli.ephemeral);
        assert!(matches!(cli.command, Some(Commands::Archive { id }) if id == "ups_1Z"));
    }
}
