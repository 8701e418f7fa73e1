use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use ems_store::adapter::StorageAdapter;
use ems_store::bootstrap::Bootstrap;
use ems_store::compat::VirtualFs;
use ems_store::config::AppConfig;
use ems_store::engine::Vault;
use ems_store::migrate::Migrator;
use ems_store::registry::LogicalFile;
use ems_store::service::Service;
use ems_store::{sdk, Error};
use serde_json::Value;

/// Operator tool for the EMS storage layer.
///
/// Settings come from EMS_* environment variables; flags override them.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// tcp://host:port, file://dir or memory://
    #[arg(long)]
    store_uri: Option<String>,

    #[arg(long)]
    db_name: Option<String>,

    /// Directory containing the legacy data/*.json files
    #[arg(long)]
    legacy_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone)]
enum Commands {
    /// Import legacy files that are not in the store yet and secure the permanent boss
    Bootstrap,
    /// Reload every legacy file, replacing what the store holds
    Migrate {
        /// Overwrite existing collections without asking
        #[arg(short, long)]
        yes: bool,
    },
    /// Print a logical file (or any JSON file) as the application sees it
    Read { path: String },
    /// Replace a logical file with the given JSON
    Write { path: String, json: String },
    /// Write an export bundle to a file or stdout
    Export {
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Load an export bundle
    Import { file: PathBuf },
    /// Remove every time entry
    ResetEntries,
    /// Check that the store answers
    Ping,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = AppConfig::from_env();
    if let Some(uri) = cli.store_uri {
        config.store.uri = uri;
    }
    if let Some(db) = cli.db_name {
        config.store.database = db;
    }
    if let Some(dir) = cli.legacy_dir {
        config.legacy_dir = dir;
    }

    let store = sdk::connect(&config.store).await?;
    let adapter = Arc::new(StorageAdapter::new(store.clone(), config.store.database.clone()));

    let result = run(cli.command, &config, adapter).await;
    store.flush().await?;
    result
}

async fn run(command: Commands, config: &AppConfig, adapter: Arc<StorageAdapter>) -> anyhow::Result<()> {
    match command {
        Commands::Bootstrap => {
            let report = Bootstrap::new(&adapter, config.legacy_dir.clone(), config.fallback_admin.clone())
                .run()
                .await?;
            println!("{}", report);
            if report.failures().next().is_some() {
                bail!("bootstrap finished with failures; fix the files above and run it again");
            }
        }
        Commands::Migrate { yes } => {
            let migrator = Migrator::new(&adapter, config.legacy_dir.clone());
            match migrator.run(|occupied| yes || confirm_overwrite(occupied)).await {
                Ok(report) => {
                    println!("{}", report);
                    if !report.is_success() {
                        bail!("no files were migrated");
                    }
                }
                Err(Error::MigrationCancelled) => println!("Migration cancelled."),
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Read { path } => {
            let fs = VirtualFs::new(adapter, config.profile);
            let doc = fs.load_json(&path).await?;
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        Commands::Write { path, json } => {
            let doc: Value = serde_json::from_str(&json).context("argument is not valid JSON")?;
            let fs = VirtualFs::new(adapter, config.profile);
            fs.dump_json(&path, &doc).await?;
            println!("OK");
        }
        Commands::Export { out } => {
            let vault = Vault::from_secret(&config.session_secret);
            let bundle = Service::new(adapter).export_bundle(&vault).await?;
            let text = serde_json::to_string_pretty(&bundle)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
                    println!("Exported to {}", path.display());
                }
                None => println!("{}", text),
            }
        }
        Commands::Import { file } => {
            let text = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            let bundle: Value = serde_json::from_str(&text).context("bundle is not valid JSON")?;
            let vault = Vault::from_secret(&config.session_secret);
            let written = Service::new(adapter).import_bundle(&bundle, &vault).await?;
            for f in written {
                println!("Imported {}", f);
            }
        }
        Commands::ResetEntries => {
            Service::new(adapter).reset_all_entries().await?;
            println!("OK");
        }
        Commands::Ping => {
            adapter.store().ping().await?;
            println!("PONG");
        }
    }
    Ok(())
}

fn confirm_overwrite(occupied: &[LogicalFile]) -> bool {
    println!("The following collections already contain data:");
    for file in occupied {
        println!("  - {} ({})", file.collection(), file.description());
    }
    print!("Continue and overwrite existing data? (yes/no): ");
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "yes" | "y")
}
