use std::env;
use std::sync::Arc;

use clap::Parser;
use ems_store::engine::{MemStore, Persistence};
use ems_store::server::Router;
use ems_store::CollectionAdmin;
use log::{error, info};
use tokio::signal;

/// Serves a persistent document store to EMS application processes.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding one JSON snapshot per database [env: EMS_DATA_DIR, default: store]
    #[arg(short, long)]
    data_dir: Option<String>,

    /// TCP port to listen on [env: EMS_PORT, default: 7001]
    #[arg(short, long)]
    port: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let data_dir = args
        .data_dir
        .or_else(|| env::var("EMS_DATA_DIR").ok())
        .unwrap_or_else(|| "store".to_string());

    let port = args
        .port
        .or_else(|| env::var("EMS_PORT").ok())
        .unwrap_or_else(|| "7001".to_string());

    let persistence = Arc::new(Persistence::new(&data_dir)?);
    let initial_data = persistence.load_all()?;
    let store = Arc::new(MemStore::new(initial_data, Some(persistence)));

    let router = Router::new(store.clone());

    info!("Starting EMS store daemon...");
    info!("Loaded {} databases from {}", store.databases()?.len(), data_dir);

    tokio::select! {
        res = router.listen(&port) => {
            if let Err(e) = res {
                error!("TCP server failed: {}", e);
            }
        }
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received. Finalizing disk writes...");
        }
    }

    store.flush().await?;
    info!("Persistence complete. Exiting.");
    Ok(())
}
