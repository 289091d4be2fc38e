//! Collector Hub - exécutable autonome
//!
//! Charge la configuration, lance les quatre agents et affiche chaque verdict
//! du rule engine sur stdout jusqu'à Ctrl-C.

use anyhow::{Context, Result};
use collector_hub::config::{config_path, load_config};
use collector_hub::{CollectorHub, HubConfig};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // .env optionnel
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("collector_hub=info")),
        )
        .init();

    let path = config_path();
    let cfg = load_config(&path).unwrap_or_else(|e| {
        error!("{e}, falling back to defaults");
        HubConfig::default()
    });
    info!(
        "wearable={} rule_in={} rule_out={} sensor={}:{}",
        cfg.wearable_pipe.display(),
        cfg.rule_in_pipe.display(),
        cfg.rule_out_pipe.display(),
        cfg.bus.host,
        cfg.bus.port
    );

    let mut hub =
        CollectorHub::create(&cfg, |line| println!("{line}")).context("failed to create collector hub")?;
    hub.start().context("failed to start collector hub")?;

    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
    warn!("shutdown requested; waiting for pipe peers to release the readers");

    tokio::task::spawn_blocking(move || hub.destroy())
        .await
        .context("hub shutdown task failed")?;
    Ok(())
}
