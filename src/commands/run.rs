use std::sync::Arc;

use colored::Colorize;
use tokio_util::sync::CancellationToken;

use crate::bridge;
use crate::browser::{CdpCatalogPage, CdpSession};
use crate::cli::Cli;
use crate::config::Config;
use crate::error::{CartwatchError, Result};
use crate::storage::FileStore;
use crate::watcher::{BroadcastNotifier, Mode, Monitor, MonitorSettings};

/// Status messages buffered per bridge client before it starts lagging.
const STATUS_CAPACITY: usize = 64;

pub async fn run(cli: &Cli, mode: Option<Mode>) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(mode) = mode {
        config.watcher.mode = mode;
    }
    if let Some(cdp) = &cli.cdp {
        config.browser.cdp = cdp.clone();
    }

    // Fail fast when the catalog tab is not open yet.
    let session = CdpSession::new(&config.browser.cdp, &config.target.host)?;
    let page_info = session.target_page().await?;
    tracing::info!("Attached to {} ({})", page_info.url, page_info.id);

    let store = Arc::new(FileStore::open(config.storage.resolved_path()?).await?);
    let notifier = BroadcastNotifier::new(STATUS_CAPACITY);
    let page = CdpCatalogPage::new(session, config.selectors.clone());
    let monitor = Monitor::new(
        page,
        Arc::clone(&store),
        notifier.clone(),
        MonitorSettings::from_config(&config),
    );

    let listener = bridge::bind(config.bridge.port).await?;
    let shutdown = CancellationToken::new();

    if !cli.json {
        println!(
            "{} Watching {} in {} mode",
            "✓".green(),
            config.target.host.bold(),
            config.watcher.mode.as_str().cyan()
        );
        println!(
            "  Storage: {}",
            store.path().display().to_string().dimmed()
        );
        println!("  Bridge:  ws://127.0.0.1:{}", config.bridge.port);
        println!("  Press Ctrl-C to stop");
    }

    let bridge_task = tokio::spawn(bridge::serve(
        listener,
        monitor.stats(),
        notifier,
        shutdown.clone(),
    ));

    let poll_task = {
        let store = Arc::clone(&store);
        let every = config.storage.poll_interval();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { store.watch(every, shutdown).await })
    };

    let monitor_task = tokio::spawn(monitor.run(shutdown.clone()));

    wait_for_shutdown().await?;
    tracing::info!("Shutting down");
    shutdown.cancel();

    let (monitor_done, poll_done, bridge_done) = tokio::join!(monitor_task, poll_task, bridge_task);
    monitor_done.map_err(|e| CartwatchError::Other(format!("Watcher task failed: {}", e)))?;
    poll_done.map_err(|e| CartwatchError::Other(format!("Storage task failed: {}", e)))?;
    bridge_done.map_err(|e| CartwatchError::Other(format!("Bridge task failed: {}", e)))??;

    if !cli.json {
        println!("{} Stopped", "✓".green());
    }

    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = sigint.recv() => tracing::info!("Received SIGINT"),
            _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
