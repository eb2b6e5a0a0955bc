use colored::Colorize;

use super::open_store;
use crate::bridge;
use crate::cli::Cli;
use crate::config::Config;
use crate::error::Result;
use crate::storage::ConfigStore;
use crate::watcher::{StatusMessage, TrackingStatus};

pub async fn status(cli: &Cli) -> Result<()> {
    let config = Config::load()?;
    let store = open_store(&config).await?;
    let stored = store.load().await?;

    let live = if bridge::is_bridge_running(config.bridge.port).await {
        match bridge::request_stats(config.bridge.port).await {
            Ok(stats) => Some(stats),
            Err(e) => {
                tracing::debug!("getStats failed: {}", e);
                None
            }
        }
    } else {
        None
    };

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "toggleEnabled": stored.enabled,
                "filterText": stored.filter_text,
                "watcher": live,
            }))?
        );
        return Ok(());
    }

    let toggle = if stored.enabled {
        "On".green().bold()
    } else {
        "Off".dimmed()
    };
    println!("Tracking: {}", toggle);
    if stored.filter_text.trim().is_empty() {
        println!("Filter:   {}", "(not set)".dimmed());
    } else {
        println!("Filter:   \"{}\"", stored.filter_text);
    }

    match live {
        Some(stats) => {
            println!(
                "Watcher:  {} (port {})",
                "running".green(),
                config.bridge.port
            );
            println!("Added:    {}", stats.added_count);
        }
        None => println!("Watcher:  {}", "not running".dimmed()),
    }

    Ok(())
}

pub async fn watch(cli: &Cli) -> Result<()> {
    let config = Config::load()?;
    let json = cli.json;

    if !json {
        println!(
            "Following watcher on port {} (Ctrl-C to stop)",
            config.bridge.port
        );
    }

    bridge::follow(config.bridge.port, |message| {
        if json {
            if let Ok(line) = serde_json::to_string(&message) {
                println!("{}", line);
            }
        } else {
            print_message(&message);
        }

        // Single-shot tracking ends with its completion message.
        !matches!(
            message,
            StatusMessage::StatusUpdate {
                status: TrackingStatus::Completed,
                ..
            }
        )
    })
    .await
}

fn print_message(message: &StatusMessage) {
    match message {
        StatusMessage::StatsUpdate { added_count } => {
            println!("🛒 Added to cart so far: {}", added_count.to_string().bold());
        }
        StatusMessage::StatusUpdate { status, message } => {
            let text = match status {
                TrackingStatus::Completed => message.green().to_string(),
                TrackingStatus::Error => message.red().to_string(),
                TrackingStatus::Waiting => message.yellow().to_string(),
                TrackingStatus::Searching => message.to_string(),
            };
            println!("{} {}", status.icon(), text);
            if *status == TrackingStatus::Completed {
                println!("⏸️  Tracking turned off");
            }
        }
    }
}
