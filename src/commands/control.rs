use colored::Colorize;

use super::open_store;
use crate::cli::Cli;
use crate::config::Config;
use crate::error::{CartwatchError, Result};
use crate::storage::ConfigStore;
use crate::watcher::is_active_filter;

pub async fn filter(cli: &Cli, text: &str, enable: bool) -> Result<()> {
    let config = Config::load()?;
    let store = open_store(&config).await?;

    store.set_filter_text(text).await?;

    let blank = !is_active_filter(text);
    let enabled = if enable && !blank {
        store.set_enabled(true).await?;
        true
    } else {
        store.load().await?.enabled
    };

    if cli.json {
        println!(
            "{}",
            serde_json::json!({
                "filterText": text,
                "toggleEnabled": enabled,
            })
        );
        return Ok(());
    }

    if blank {
        println!("{} Enter text to search for products", "!".yellow());
    } else {
        println!("{} Filter set to \"{}\"", "✓".green(), text.trim());
    }
    if enable && !blank {
        println!("🚀 Tracking started");
    }

    Ok(())
}

pub async fn enable(cli: &Cli) -> Result<()> {
    let config = Config::load()?;
    let store = open_store(&config).await?;

    let current = store.load().await?;
    if !is_active_filter(&current.filter_text) {
        return Err(CartwatchError::ConfigError(
            "Enter filter text first: cartwatch filter <TEXT>".to_string(),
        ));
    }

    store.set_enabled(true).await?;

    if cli.json {
        println!("{}", serde_json::json!({ "toggleEnabled": true }));
    } else {
        println!(
            "🚀 Tracking started for \"{}\"",
            current.filter_text.trim().bold()
        );
    }

    Ok(())
}

pub async fn disable(cli: &Cli) -> Result<()> {
    let config = Config::load()?;
    let store = open_store(&config).await?;

    store.set_enabled(false).await?;

    if cli.json {
        println!("{}", serde_json::json!({ "toggleEnabled": false }));
    } else {
        println!("⏸️  Tracking stopped");
    }

    Ok(())
}
