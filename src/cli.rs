use clap::{Parser, Subcommand};

use crate::commands;
use crate::error::Result;
use crate::watcher::Mode;

/// Cartwatch - add catalog products to the cart the moment they show up
#[derive(Parser)]
#[command(name = "cartwatch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// CDP port or endpoint of the browser showing the catalog
    #[arg(long, env = "CARTWATCH_CDP", global = true)]
    pub cdp: Option<String>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Watch the catalog tab and add matching products to the cart
    Run {
        /// Operating mode: continuous or single-shot (overrides watcher.mode)
        #[arg(long)]
        mode: Option<Mode>,
    },

    /// Set the product filter text
    Filter {
        /// Text to look for in product names (e.g. "Gold Coin")
        text: String,

        /// Also turn tracking on if the text is not blank
        #[arg(long)]
        enable: bool,
    },

    /// Turn tracking on
    Enable,

    /// Turn tracking off
    Disable,

    /// Show the stored filter, the toggle and live stats
    Status,

    /// Follow status updates from a running watcher
    Watch,

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., "watcher.mode", "selectors.container")
        key: String,
        /// Configuration value
        value: String,
    },

    /// Get a configuration value
    Get {
        /// Configuration key
        key: String,
    },

    /// Edit configuration file
    Edit,

    /// Show configuration file path
    Path,

    /// Delete the configuration file
    Reset,
}

impl Cli {
    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Commands::Run { mode } => commands::run::run(self, *mode).await,
            Commands::Filter { text, enable } => {
                commands::control::filter(self, text, *enable).await
            }
            Commands::Enable => commands::control::enable(self).await,
            Commands::Disable => commands::control::disable(self).await,
            Commands::Status => commands::status::status(self).await,
            Commands::Watch => commands::status::watch(self).await,
            Commands::Config { command } => commands::config::run(self, command).await,
        }
    }
}
