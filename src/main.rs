use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cartwatch::cli::Cli;
use cartwatch::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise --verbose turns on debug output for this crate.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("info,cartwatch=debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    cli.run().await
}
