pub mod bridge;
pub mod browser;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod storage;
pub mod watcher;

pub use error::{CartwatchError, Result};
