pub mod config;
pub mod control;
pub mod run;
pub mod status;

use crate::config::Config;
use crate::error::Result;
use crate::storage::FileStore;

/// Open the shared toggle/filter store named by `config`.
async fn open_store(config: &Config) -> Result<FileStore> {
    FileStore::open(config.storage.resolved_path()?).await
}
