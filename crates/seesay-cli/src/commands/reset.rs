//! The `seesay reset` command.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use seesay_assets::JsonFileStore;
use seesay_core::persistence::Persistence;

pub fn execute(store: Option<PathBuf>, config_path: Option<PathBuf>) -> Result<()> {
    let config = super::config_with_store(config_path.as_deref(), store)?;
    let persistence = Persistence::new(Arc::new(JsonFileStore::open(&config.store_path)));
    persistence.clear_all();
    println!("Session state cleared ({}).", config.store_path.display());
    Ok(())
}
