pub mod init;
pub mod reset;
pub mod run;
pub mod status;
pub mod validate;

use std::path::{Path, PathBuf};

use anyhow::Result;

use seesay_assets::config::{load_config_from, SeesayConfig};

/// Load the config and apply a `--store` override.
pub(crate) fn config_with_store(
    config_path: Option<&Path>,
    store: Option<PathBuf>,
) -> Result<SeesayConfig> {
    let mut config = load_config_from(config_path)?;
    if let Some(store) = store {
        config.store_path = store;
    }
    Ok(config)
}
