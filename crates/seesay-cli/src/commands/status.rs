//! The `seesay status` command.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, Table};

use seesay_assets::JsonFileStore;
use seesay_core::persistence::StorageKey;

/// Keys holding audio payloads; only their size is shown.
const AUDIO_KEYS: [StorageKey; 3] = [
    StorageKey::AudioChunks,
    StorageKey::SessionRecordingChunks,
    StorageKey::SessionRecordingFinal,
];

pub fn execute(store: Option<PathBuf>, config_path: Option<PathBuf>) -> Result<()> {
    let config = super::config_with_store(config_path.as_deref(), store)?;
    if !config.store_path.exists() {
        println!("No session state at {}.", config.store_path.display());
        return Ok(());
    }

    let entries = JsonFileStore::open(&config.store_path).snapshot();

    let mut table = Table::new();
    table.set_header(vec!["Key", "Value"]);
    let mut shown = 0;
    for key in StorageKey::ALL {
        let Some(value) = entries.get(key.as_str()) else {
            continue;
        };
        let display = if AUDIO_KEYS.contains(&key) {
            format!("<{} bytes>", value.len())
        } else {
            value.clone()
        };
        table.add_row(vec![Cell::new(key), Cell::new(display)]);
        shown += 1;
    }

    if shown == 0 {
        println!("No session in progress.");
    } else {
        println!("{table}");
    }
    Ok(())
}
