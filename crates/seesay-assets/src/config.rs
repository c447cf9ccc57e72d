//! Session configuration loading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use seesay_core::answer::OrderedRule;
use seesay_core::model::AssetLayout;
use seesay_core::SessionConfig;

/// Starter configuration written by `seesay init`.
pub const STARTER_CONFIG: &str = r#"# See&Say configuration

# Directory or URL holding <query_number>/image_<k>.webp and the mask files.
asset_base = "resources/test_assets"

# Question catalog (CSV), local path or URL.
catalog = "resources/query_database.csv"

# Where session state is persisted between runs.
store_path = "./seesay-state.json"

# Where completed session reports are written.
output_dir = "./seesay-results"

countdown_secs = 3
capture_cap_secs = 60
session_slice_secs = 10

# "parsed-sequence" or "legacy-pair"
ordered_rule = "parsed-sequence"
"#;

/// Top-level seesay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeesayConfig {
    /// Base directory or URL for question images.
    #[serde(default = "default_asset_base")]
    pub asset_base: String,
    /// Catalog CSV location.
    #[serde(default = "default_catalog")]
    pub catalog: String,
    /// JSON file backing the key-value store.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    /// Output directory for session reports.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_countdown")]
    pub countdown_secs: u64,
    #[serde(default = "default_capture_cap")]
    pub capture_cap_secs: u64,
    #[serde(default = "default_session_slice")]
    pub session_slice_secs: u64,
    #[serde(default)]
    pub ordered_rule: OrderedRule,
}

fn default_asset_base() -> String {
    "resources/test_assets".to_string()
}
fn default_catalog() -> String {
    "resources/query_database.csv".to_string()
}
fn default_store_path() -> PathBuf {
    PathBuf::from("./seesay-state.json")
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("./seesay-results")
}
fn default_countdown() -> u64 {
    3
}
fn default_capture_cap() -> u64 {
    60
}
fn default_session_slice() -> u64 {
    10
}

impl Default for SeesayConfig {
    fn default() -> Self {
        Self {
            asset_base: default_asset_base(),
            catalog: default_catalog(),
            store_path: default_store_path(),
            output_dir: default_output_dir(),
            countdown_secs: default_countdown(),
            capture_cap_secs: default_capture_cap(),
            session_slice_secs: default_session_slice(),
            ordered_rule: OrderedRule::default(),
        }
    }
}

impl SeesayConfig {
    /// Engine timings and grading rules.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            countdown: Duration::from_secs(self.countdown_secs),
            capture_cap: Duration::from_secs(self.capture_cap_secs),
            session_slice: Duration::from_secs(self.session_slice_secs.max(1)),
            ordered_rule: self.ordered_rule,
        }
    }

    pub fn asset_layout(&self) -> AssetLayout {
        AssetLayout::new(self.asset_base.clone())
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!(
                "{}{}{}",
                &result[..start],
                value,
                &result[start + end + 1..]
            );
        } else {
            break;
        }
    }
    result
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `seesay.toml` in the current directory
/// 2. `~/.config/seesay/config.toml`
///
/// Environment variable overrides: `SEESAY_ASSET_BASE`, `SEESAY_CATALOG`.
pub fn load_config() -> Result<SeesayConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<SeesayConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("seesay.toml");
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|home| home.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let mut config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            tracing::debug!("loading config from {}", path.display());
            toml::from_str::<SeesayConfig>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => SeesayConfig::default(),
    };

    if let Ok(base) = std::env::var("SEESAY_ASSET_BASE") {
        config.asset_base = base;
    }
    if let Ok(catalog) = std::env::var("SEESAY_CATALOG") {
        config.catalog = catalog;
    }

    config.asset_base = resolve_env_vars(&config.asset_base);
    config.catalog = resolve_env_vars(&config.catalog);

    Ok(config)
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("seesay"))
}
