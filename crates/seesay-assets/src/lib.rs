//! seesay-assets: real collaborators for the seesay session engine.
//!
//! Provides the asset client (local files or HTTP), mask decoding, the
//! file-backed store, a silent capture device for hosts without audio, the
//! JSON report sink, and configuration loading.

pub mod client;
pub mod config;
pub mod device;
pub mod error;
pub mod mask;
pub mod sink;
pub mod store;

pub use client::AssetClient;
pub use config::{load_config, load_config_from, SeesayConfig};
pub use device::SilentCaptureDevice;
pub use error::AssetError;
pub use sink::JsonFileSink;
pub use store::JsonFileStore;
