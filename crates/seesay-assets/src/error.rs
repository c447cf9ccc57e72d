//! Asset error types.

use thiserror::Error;

/// Errors that can occur when reading assets or the catalog.
#[derive(Debug, Error)]
pub enum AssetError {
    /// The file or URL does not exist.
    #[error("asset not found: {0}")]
    NotFound(String),

    /// The server returned an error response.
    #[error("HTTP {status} fetching {url}")]
    Http { status: u16, url: String },

    /// The request timed out.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// A network error occurred.
    #[error("network error: {0}")]
    Network(String),

    /// The bytes could not be decoded as an image.
    #[error("failed to decode image {url}: {message}")]
    Decode { url: String, message: String },
}
