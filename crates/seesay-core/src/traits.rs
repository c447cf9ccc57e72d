//! Collaborator traits for everything the engine does not own.
//!
//! Fetching images, decoding masks, talking to the microphone and submitting
//! results all happen behind these async traits. `seesay-assets` provides the
//! real implementations and [`crate::mock`] the test doubles.

use std::time::Duration;

use async_trait::async_trait;

use crate::answer::MaskBitmap;
use crate::audio::AudioChunk;
use crate::error::DeviceError;
use crate::report::SessionSubmission;

// ---------------------------------------------------------------------------
// Assets
// ---------------------------------------------------------------------------

/// Warms the cache for one image URL.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Fetch `url`. The bytes are not needed, only that the asset is local.
    async fn fetch(&self, url: &str) -> anyhow::Result<()>;
}

/// Loads and decodes mask bitmaps for mask answers.
#[async_trait]
pub trait MaskSource: Send + Sync {
    async fn load_mask(&self, url: &str) -> anyhow::Result<MaskBitmap>;
}

// ---------------------------------------------------------------------------
// Capture device
// ---------------------------------------------------------------------------

/// Parameters for a new capture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureRequest {
    /// Container type, `None` lets the device choose.
    pub mime_type: Option<String>,
    /// Deliver a chunk every `timeslice`; `None` means one chunk at stop.
    pub timeslice: Option<Duration>,
}

/// Whether an active capture is currently taking audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Recording,
    Paused,
}

/// The microphone.
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Human-readable device name.
    fn name(&self) -> &str;

    /// Whether the device can produce the given container type.
    fn supports_mime_type(&self, mime_type: &str) -> bool;

    /// Ask the platform (and the operator) for microphone access.
    async fn request_permission(&self) -> Result<(), DeviceError>;

    /// Open a new capture.
    async fn start(&self, request: &CaptureRequest)
        -> Result<Box<dyn ActiveCapture>, DeviceError>;
}

/// A capture in progress.
#[async_trait]
pub trait ActiveCapture: Send {
    fn mime_type(&self) -> &str;

    fn state(&self) -> CaptureState;

    fn pause(&mut self);

    fn resume(&mut self);

    /// Chunks delivered since the last call.
    fn take_chunks(&mut self) -> Vec<AudioChunk>;

    /// End the capture. Resolves once the device has been released, with any
    /// chunks not yet taken.
    async fn stop(self: Box<Self>) -> Result<Vec<AudioChunk>, DeviceError>;
}

// ---------------------------------------------------------------------------
// Outbound submission
// ---------------------------------------------------------------------------

/// Receives the results of a completed session.
#[async_trait]
pub trait SubmissionSink: Send + Sync {
    async fn submit(&self, submission: &SessionSubmission) -> anyhow::Result<()>;
}
