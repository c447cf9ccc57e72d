//! A capture device for hosts without a microphone.
//!
//! The console runner has no audio stack, so it records silence: zero bytes
//! at a fixed rate for every second the capture is not paused. The timing
//! and exclusivity behave like a real device, which is what the engine
//! depends on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use seesay_core::audio::AudioChunk;
use seesay_core::traits::{ActiveCapture, CaptureDevice, CaptureRequest, CaptureState};
use seesay_core::DeviceError;

const DEFAULT_BYTES_PER_SEC: u64 = 1000;
const DEFAULT_MIME_TYPE: &str = "audio/webm";

/// Exclusive device that yields silent audio.
#[derive(Debug, Clone)]
pub struct SilentCaptureDevice {
    name: String,
    deny: bool,
    bytes_per_sec: u64,
    busy: Arc<AtomicBool>,
}

impl SilentCaptureDevice {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            deny: false,
            bytes_per_sec: DEFAULT_BYTES_PER_SEC,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Refuse permission, as when the operator declines access.
    pub fn denying(mut self) -> Self {
        self.deny = true;
        self
    }

    pub fn with_rate(mut self, bytes_per_sec: u64) -> Self {
        self.bytes_per_sec = bytes_per_sec;
        self
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureDevice for SilentCaptureDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_mime_type(&self, mime_type: &str) -> bool {
        mime_type == DEFAULT_MIME_TYPE
    }

    async fn request_permission(&self) -> Result<(), DeviceError> {
        if self.deny {
            return Err(DeviceError::PermissionDenied(format!(
                "{} access refused",
                self.name
            )));
        }
        Ok(())
    }

    async fn start(
        &self,
        request: &CaptureRequest,
    ) -> Result<Box<dyn ActiveCapture>, DeviceError> {
        self.request_permission().await?;
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(DeviceError::Busy);
        }
        tracing::debug!("{} capture started", self.name);

        let now = Instant::now();
        Ok(Box::new(SilentCapture {
            mime_type: request
                .mime_type
                .clone()
                .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
            timeslice: request.timeslice,
            bytes_per_sec: self.bytes_per_sec,
            state: CaptureState::Recording,
            resumed_at: now,
            banked: Duration::ZERO,
            last_slice: now,
            busy: Arc::clone(&self.busy),
        }))
    }
}

/// An open capture on a [`SilentCaptureDevice`].
#[derive(Debug)]
pub struct SilentCapture {
    mime_type: String,
    timeslice: Option<Duration>,
    bytes_per_sec: u64,
    state: CaptureState,
    resumed_at: Instant,
    /// Recorded time not yet turned into a chunk.
    banked: Duration,
    last_slice: Instant,
    busy: Arc<AtomicBool>,
}

impl SilentCapture {
    fn bank_running_time(&mut self) {
        if self.state == CaptureState::Recording {
            let now = Instant::now();
            self.banked += now - self.resumed_at;
            self.resumed_at = now;
        }
    }

    fn drain(&mut self) -> Option<AudioChunk> {
        self.bank_running_time();
        let len = (self.banked.as_millis() as u64 * self.bytes_per_sec / 1000) as usize;
        self.banked = Duration::ZERO;
        (len > 0).then(|| AudioChunk::new(vec![0u8; len], self.mime_type.clone()))
    }
}

impl Drop for SilentCapture {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl ActiveCapture for SilentCapture {
    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn state(&self) -> CaptureState {
        self.state
    }

    fn pause(&mut self) {
        self.bank_running_time();
        self.state = CaptureState::Paused;
    }

    fn resume(&mut self) {
        if self.state == CaptureState::Paused {
            self.resumed_at = Instant::now();
            self.state = CaptureState::Recording;
        }
    }

    fn take_chunks(&mut self) -> Vec<AudioChunk> {
        let Some(slice) = self.timeslice else {
            return Vec::new();
        };
        if self.last_slice.elapsed() < slice {
            return Vec::new();
        }
        self.last_slice = Instant::now();
        self.drain().into_iter().collect()
    }

    async fn stop(mut self: Box<Self>) -> Result<Vec<AudioChunk>, DeviceError> {
        let last = self.drain();
        self.busy.store(false, Ordering::SeqCst);
        Ok(last.into_iter().collect())
    }
}
