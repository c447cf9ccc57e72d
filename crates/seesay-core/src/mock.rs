//! Test doubles for the collaborator traits.
//!
//! Used by this crate's tests and by downstream crates that want to drive a
//! session without real assets or a microphone.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::answer::MaskBitmap;
use crate::audio::AudioChunk;
use crate::error::DeviceError;
use crate::report::SessionSubmission;
use crate::traits::{
    ActiveCapture, CaptureDevice, CaptureRequest, CaptureState, ImageFetcher, MaskSource,
    SubmissionSink,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

/// Records every fetch; optionally slow or failing.
#[derive(Debug, Default)]
pub struct MockImageFetcher {
    fetched: Mutex<Vec<String>>,
    failing: HashSet<String>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockImageFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each fetch takes `delay` (on the tokio clock).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fetching `url` fails.
    pub fn failing_on(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    /// URLs in the order they were requested.
    pub fn fetched(&self) -> Vec<String> {
        lock(&self.fetched).clone()
    }

    pub fn fetch_count(&self, url: &str) -> usize {
        lock(&self.fetched).iter().filter(|u| *u == url).count()
    }

    /// Highest number of fetches observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageFetcher for MockImageFetcher {
    async fn fetch(&self, url: &str) -> anyhow::Result<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        lock(&self.fetched).push(url.to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(url) {
            anyhow::bail!("mock fetch failure for {url}");
        }
        Ok(())
    }
}

/// Serves masks from a map keyed by URL.
#[derive(Debug, Default)]
pub struct MockMaskSource {
    masks: HashMap<String, MaskBitmap>,
    requests: Mutex<Vec<String>>,
}

impl MockMaskSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mask(mut self, url: &str, mask: MaskBitmap) -> Self {
        self.masks.insert(url.to_string(), mask);
        self
    }

    pub fn requests(&self) -> Vec<String> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl MaskSource for MockMaskSource {
    async fn load_mask(&self, url: &str) -> anyhow::Result<MaskBitmap> {
        lock(&self.requests).push(url.to_string());
        self.masks
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no mock mask at {url}"))
    }
}

// ---------------------------------------------------------------------------
// Capture device
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct DeviceCounters {
    active: AtomicUsize,
    max_active: AtomicUsize,
    starts: AtomicUsize,
    permission_requests: AtomicUsize,
}

/// An exclusive fake microphone: a second `start` while a capture is still
/// held fails with [`DeviceError::Busy`].
#[derive(Debug)]
pub struct MockCaptureDevice {
    deny: bool,
    supported: Vec<String>,
    release_delay: Duration,
    counters: Arc<DeviceCounters>,
}

impl Default for MockCaptureDevice {
    fn default() -> Self {
        Self {
            deny: false,
            supported: vec!["audio/webm".to_string()],
            release_delay: Duration::ZERO,
            counters: Arc::default(),
        }
    }
}

impl MockCaptureDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Permission requests and starts are refused.
    pub fn denying() -> Self {
        Self {
            deny: true,
            ..Self::default()
        }
    }

    /// Stopping a capture takes `delay` before the device is free again.
    pub fn with_release_delay(mut self, delay: Duration) -> Self {
        self.release_delay = delay;
        self
    }

    pub fn with_supported(mut self, mime_types: &[&str]) -> Self {
        self.supported = mime_types.iter().map(|m| m.to_string()).collect();
        self
    }

    /// Captures currently holding the device.
    pub fn active(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.counters.max_active.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.counters.starts.load(Ordering::SeqCst)
    }

    pub fn permission_requests(&self) -> usize {
        self.counters.permission_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureDevice for MockCaptureDevice {
    fn name(&self) -> &str {
        "mock"
    }

    fn supports_mime_type(&self, mime_type: &str) -> bool {
        self.supported.iter().any(|m| m == mime_type)
    }

    async fn request_permission(&self) -> Result<(), DeviceError> {
        self.counters
            .permission_requests
            .fetch_add(1, Ordering::SeqCst);
        if self.deny {
            return Err(DeviceError::PermissionDenied("denied by mock".into()));
        }
        Ok(())
    }

    async fn start(
        &self,
        request: &CaptureRequest,
    ) -> Result<Box<dyn ActiveCapture>, DeviceError> {
        if self.deny {
            return Err(DeviceError::PermissionDenied("denied by mock".into()));
        }
        if self
            .counters
            .active
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(DeviceError::Busy);
        }
        self.counters.max_active.fetch_max(1, Ordering::SeqCst);
        self.counters.starts.fetch_add(1, Ordering::SeqCst);

        let mime_type = request
            .mime_type
            .clone()
            .unwrap_or_else(|| "audio/webm".to_string());
        Ok(Box::new(MockCapture {
            mime_type,
            sliced: request.timeslice.is_some(),
            state: CaptureState::Recording,
            sequence: 0,
            release_delay: self.release_delay,
            counters: Arc::clone(&self.counters),
            released: AtomicBool::new(false),
        }))
    }
}

/// Capture produced by [`MockCaptureDevice`]. Each `take_chunks` call on a
/// sliced capture yields one one-byte chunk; `stop` always yields a final one.
#[derive(Debug)]
pub struct MockCapture {
    mime_type: String,
    sliced: bool,
    state: CaptureState,
    sequence: u8,
    release_delay: Duration,
    counters: Arc<DeviceCounters>,
    released: AtomicBool,
}

impl MockCapture {
    fn next_chunk(&mut self) -> AudioChunk {
        self.sequence = self.sequence.wrapping_add(1);
        AudioChunk::new(vec![self.sequence], self.mime_type.clone())
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.counters.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MockCapture {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl ActiveCapture for MockCapture {
    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn state(&self) -> CaptureState {
        self.state
    }

    fn pause(&mut self) {
        self.state = CaptureState::Paused;
    }

    fn resume(&mut self) {
        self.state = CaptureState::Recording;
    }

    fn take_chunks(&mut self) -> Vec<AudioChunk> {
        if self.sliced && self.state == CaptureState::Recording {
            vec![self.next_chunk()]
        } else {
            Vec::new()
        }
    }

    async fn stop(mut self: Box<Self>) -> Result<Vec<AudioChunk>, DeviceError> {
        let last = self.next_chunk();
        if !self.release_delay.is_zero() {
            tokio::time::sleep(self.release_delay).await;
        }
        self.release();
        Ok(vec![last])
    }
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// Keeps every submission in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    submissions: Mutex<Vec<SessionSubmission>>,
    fail: bool,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every submit call fails (after recording the submission).
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn submissions(&self) -> Vec<SessionSubmission> {
        lock(&self.submissions).clone()
    }
}

#[async_trait]
impl SubmissionSink for CollectingSink {
    async fn submit(&self, submission: &SessionSubmission) -> anyhow::Result<()> {
        lock(&self.submissions).push(submission.clone());
        if self.fail {
            anyhow::bail!("mock sink failure");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn device_is_exclusive_until_stopped() {
        let device = MockCaptureDevice::new();
        let first = device.start(&CaptureRequest::default()).await.unwrap();
        assert!(matches!(
            device.start(&CaptureRequest::default()).await,
            Err(DeviceError::Busy)
        ));

        let chunks = first.stop().await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(device.active(), 0);
        assert!(device.start(&CaptureRequest::default()).await.is_ok());
    }

    #[tokio::test]
    async fn dropping_a_capture_releases_the_device() {
        let device = MockCaptureDevice::new();
        drop(device.start(&CaptureRequest::default()).await.unwrap());
        assert_eq!(device.active(), 0);
    }

    #[tokio::test]
    async fn sliced_capture_yields_chunks_while_recording() {
        let device = MockCaptureDevice::new();
        let request = CaptureRequest {
            mime_type: Some("audio/webm".into()),
            timeslice: Some(Duration::from_secs(10)),
        };
        let mut capture = device.start(&request).await.unwrap();
        assert_eq!(capture.take_chunks().len(), 1);
        capture.pause();
        assert!(capture.take_chunks().is_empty());
    }

    #[tokio::test]
    async fn denying_device() {
        let device = MockCaptureDevice::denying();
        assert!(device.request_permission().await.is_err());
        assert_eq!(device.permission_requests(), 1);
    }
}
