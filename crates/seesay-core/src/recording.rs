//! Per-question recording lifecycle.
//!
//! Expression questions get a countdown, then capture starts on its own and
//! stops by itself at the cap. The operator may pause, stop early or redo.
//! Redo waits for the previous capture to release the device before the
//! countdown starts again, so two captures never hold the device at once.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::audio::{select_mime_type, AudioArtifact, AudioChunk, FALLBACK_MIME_TYPE};
use crate::model::QueryType;
use crate::persistence::{Persistence, StorageKey};
use crate::traits::{ActiveCapture, CaptureDevice, CaptureRequest};

/// Timers of the per-question recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Delay before capture starts.
    pub countdown: Duration,
    /// Hard limit on one capture.
    pub cap: Duration,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            countdown: Duration::from_secs(3),
            cap: Duration::from_secs(60),
        }
    }
}

/// Buffered audio of the current question.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordingState {
    pub chunks: Vec<AudioChunk>,
    pub artifact: Option<AudioArtifact>,
    pub paused: bool,
    pub stopped: bool,
}

impl RecordingState {
    pub fn playback_url(&self) -> Option<&str> {
        self.artifact.as_ref().map(|a| a.playback_url.as_str())
    }
}

/// Observable lifecycle stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingStatus {
    /// Nothing to record (comprehension question, or not started).
    Idle,
    /// Waiting to start; remaining whole seconds.
    Countdown(u64),
    Recording,
    Paused,
    Stopped,
    /// Microphone skipped for the session.
    Disabled,
}

impl fmt::Display for RecordingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingStatus::Idle => write!(f, "idle"),
            RecordingStatus::Countdown(n) => write!(f, "recording starts in {n}..."),
            RecordingStatus::Recording => write!(f, "recording"),
            RecordingStatus::Paused => write!(f, "paused"),
            RecordingStatus::Stopped => write!(f, "stopped"),
            RecordingStatus::Disabled => write!(f, "disabled"),
        }
    }
}

enum Phase {
    Idle,
    Countdown {
        deadline: Instant,
    },
    Recording {
        capture: Box<dyn ActiveCapture>,
        cap_deadline: Instant,
    },
    Stopped,
    Disabled,
}

/// One instance per session, reused across questions.
pub struct RecordingController {
    device: Arc<dyn CaptureDevice>,
    persistence: Persistence,
    config: RecordingConfig,
    mime_type: Option<&'static str>,
    phase: Phase,
    state: RecordingState,
}

impl fmt::Debug for RecordingController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingController")
            .field("device", &self.device.name())
            .field("status", &self.status())
            .field("state", &self.state)
            .finish()
    }
}

impl RecordingController {
    pub fn new(
        device: Arc<dyn CaptureDevice>,
        persistence: Persistence,
        config: RecordingConfig,
    ) -> Self {
        let mime_type = select_mime_type(|m| device.supports_mime_type(m));
        Self {
            device,
            persistence,
            config,
            mime_type,
            phase: Phase::Idle,
            state: RecordingState::default(),
        }
    }

    /// Reload the buffered audio of the current question after a restart.
    /// Returns `false` when nothing usable was stored; the caller should load
    /// the question afresh so the countdown runs again.
    pub fn restore(&mut self) -> bool {
        let encoded: Vec<String> = self.persistence.load_or_default(StorageKey::AudioChunks);
        let mime = self.mime_type.unwrap_or(FALLBACK_MIME_TYPE);
        let chunks: Vec<AudioChunk> = encoded
            .iter()
            .filter_map(|c| match AudioChunk::from_base64(c, mime) {
                Ok(chunk) => Some(chunk),
                Err(e) => {
                    tracing::warn!("dropping persisted audio chunk: {e:#}");
                    None
                }
            })
            .collect();

        if chunks.is_empty() {
            tracing::info!("no usable audio stored for the current question");
            return false;
        }
        let mut artifact = AudioArtifact::assemble(&chunks, self.mime_type);
        if let Some(url) = self.persistence.load::<String>(StorageKey::AudioUrl) {
            artifact.playback_url = url;
        }
        self.state.artifact = Some(artifact);
        self.state.chunks = chunks;
        self.state.stopped = true;
        self.state.paused = false;
        if !matches!(self.phase, Phase::Disabled) {
            self.phase = Phase::Stopped;
        }
        tracing::info!("restored {} audio chunks", self.state.chunks.len());
        true
    }

    /// Turn recording off for the rest of the session.
    pub fn disable(&mut self) {
        if matches!(self.phase, Phase::Recording { .. }) {
            tracing::warn!("disabling recorder with a capture in progress");
        }
        self.phase = Phase::Disabled;
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self.phase, Phase::Disabled)
    }

    pub fn config(&self) -> RecordingConfig {
        self.config
    }

    pub fn state(&self) -> &RecordingState {
        &self.state
    }

    pub fn artifact(&self) -> Option<&AudioArtifact> {
        self.state.artifact.as_ref()
    }

    pub fn is_stopped(&self) -> bool {
        self.state.stopped
    }

    pub fn status(&self) -> RecordingStatus {
        match &self.phase {
            Phase::Idle => RecordingStatus::Idle,
            Phase::Countdown { .. } => {
                RecordingStatus::Countdown(self.countdown_remaining().unwrap_or(0))
            }
            Phase::Recording { .. } if self.state.paused => RecordingStatus::Paused,
            Phase::Recording { .. } => RecordingStatus::Recording,
            Phase::Stopped => RecordingStatus::Stopped,
            Phase::Disabled => RecordingStatus::Disabled,
        }
    }

    /// Whole seconds left on the countdown, rounded up.
    pub fn countdown_remaining(&self) -> Option<u64> {
        match &self.phase {
            Phase::Countdown { deadline } => {
                let left = deadline.saturating_duration_since(Instant::now());
                Some(left.as_millis().div_ceil(1000) as u64)
            }
            _ => None,
        }
    }

    /// Reset for a new question and start the countdown for expression
    /// questions. Any capture still running is stopped and discarded.
    pub async fn load_question(&mut self, query_type: QueryType) {
        self.release().await;
        self.clear();

        if self.is_disabled() {
            return;
        }
        self.phase = match query_type {
            QueryType::Expression => self.countdown(),
            QueryType::Comprehension => Phase::Idle,
        };
    }

    fn countdown(&self) -> Phase {
        Phase::Countdown {
            deadline: Instant::now() + self.config.countdown,
        }
    }

    fn clear(&mut self) {
        self.state = RecordingState::default();
        self.persistence.remove(StorageKey::AudioChunks);
        self.persistence.remove(StorageKey::AudioUrl);
        self.persistence.save(StorageKey::RecPaused, &false);
    }

    /// Advance timers: start capture when the countdown ends, stop it at the
    /// cap, and collect any chunks delivered meanwhile.
    pub async fn poll(&mut self) {
        let now = Instant::now();
        if matches!(&self.phase, Phase::Countdown { deadline } if now >= *deadline) {
            self.start_capture().await;
            return;
        }

        let mut cap_reached = false;
        if let Phase::Recording {
            capture,
            cap_deadline,
        } = &mut self.phase
        {
            cap_reached = now >= *cap_deadline;
            self.state.chunks.extend(capture.take_chunks());
        }
        if cap_reached {
            tracing::info!("capture reached the {:?} cap", self.config.cap);
            self.stop().await;
        }
    }

    async fn start_capture(&mut self) {
        let request = CaptureRequest {
            mime_type: self.mime_type.map(str::to_string),
            timeslice: None,
        };
        match self.device.start(&request).await {
            Ok(capture) => {
                tracing::debug!("capture started on {}", self.device.name());
                self.phase = Phase::Recording {
                    capture,
                    cap_deadline: Instant::now() + self.config.cap,
                };
                self.state.stopped = false;
            }
            Err(e) => {
                tracing::warn!("could not start capture: {e}");
                // leave the question gradeable without audio
                self.phase = Phase::Stopped;
                self.state.stopped = true;
            }
        }
    }

    /// Pause or resume the running capture. Returns the new paused flag.
    pub fn toggle_pause(&mut self) -> bool {
        if let Phase::Recording { capture, .. } = &mut self.phase {
            if self.state.paused {
                capture.resume();
            } else {
                capture.pause();
            }
            self.state.paused = !self.state.paused;
            self.persistence.save(StorageKey::RecPaused, &self.state.paused);
        }
        self.state.paused
    }

    /// End the running capture and assemble its artifact. Returns `false` if
    /// nothing was recording.
    pub async fn stop(&mut self) -> bool {
        if !matches!(self.phase, Phase::Recording { .. }) {
            return false;
        }
        let Phase::Recording { capture, .. } = std::mem::replace(&mut self.phase, Phase::Stopped)
        else {
            return false;
        };
        let mime = capture.mime_type().to_string();
        match capture.stop().await {
            Ok(chunks) => self.state.chunks.extend(chunks),
            Err(e) => tracing::warn!("capture did not stop cleanly: {e}"),
        }

        let artifact = AudioArtifact::assemble(&self.state.chunks, Some(&mime));
        tracing::info!(
            "recorded {} bytes of {}",
            artifact.len(),
            artifact.mime_type
        );
        let encoded: Vec<String> = self.state.chunks.iter().map(AudioChunk::to_base64).collect();
        self.persistence.save(StorageKey::AudioChunks, &encoded);
        self.persistence
            .save(StorageKey::AudioUrl, &artifact.playback_url);
        self.persistence.save(StorageKey::RecPaused, &false);

        self.state.artifact = Some(artifact);
        self.state.paused = false;
        self.state.stopped = true;
        true
    }

    /// Discard the audio and start over with a fresh countdown once the
    /// device has been released.
    pub async fn redo(&mut self) {
        if self.is_disabled() {
            return;
        }
        self.release().await;
        self.clear();
        self.phase = self.countdown();
        tracing::debug!("recording redo");
    }

    async fn release(&mut self) {
        if !matches!(self.phase, Phase::Recording { .. }) {
            return;
        }
        if let Phase::Recording { capture, .. } = std::mem::replace(&mut self.phase, Phase::Idle) {
            if let Err(e) = capture.stop().await {
                tracing::warn!("capture did not stop cleanly: {e}");
            }
        }
    }

    /// Stop any capture without keeping its audio.
    pub async fn shutdown(&mut self) {
        self.release().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCaptureDevice;

    fn controller(device: Arc<MockCaptureDevice>) -> (RecordingController, Persistence) {
        let persistence = Persistence::in_memory();
        let controller =
            RecordingController::new(device, persistence.clone(), RecordingConfig::default());
        (controller, persistence)
    }

    async fn advance(controller: &mut RecordingController, by: Duration) {
        tokio::time::advance(by).await;
        controller.poll().await;
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_then_capture() {
        let device = Arc::new(MockCaptureDevice::new());
        let (mut rec, _) = controller(device.clone());
        rec.load_question(QueryType::Expression).await;
        assert_eq!(rec.status(), RecordingStatus::Countdown(3));

        advance(&mut rec, Duration::from_millis(1500)).await;
        assert_eq!(rec.countdown_remaining(), Some(2));
        assert_eq!(device.starts(), 0);

        advance(&mut rec, Duration::from_millis(1500)).await;
        assert_eq!(rec.status(), RecordingStatus::Recording);
        assert_eq!(device.active(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn comprehension_never_records() {
        let device = Arc::new(MockCaptureDevice::new());
        let (mut rec, _) = controller(device.clone());
        rec.load_question(QueryType::Comprehension).await;
        advance(&mut rec, Duration::from_secs(10)).await;
        assert_eq!(rec.status(), RecordingStatus::Idle);
        assert_eq!(device.starts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn capture_stops_at_cap() {
        let device = Arc::new(MockCaptureDevice::new());
        let (mut rec, persistence) = controller(device.clone());
        rec.load_question(QueryType::Expression).await;
        advance(&mut rec, Duration::from_secs(3)).await;

        advance(&mut rec, Duration::from_secs(59)).await;
        assert!(!rec.is_stopped());
        advance(&mut rec, Duration::from_secs(1)).await;
        assert!(rec.is_stopped());
        assert_eq!(device.active(), 0);

        let artifact = rec.artifact().unwrap();
        assert_eq!(artifact.mime_type, "audio/webm");
        assert_eq!(
            persistence.load::<String>(StorageKey::AudioUrl).as_deref(),
            Some(artifact.playback_url.as_str())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pause_and_manual_stop() {
        let device = Arc::new(MockCaptureDevice::new());
        let (mut rec, persistence) = controller(device);
        rec.load_question(QueryType::Expression).await;
        advance(&mut rec, Duration::from_secs(3)).await;

        assert!(rec.toggle_pause());
        assert_eq!(rec.status(), RecordingStatus::Paused);
        assert!(persistence.load_or_default::<bool>(StorageKey::RecPaused));
        assert!(!rec.toggle_pause());

        assert!(rec.stop().await);
        assert!(!rec.stop().await);
        assert_eq!(rec.status(), RecordingStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn redo_waits_for_release() {
        let device = Arc::new(MockCaptureDevice::new().with_release_delay(Duration::from_millis(500)));
        let (mut rec, _) = controller(device.clone());
        rec.load_question(QueryType::Expression).await;
        advance(&mut rec, Duration::from_secs(3)).await;
        assert_eq!(device.active(), 1);

        rec.redo().await;
        assert_eq!(device.active(), 0);
        assert!(rec.artifact().is_none());
        assert_eq!(rec.status(), RecordingStatus::Countdown(3));

        advance(&mut rec, Duration::from_secs(3)).await;
        assert_eq!(rec.status(), RecordingStatus::Recording);
        assert_eq!(device.starts(), 2);
        assert_eq!(device.max_active(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_recorder_ignores_expression_questions() {
        let device = Arc::new(MockCaptureDevice::new());
        let (mut rec, _) = controller(device.clone());
        rec.disable();
        rec.load_question(QueryType::Expression).await;
        advance(&mut rec, Duration::from_secs(5)).await;
        rec.redo().await;
        assert_eq!(rec.status(), RecordingStatus::Disabled);
        assert_eq!(device.starts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_device_leaves_question_gradeable() {
        let device = Arc::new(MockCaptureDevice::new());
        let _holder = device.start(&CaptureRequest::default()).await.unwrap();
        let (mut rec, _) = controller(device);
        rec.load_question(QueryType::Expression).await;
        advance(&mut rec, Duration::from_secs(3)).await;
        assert!(rec.is_stopped());
        assert!(rec.artifact().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn restore_rebuilds_artifact() {
        let device = Arc::new(MockCaptureDevice::new());
        let (mut rec, persistence) = controller(device.clone());
        rec.load_question(QueryType::Expression).await;
        advance(&mut rec, Duration::from_secs(3)).await;
        rec.stop().await;
        let url = rec.artifact().unwrap().playback_url.clone();
        let data = rec.artifact().unwrap().data.clone();

        let mut reloaded =
            RecordingController::new(device, persistence, RecordingConfig::default());
        assert!(reloaded.restore());
        assert!(reloaded.is_stopped());
        assert_eq!(reloaded.artifact().unwrap().playback_url, url);
        assert_eq!(reloaded.artifact().unwrap().data, data);
    }

    #[tokio::test(start_paused = true)]
    async fn restore_without_usable_audio_reports_nothing() {
        let device = Arc::new(MockCaptureDevice::new());
        for stored in [serde_json::json!([]), serde_json::json!(["%%%"]), serde_json::json!(7)] {
            let (mut rec, persistence) = controller(device.clone());
            persistence.save(StorageKey::AudioChunks, &stored);
            assert!(!rec.restore(), "stored {stored}");
            assert!(!rec.is_stopped());
            assert!(rec.artifact().is_none());

            rec.load_question(QueryType::Expression).await;
            assert_eq!(rec.status(), RecordingStatus::Countdown(3));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn next_question_discards_audio() {
        let device = Arc::new(MockCaptureDevice::new());
        let (mut rec, persistence) = controller(device.clone());
        rec.load_question(QueryType::Expression).await;
        advance(&mut rec, Duration::from_secs(3)).await;

        rec.load_question(QueryType::Comprehension).await;
        assert_eq!(device.active(), 0);
        assert!(!persistence.contains(StorageKey::AudioChunks));
        assert_eq!(rec.state(), &RecordingState::default());
    }
}
