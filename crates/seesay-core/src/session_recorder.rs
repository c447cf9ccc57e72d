//! Whole-session audio capture.
//!
//! Runs alongside the question loop, independent of question transitions.
//! Audio arrives in fixed slices; each slice is written through as it arrives
//! so a crash keeps what was captured, and a restarted process picks the
//! recording up where the persisted state left it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::audio::{select_mime_type, AudioArtifact, AudioChunk, FinalRecording, FALLBACK_MIME_TYPE};
use crate::persistence::{Persistence, StorageKey};
use crate::traits::{ActiveCapture, CaptureDevice, CaptureRequest};

/// Default slice length.
pub const DEFAULT_TIMESLICE: Duration = Duration::from_secs(10);

pub struct ContinuousSessionRecorder {
    device: Arc<dyn CaptureDevice>,
    persistence: Persistence,
    timeslice: Duration,
    mime_type: Option<&'static str>,
    capture: Option<Box<dyn ActiveCapture>>,
    next_slice: Option<Instant>,
    chunks: Vec<AudioChunk>,
    final_artifact: Option<AudioArtifact>,
}

impl fmt::Debug for ContinuousSessionRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContinuousSessionRecorder")
            .field("device", &self.device.name())
            .field("recording", &self.capture.is_some())
            .field("chunks", &self.chunks.len())
            .finish()
    }
}

impl ContinuousSessionRecorder {
    pub fn new(device: Arc<dyn CaptureDevice>, persistence: Persistence, timeslice: Duration) -> Self {
        let mime_type = select_mime_type(|m| device.supports_mime_type(m));
        Self {
            device,
            persistence,
            timeslice,
            mime_type,
            capture: None,
            next_slice: None,
            chunks: Vec::new(),
            final_artifact: None,
        }
    }

    fn chunk_mime(&self) -> &'static str {
        self.mime_type.unwrap_or(FALLBACK_MIME_TYPE)
    }

    /// Start capturing. Returns `false` if already recording or the device
    /// refused.
    pub async fn start(&mut self) -> bool {
        if self.capture.is_some() {
            return false;
        }
        let request = CaptureRequest {
            mime_type: self.mime_type.map(str::to_string),
            timeslice: Some(self.timeslice),
        };
        match self.device.start(&request).await {
            Ok(capture) => {
                self.capture = Some(capture);
                self.next_slice = Some(Instant::now() + self.timeslice);
                self.final_artifact = None;
                self.persistence.save(StorageKey::SessionRecordingActive, &true);
                tracing::info!("started continuous session recording");
                true
            }
            Err(e) => {
                tracing::error!("failed to start session recording: {e}");
                false
            }
        }
    }

    /// Continue a recording that was active before a restart, keeping the
    /// slices persisted so far.
    pub async fn resume(&mut self) -> bool {
        if self.capture.is_some()
            || !self
                .persistence
                .load_or_default::<bool>(StorageKey::SessionRecordingActive)
        {
            return false;
        }
        let encoded: Vec<String> = self
            .persistence
            .load_or_default(StorageKey::SessionRecordingChunks);
        let mime = self.chunk_mime();
        self.chunks = encoded
            .iter()
            .filter_map(|c| AudioChunk::from_base64(c, mime).ok())
            .collect();
        if self.chunks.len() != encoded.len() {
            tracing::warn!(
                "dropped {} unreadable session recording slices",
                encoded.len() - self.chunks.len()
            );
        }
        tracing::info!("resuming session recording with {} slices", self.chunks.len());
        let started = self.start().await;
        if !started && !self.chunks.is_empty() {
            tracing::warn!("recovered slices kept until the session recording is stopped");
        }
        started
    }

    /// Collect slices that are due and write them through.
    pub fn collect(&mut self) {
        let (Some(capture), Some(due)) = (self.capture.as_mut(), self.next_slice) else {
            return;
        };
        let now = Instant::now();
        if now < due {
            return;
        }
        let fresh = capture.take_chunks();
        self.next_slice = Some(now + self.timeslice);
        if fresh.is_empty() {
            return;
        }
        self.chunks.extend(fresh);
        self.persist_chunks();
    }

    fn persist_chunks(&self) {
        let encoded: Vec<String> = self.chunks.iter().map(AudioChunk::to_base64).collect();
        self.persistence
            .save(StorageKey::SessionRecordingChunks, &encoded);
    }

    /// Stop capturing and store the final artifact. Slices recovered after a
    /// restart are finished even when no capture is running. Returns `false`
    /// if there was nothing to finish.
    pub async fn stop(&mut self) -> bool {
        self.next_slice = None;
        match self.capture.take() {
            Some(capture) => match capture.stop().await {
                Ok(rest) => self.chunks.extend(rest),
                Err(e) => tracing::warn!("session capture did not stop cleanly: {e}"),
            },
            None if self.chunks.is_empty() => {
                if self.persistence.contains(StorageKey::SessionRecordingActive) {
                    tracing::warn!("clearing stale session recording flag with no audio");
                    self.persistence.remove(StorageKey::SessionRecordingActive);
                    self.persistence.remove(StorageKey::SessionRecordingChunks);
                }
                return false;
            }
            None => tracing::warn!(
                "finishing session recording from {} recovered slices without a live capture",
                self.chunks.len()
            ),
        }
        let recorder_mime = self.mime_type.map(str::to_string);

        let artifact = AudioArtifact::assemble(&self.chunks, recorder_mime.as_deref());
        self.persistence.save(
            StorageKey::SessionRecordingFinal,
            &FinalRecording::from_artifact(&artifact),
        );
        self.persistence
            .save(StorageKey::SessionRecordingUrl, &artifact.playback_url);
        self.persistence.remove(StorageKey::SessionRecordingActive);
        self.persistence.remove(StorageKey::SessionRecordingChunks);
        tracing::info!(
            "session recording completed: {} slices, {} bytes",
            self.chunks.len(),
            artifact.len()
        );

        self.chunks.clear();
        self.final_artifact = Some(artifact);
        true
    }

    /// Recording now, or recording before the last restart.
    pub fn is_active(&self) -> bool {
        self.capture.is_some()
            || self
                .persistence
                .load_or_default::<bool>(StorageKey::SessionRecordingActive)
    }

    /// Slices captured so far in this run.
    pub fn slice_count(&self) -> usize {
        self.chunks.len()
    }

    /// The stored playback URL, or a fresh one rebuilt from the stored audio.
    pub fn final_recording_url(&self) -> Option<String> {
        if let Some(artifact) = &self.final_artifact {
            return Some(artifact.playback_url.clone());
        }
        if let Some(url) = self.persistence.load::<String>(StorageKey::SessionRecordingUrl) {
            return Some(url);
        }
        self.final_artifact().map(|a| a.playback_url)
    }

    /// The durable form of the final recording.
    pub fn final_recording_data(&self) -> Option<FinalRecording> {
        self.persistence.load(StorageKey::SessionRecordingFinal)
    }

    /// The final recording, from memory or rebuilt from storage.
    pub fn final_artifact(&self) -> Option<AudioArtifact> {
        if let Some(artifact) = &self.final_artifact {
            return Some(artifact.clone());
        }
        let data = self.final_recording_data()?;
        match data.to_artifact() {
            Ok(artifact) => Some(artifact),
            Err(e) => {
                tracing::error!("failed to reconstruct session recording: {e:#}");
                None
            }
        }
    }

    /// Stop and forget everything, in memory and in storage.
    pub async fn cleanup(&mut self) {
        self.stop().await;
        for key in [
            StorageKey::SessionRecordingActive,
            StorageKey::SessionRecordingUrl,
            StorageKey::SessionRecordingFinal,
            StorageKey::SessionRecordingChunks,
        ] {
            self.persistence.remove(key);
        }
        self.chunks.clear();
        self.final_artifact = None;
        tracing::info!("cleaned up session recording");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCaptureDevice;

    fn recorder(device: Arc<MockCaptureDevice>, persistence: &Persistence) -> ContinuousSessionRecorder {
        ContinuousSessionRecorder::new(device, persistence.clone(), DEFAULT_TIMESLICE)
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent() {
        let device = Arc::new(MockCaptureDevice::new());
        let persistence = Persistence::in_memory();
        let mut rec = recorder(device.clone(), &persistence);

        assert!(rec.start().await);
        assert!(!rec.start().await);
        assert_eq!(device.starts(), 1);
        assert!(rec.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn slices_are_written_through() {
        let device = Arc::new(MockCaptureDevice::new());
        let persistence = Persistence::in_memory();
        let mut rec = recorder(device, &persistence);
        rec.start().await;

        rec.collect();
        assert_eq!(rec.slice_count(), 0);

        tokio::time::advance(Duration::from_secs(10)).await;
        rec.collect();
        tokio::time::advance(Duration::from_secs(10)).await;
        rec.collect();

        let stored: Vec<String> = persistence.load_or_default(StorageKey::SessionRecordingChunks);
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_persists_final_recording() {
        let device = Arc::new(MockCaptureDevice::new());
        let persistence = Persistence::in_memory();
        let mut rec = recorder(device.clone(), &persistence);
        rec.start().await;
        tokio::time::advance(Duration::from_secs(10)).await;
        rec.collect();

        assert!(rec.stop().await);
        assert!(!rec.stop().await);
        assert_eq!(device.active(), 0);
        assert!(!rec.is_active());
        assert!(!persistence.contains(StorageKey::SessionRecordingChunks));

        let data = rec.final_recording_data().unwrap();
        assert_eq!(data.mime_type, "audio/webm");
        assert_eq!(data.to_artifact().unwrap().data, vec![1, 2]);
        assert_eq!(
            rec.final_recording_url(),
            persistence.load::<String>(StorageKey::SessionRecordingUrl)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn is_active_survives_restart() {
        let persistence = Persistence::in_memory();
        let mut first = recorder(Arc::new(MockCaptureDevice::new()), &persistence);
        first.start().await;
        tokio::time::advance(Duration::from_secs(10)).await;
        first.collect();

        let device = Arc::new(MockCaptureDevice::new());
        let mut second = recorder(device.clone(), &persistence);
        assert!(second.is_active());
        assert!(second.resume().await);
        assert_eq!(second.slice_count(), 1);

        second.stop().await;
        let artifact = second.final_artifact().unwrap();
        // recovered slice followed by the new capture's final slice
        assert_eq!(artifact.data, vec![1, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_resume_still_finishes_recovered_slices() {
        let persistence = Persistence::in_memory();
        let mut first = recorder(Arc::new(MockCaptureDevice::new()), &persistence);
        first.start().await;
        tokio::time::advance(Duration::from_secs(10)).await;
        first.collect();

        let mut second = recorder(Arc::new(MockCaptureDevice::denying()), &persistence);
        assert!(!second.resume().await);
        assert!(second.is_active());
        assert_eq!(second.slice_count(), 1);

        assert!(second.stop().await);
        assert!(!second.is_active());
        assert!(!persistence.contains(StorageKey::SessionRecordingChunks));
        assert_eq!(second.final_artifact().unwrap().data, vec![1]);
        assert!(second.final_recording_data().is_some());
        assert!(!second.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_flag_without_audio_is_cleared_on_stop() {
        let persistence = Persistence::in_memory();
        persistence.save(StorageKey::SessionRecordingActive, &true);

        let mut rec = recorder(Arc::new(MockCaptureDevice::denying()), &persistence);
        assert!(!rec.resume().await);
        assert!(rec.is_active());
        assert!(!rec.stop().await);
        assert!(!rec.is_active());
        assert!(rec.final_artifact().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn url_rebuilt_from_stored_audio() {
        let persistence = Persistence::in_memory();
        let mut rec = recorder(Arc::new(MockCaptureDevice::new()), &persistence);
        rec.start().await;
        rec.stop().await;
        persistence.remove(StorageKey::SessionRecordingUrl);

        let reloaded = recorder(Arc::new(MockCaptureDevice::new()), &persistence);
        let url = reloaded.final_recording_url().unwrap();
        assert!(url.starts_with("blob:seesay/"));
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_clears_everything() {
        let device = Arc::new(MockCaptureDevice::new());
        let persistence = Persistence::in_memory();
        let mut rec = recorder(device.clone(), &persistence);
        rec.start().await;
        rec.cleanup().await;

        assert_eq!(device.active(), 0);
        assert!(!rec.is_active());
        assert!(rec.final_recording_url().is_none());
        assert!(rec.final_recording_data().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn denied_device_does_not_start() {
        let persistence = Persistence::in_memory();
        let mut rec = recorder(Arc::new(MockCaptureDevice::denying()), &persistence);
        assert!(!rec.start().await);
        assert!(!rec.is_active());
    }
}
