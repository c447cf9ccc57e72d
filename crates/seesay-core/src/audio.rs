//! Audio chunks, assembled artifacts and their durable encodings.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Container formats to try, most preferred first.
pub const PREFERRED_MIME_TYPES: [&str; 6] = [
    "audio/webm;codecs=opus",
    "audio/webm",
    "audio/mp4;codecs=mp4a.40.2",
    "audio/mp4",
    "audio/ogg;codecs=opus",
    "audio/ogg",
];

/// Used when neither the recorder nor the chunks name a type.
pub const FALLBACK_MIME_TYPE: &str = "audio/webm";

/// Pick the first preferred type the device accepts.
pub fn select_mime_type(supports: impl Fn(&str) -> bool) -> Option<&'static str> {
    PREFERRED_MIME_TYPES.into_iter().find(|m| supports(m))
}

/// A slice of encoded audio delivered by a recorder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl AudioChunk {
    pub fn new(data: impl Into<Vec<u8>>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Base64 form used in the key/value store.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.data)
    }

    pub fn from_base64(encoded: &str, mime_type: &str) -> Result<Self> {
        let data = STANDARD
            .decode(encoded)
            .context("audio chunk is not valid base64")?;
        Ok(Self::new(data, mime_type))
    }
}

/// A finished recording: the chunks joined into one blob plus a playback
/// reference the visual layer can hand to an audio element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioArtifact {
    pub mime_type: String,
    pub data: Vec<u8>,
    pub playback_url: String,
}

impl AudioArtifact {
    /// Join chunks. The type is the recorder's choice, else the first
    /// chunk's, else [`FALLBACK_MIME_TYPE`].
    pub fn assemble(chunks: &[AudioChunk], preferred_mime: Option<&str>) -> Self {
        let mime_type = preferred_mime
            .filter(|m| !m.is_empty())
            .or_else(|| {
                chunks
                    .first()
                    .map(|c| c.mime_type.as_str())
                    .filter(|m| !m.is_empty())
            })
            .unwrap_or(FALLBACK_MIME_TYPE)
            .to_string();
        let data = chunks.iter().flat_map(|c| c.data.iter().copied()).collect();
        Self {
            mime_type,
            data,
            playback_url: new_playback_url(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// `data:{mime};base64,{payload}`
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, STANDARD.encode(&self.data))
    }

    /// Rebuild an artifact from a data URL, with a fresh playback reference.
    pub fn from_data_url(url: &str) -> Result<Self> {
        let (header, payload) = url
            .strip_prefix("data:")
            .and_then(|rest| rest.split_once(','))
            .context("not a data URL")?;
        let mime_type = header
            .strip_suffix(";base64")
            .context("data URL is not base64 encoded")?;
        let data = STANDARD
            .decode(payload)
            .context("data URL payload is not valid base64")?;
        Ok(Self {
            mime_type: mime_type.to_string(),
            data,
            playback_url: new_playback_url(),
        })
    }
}

fn new_playback_url() -> String {
    format!("blob:seesay/{}", Uuid::new_v4())
}

/// The durable form of the whole-session recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalRecording {
    /// Data URL of the encoded audio.
    pub audio: String,
    pub mime_type: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl FinalRecording {
    pub fn from_artifact(artifact: &AudioArtifact) -> Self {
        Self {
            audio: artifact.to_data_url(),
            mime_type: artifact.mime_type.clone(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn to_artifact(&self) -> Result<AudioArtifact> {
        AudioArtifact::from_data_url(&self.audio)
    }
}
