//! Writes completed sessions to disk.

use std::path::PathBuf;

use async_trait::async_trait;

use seesay_core::report::SessionSubmission;
use seesay_core::traits::SubmissionSink;

/// Saves each submission as a JSON file under `dir`.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl SubmissionSink for JsonFileSink {
    async fn submit(&self, submission: &SessionSubmission) -> anyhow::Result<()> {
        let path = self.dir.join(submission.file_name());
        submission.save_json(&path)?;
        tracing::info!("session report saved to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn writes_report_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileSink::new(dir.path().join("results"));
        let submission = SessionSubmission {
            user_id: "123456789".into(),
            age_years: 4,
            age_months: 2,
            correct: 3,
            partial: 1,
            wrong: 0,
            audio_artifact: None,
            evaluation_text: "done".into(),
            completed_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap(),
        };

        sink.submit(&submission).await.unwrap();

        let path = dir
            .path()
            .join("results")
            .join("session-123456789-20260301T093000.json");
        let loaded = SessionSubmission::load_json(&path).unwrap();
        assert_eq!(loaded, submission);
    }
}
