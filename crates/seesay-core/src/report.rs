//! Grading tally, completion summary and the outbound submission.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The grader's manual tri-light choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GradeOutcome {
    /// Correct without help.
    Success,
    /// Correct with the operator's help.
    Partial,
    Failure,
}

impl fmt::Display for GradeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GradeOutcome::Success => write!(f, "success"),
            GradeOutcome::Partial => write!(f, "partial"),
            GradeOutcome::Failure => write!(f, "failure"),
        }
    }
}

impl FromStr for GradeOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "success" | "correct" | "green" => Ok(GradeOutcome::Success),
            "partial" | "help" | "yellow" => Ok(GradeOutcome::Partial),
            "failure" | "wrong" | "red" => Ok(GradeOutcome::Failure),
            other => Err(format!("unknown grade: {other}")),
        }
    }
}

/// Running score of the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub correct: u32,
    pub partial: u32,
    pub wrong: u32,
}

impl Tally {
    pub fn record(&mut self, outcome: GradeOutcome) {
        match outcome {
            GradeOutcome::Success => self.correct += 1,
            GradeOutcome::Partial => self.partial += 1,
            GradeOutcome::Failure => self.wrong += 1,
        }
    }

    /// Questions graded so far.
    pub fn total(&self) -> u32 {
        self.correct + self.partial + self.wrong
    }
}

/// Human-readable completion summary shown to the operator.
pub fn completion_text(tally: &Tally, question_count: usize) -> String {
    format!(
        "Your child got {} correct by themselves, {} correct with your help, and {} wrong.\n\
         Total questions answered: {} / {}",
        tally.correct,
        tally.partial,
        tally.wrong,
        tally.total(),
        question_count
    )
}

/// What a completed session hands to the submission sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSubmission {
    pub user_id: String,
    pub age_years: u32,
    pub age_months: u32,
    pub correct: u32,
    pub partial: u32,
    pub wrong: u32,
    /// Data URL of the whole-session recording, if any was captured.
    pub audio_artifact: Option<String>,
    pub evaluation_text: String,
    pub completed_at: DateTime<Utc>,
}

impl SessionSubmission {
    pub fn tally(&self) -> Tally {
        Tally {
            correct: self.correct,
            partial: self.partial,
            wrong: self.wrong,
        }
    }

    /// Save the submission as JSON to a file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json =
            serde_json::to_string_pretty(self).context("failed to serialize submission")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write submission to {}", path.display()))?;
        Ok(())
    }

    /// Load a submission from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read submission from {}", path.display()))?;
        serde_json::from_str(&content).context("failed to parse submission JSON")
    }

    /// File name used when writing into an output directory.
    pub fn file_name(&self) -> String {
        format!(
            "session-{}-{}.json",
            self.user_id,
            self.completed_at.format("%Y%m%dT%H%M%S")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission() -> SessionSubmission {
        SessionSubmission {
            user_id: "123456789".into(),
            age_years: 3,
            age_months: 4,
            correct: 5,
            partial: 2,
            wrong: 1,
            audio_artifact: Some("data:audio/webm;base64,AQID".into()),
            evaluation_text: completion_text(
                &Tally {
                    correct: 5,
                    partial: 2,
                    wrong: 1,
                },
                10,
            ),
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn tally_records_each_outcome() {
        let mut tally = Tally::default();
        for outcome in [
            GradeOutcome::Success,
            GradeOutcome::Partial,
            GradeOutcome::Failure,
            GradeOutcome::Success,
        ] {
            tally.record(outcome);
        }
        assert_eq!(
            tally,
            Tally {
                correct: 2,
                partial: 1,
                wrong: 1
            }
        );
        assert_eq!(tally.total(), 4);
    }

    #[test]
    fn summary_text() {
        let text = completion_text(
            &Tally {
                correct: 3,
                partial: 1,
                wrong: 2,
            },
            8,
        );
        assert_eq!(
            text,
            "Your child got 3 correct by themselves, 1 correct with your help, and 2 wrong.\n\
             Total questions answered: 6 / 8"
        );
    }

    #[test]
    fn grade_names() {
        assert_eq!("success".parse::<GradeOutcome>(), Ok(GradeOutcome::Success));
        assert_eq!("Partial".parse::<GradeOutcome>(), Ok(GradeOutcome::Partial));
        assert_eq!("red".parse::<GradeOutcome>(), Ok(GradeOutcome::Failure));
        assert!("maybe".parse::<GradeOutcome>().is_err());
    }

    #[test]
    fn submission_uses_camel_case_fields() {
        let json = serde_json::to_value(submission()).unwrap();
        assert_eq!(json["userId"], "123456789");
        assert_eq!(json["ageMonths"], 4);
        assert!(json["evaluationText"]
            .as_str()
            .unwrap()
            .contains("8 / 10"));
    }

    #[test]
    fn save_and_load_json() {
        let dir = tempfile::tempdir().unwrap();
        let original = submission();
        let path = dir.path().join("out").join(original.file_name());
        original.save_json(&path).unwrap();

        let loaded = SessionSubmission::load_json(&path).unwrap();
        assert_eq!(loaded, original);
        assert_eq!(loaded.tally().total(), 8);
    }
}
