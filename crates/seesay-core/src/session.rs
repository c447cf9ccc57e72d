//! The session state machine.
//!
//! `Gate → Consent → Loop → Completed`, with `Gate → Rejected` for a
//! well-formed but out-of-range age. The engine owns the session state,
//! drives the answer evaluator and recording controller for the current
//! question, and writes every field through to the persistence layer so a
//! restarted process resumes where it stopped.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::answer::{AnswerEvaluator, AnswerVariant, ClickOutcome, ClickPoint, ImageFeedback, OrderedRule};
use crate::catalog::Catalog;
use crate::error::SessionError;
use crate::model::{AssetLayout, QueryType, Question};
use crate::persistence::{Persistence, StorageKey};
use crate::preload::ImagePreloadQueue;
use crate::recording::{RecordingConfig, RecordingController, RecordingStatus};
use crate::report::{completion_text, GradeOutcome, SessionSubmission, Tally};
use crate::session_recorder::{ContinuousSessionRecorder, DEFAULT_TIMESLICE};
use crate::traits::{CaptureDevice, ImageFetcher, MaskSource, SubmissionSink};

/// Youngest accepted age, in months.
pub const MIN_AGE_MONTHS: u32 = 24;
/// First rejected age, in months.
pub const MAX_AGE_MONTHS: u32 = 72;
/// Length of a respondent id.
pub const ID_DIGITS: usize = 9;

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

/// Where the session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Age and id entry.
    Gate,
    /// Age out of range. Only a reset leaves this phase.
    Rejected,
    /// Microphone allow or skip.
    Consent,
    /// Asking question `index`.
    Loop { index: usize },
    Completed,
}

impl Phase {
    pub fn kind(&self) -> PhaseKind {
        match self {
            Phase::Gate => PhaseKind::Gate,
            Phase::Rejected => PhaseKind::Rejected,
            Phase::Consent => PhaseKind::Consent,
            Phase::Loop { .. } => PhaseKind::Loop,
            Phase::Completed => PhaseKind::Completed,
        }
    }
}

/// A phase without its data, for error messages and guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseKind {
    Gate,
    Rejected,
    Consent,
    Loop,
    Completed,
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseKind::Gate => write!(f, "gate"),
            PhaseKind::Rejected => write!(f, "rejected"),
            PhaseKind::Consent => write!(f, "consent"),
            PhaseKind::Loop => write!(f, "question loop"),
            PhaseKind::Completed => write!(f, "completed"),
        }
    }
}

/// Navigation shell page, persisted for the visual layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Page {
    #[default]
    Home,
    Test,
    Help,
}

/// Non-linear navigation, only while dev mode is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevJump {
    Next,
    Previous,
    /// 1-based question number.
    To(usize),
}

// ---------------------------------------------------------------------------
// Configuration and state
// ---------------------------------------------------------------------------

/// Tunables of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Delay before an expression capture starts.
    pub countdown: Duration,
    /// Hard limit on one expression capture.
    pub capture_cap: Duration,
    /// Slice length of the whole-session recording.
    pub session_slice: Duration,
    pub ordered_rule: OrderedRule,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let recording = RecordingConfig::default();
        Self {
            countdown: recording.countdown,
            capture_cap: recording.cap,
            session_slice: DEFAULT_TIMESLICE,
            ordered_rule: OrderedRule::default(),
        }
    }
}

impl SessionConfig {
    fn recording(&self) -> RecordingConfig {
        RecordingConfig {
            countdown: self.countdown,
            cap: self.capture_cap,
        }
    }
}

/// Everything about the session that survives a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub age_years: Option<u32>,
    pub age_months: Option<u32>,
    pub respondent_id: String,
    pub age_confirmed: bool,
    pub age_invalid: bool,
    pub current_index: usize,
    pub tally: Tally,
    pub mic_permission: bool,
    pub mic_skipped: bool,
    pub dev_mode: bool,
    pub page: Page,
}

impl SessionState {
    /// Read every field, falling back to defaults.
    pub fn load(persistence: &Persistence) -> Self {
        Self {
            age_years: persistence.load(StorageKey::AgeYears),
            age_months: persistence.load(StorageKey::AgeMonths),
            respondent_id: persistence.load_or_default(StorageKey::IdDigits),
            age_confirmed: persistence.load_or_default(StorageKey::AgeConfirmed),
            age_invalid: persistence.load_or_default(StorageKey::AgeInvalid),
            current_index: persistence.load_or_default(StorageKey::CurrentIndex),
            tally: Tally {
                correct: persistence.load_or_default(StorageKey::CorrectAnswers),
                partial: persistence.load_or_default(StorageKey::PartialAnswers),
                wrong: persistence.load_or_default(StorageKey::WrongAnswers),
            },
            mic_permission: persistence.load_or_default(StorageKey::Permission),
            mic_skipped: persistence.load_or_default(StorageKey::MicrophoneSkipped),
            dev_mode: persistence.load_or_default(StorageKey::DevMode),
            page: persistence.load_or_default(StorageKey::Page),
        }
    }

    /// Write every field.
    pub fn save(&self, persistence: &Persistence) {
        match self.age_years {
            Some(years) => persistence.save(StorageKey::AgeYears, &years),
            None => persistence.remove(StorageKey::AgeYears),
        }
        match self.age_months {
            Some(months) => persistence.save(StorageKey::AgeMonths, &months),
            None => persistence.remove(StorageKey::AgeMonths),
        }
        persistence.save(StorageKey::IdDigits, &self.respondent_id);
        persistence.save(StorageKey::AgeConfirmed, &self.age_confirmed);
        persistence.save(StorageKey::AgeInvalid, &self.age_invalid);
        persistence.save(StorageKey::CurrentIndex, &self.current_index);
        persistence.save(StorageKey::CorrectAnswers, &self.tally.correct);
        persistence.save(StorageKey::PartialAnswers, &self.tally.partial);
        persistence.save(StorageKey::WrongAnswers, &self.tally.wrong);
        persistence.save(StorageKey::Permission, &self.mic_permission);
        persistence.save(StorageKey::MicrophoneSkipped, &self.mic_skipped);
        persistence.save(StorageKey::DevMode, &self.dev_mode);
        persistence.save(StorageKey::Page, &self.page);
    }
}

/// Position in the question list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub answered: usize,
    pub total: usize,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Question {} of {}", self.answered + 1, self.total)
    }
}

/// The engine's collaborators.
pub struct SessionDeps {
    pub persistence: Persistence,
    pub assets: AssetLayout,
    pub fetcher: Arc<dyn ImageFetcher>,
    pub masks: Arc<dyn MaskSource>,
    /// Used for per-question captures.
    pub microphone: Arc<dyn CaptureDevice>,
    /// Used for the whole-session capture.
    pub session_microphone: Arc<dyn CaptureDevice>,
    pub sink: Arc<dyn SubmissionSink>,
}

struct ActiveQuestion {
    index: usize,
    evaluator: AnswerEvaluator,
    show_hint: bool,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// One session, from age entry to completion.
pub struct SessionEngine {
    catalog: Arc<Catalog>,
    config: SessionConfig,
    persistence: Persistence,
    assets: AssetLayout,
    preload: Arc<ImagePreloadQueue>,
    masks: Arc<dyn MaskSource>,
    microphone: Arc<dyn CaptureDevice>,
    sink: Arc<dyn SubmissionSink>,
    recorder: RecordingController,
    session_recorder: ContinuousSessionRecorder,
    state: SessionState,
    phase: Phase,
    question: Option<ActiveQuestion>,
    submission: Option<SessionSubmission>,
}

impl fmt::Debug for SessionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEngine")
            .field("phase", &self.phase)
            .field("state", &self.state)
            .field("questions", &self.catalog.len())
            .finish_non_exhaustive()
    }
}

impl SessionEngine {
    /// Build the engine from persisted state and resume the phase it
    /// implies.
    pub async fn start(
        catalog: Arc<Catalog>,
        deps: SessionDeps,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        if catalog.is_empty() {
            return Err(SessionError::EmptyCatalog);
        }

        let preload = Arc::new(ImagePreloadQueue::new(deps.fetcher, deps.assets.clone()));
        preload.start_loading(Arc::clone(&catalog));

        let state = SessionState::load(&deps.persistence);
        let recorder = RecordingController::new(
            Arc::clone(&deps.microphone),
            deps.persistence.clone(),
            config.recording(),
        );
        let session_recorder = ContinuousSessionRecorder::new(
            deps.session_microphone,
            deps.persistence.clone(),
            config.session_slice,
        );

        let mut engine = Self {
            catalog,
            config,
            persistence: deps.persistence,
            assets: deps.assets,
            preload,
            masks: deps.masks,
            microphone: deps.microphone,
            sink: deps.sink,
            recorder,
            session_recorder,
            state,
            phase: Phase::Gate,
            question: None,
            submission: None,
        };
        engine.resume().await;
        Ok(engine)
    }

    async fn resume(&mut self) {
        let last = self.catalog.len() - 1;
        let state = &mut self.state;

        self.phase = if state.age_invalid {
            Phase::Rejected
        } else if !state.age_confirmed {
            Phase::Gate
        } else if !(state.mic_permission || state.mic_skipped) {
            Phase::Consent
        } else {
            if state.current_index > last {
                tracing::warn!(
                    "persisted question index {} is past the catalog end, using {last}",
                    state.current_index
                );
                state.current_index = last;
            }
            if state.current_index == last && state.tally.total() as usize > last {
                Phase::Completed
            } else {
                Phase::Loop {
                    index: state.current_index,
                }
            }
        };
        tracing::info!("session starting in {} phase", self.phase.kind());

        if self.state.mic_skipped {
            self.recorder.disable();
        }
        if let Phase::Loop { index } = self.phase {
            if self.state.mic_permission && !self.state.mic_skipped {
                self.session_recorder.resume().await;
            }
            self.load_question(index, true).await;
        }
        self.save();
    }

    fn save(&self) {
        self.state.save(&self.persistence);
    }

    fn require_phase(&self, expected: PhaseKind) -> Result<(), SessionError> {
        let actual = self.phase.kind();
        if actual != expected {
            return Err(SessionError::WrongPhase { expected, actual });
        }
        Ok(())
    }

    // -- accessors ----------------------------------------------------------

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn assets(&self) -> &AssetLayout {
        &self.assets
    }

    /// Shared handle, for running the queue in the background.
    pub fn preload(&self) -> Arc<ImagePreloadQueue> {
        Arc::clone(&self.preload)
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.question
            .as_ref()
            .and_then(|q| self.catalog.get(q.index))
    }

    pub fn progress(&self) -> Progress {
        Progress {
            answered: self.state.current_index,
            total: self.catalog.len(),
        }
    }

    /// Whether every image of the current question has been loaded.
    pub fn is_current_ready(&self) -> bool {
        self.current_question()
            .is_some_and(|q| self.preload.is_ready(&q.query_number, q.image_count))
    }

    /// Visual flags for the current question's images.
    pub fn feedback(&self) -> Vec<ImageFeedback> {
        match (&self.question, self.current_question()) {
            (Some(active), Some(q)) => active.evaluator.feedback(q.image_count.total()),
            _ => Vec::new(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.question
            .as_ref()
            .is_some_and(|q| q.evaluator.is_resolved())
    }

    pub fn recording_status(&self) -> RecordingStatus {
        self.recorder.status()
    }

    pub fn recorder(&self) -> &RecordingController {
        &self.recorder
    }

    pub fn session_recorder(&self) -> &ContinuousSessionRecorder {
        &self.session_recorder
    }

    /// The hint text, if the operator has toggled it on.
    pub fn visible_hint(&self) -> Option<&str> {
        let active = self.question.as_ref()?;
        if !active.show_hint {
            return None;
        }
        self.current_question()?.hint_text()
    }

    /// The submission handed to the sink on completion.
    pub fn submission(&self) -> Option<&SessionSubmission> {
        self.submission.as_ref()
    }

    pub fn completion_text(&self) -> Option<String> {
        (self.phase == Phase::Completed)
            .then(|| completion_text(&self.state.tally, self.catalog.len()))
    }

    // -- gate and consent ---------------------------------------------------

    /// Validate age and id. Returns the new phase: `Consent` on success,
    /// `Rejected` for an out-of-range age.
    pub fn submit_gate(
        &mut self,
        years: &str,
        months: &str,
        respondent_id: &str,
    ) -> Result<Phase, SessionError> {
        self.require_phase(PhaseKind::Gate)?;

        let years: u32 = years
            .trim()
            .parse()
            .map_err(|_| SessionError::MalformedAge)?;
        let months: u32 = months
            .trim()
            .parse()
            .map_err(|_| SessionError::MalformedAge)?;
        if months > 11 {
            return Err(SessionError::MalformedAge);
        }

        self.state.age_years = Some(years);
        self.state.age_months = Some(months);
        self.state.respondent_id = respondent_id.trim().to_string();

        let total = years.saturating_mul(12).saturating_add(months);
        if !(MIN_AGE_MONTHS..MAX_AGE_MONTHS).contains(&total) {
            tracing::info!("age of {total} months is outside the tested range");
            self.state.age_invalid = true;
            self.phase = Phase::Rejected;
            self.save();
            return Ok(self.phase);
        }

        let id = &self.state.respondent_id;
        if id.len() != ID_DIGITS || !id.chars().all(|c| c.is_ascii_digit()) {
            self.save();
            return Err(SessionError::MalformedId);
        }

        self.state.age_confirmed = true;
        self.phase = Phase::Consent;
        self.save();
        self.preload.update_priority();
        Ok(self.phase)
    }

    /// Request the microphone. On denial the session continues without
    /// recording and the returned notice should be shown to the operator.
    pub async fn allow_microphone(&mut self) -> Result<Option<String>, SessionError> {
        self.require_phase(PhaseKind::Consent)?;

        let notice = match self.microphone.request_permission().await {
            Ok(()) => {
                self.state.mic_permission = true;
                self.session_recorder.start().await;
                None
            }
            Err(e) => {
                tracing::warn!("microphone unavailable, continuing without recording: {e}");
                self.state.mic_skipped = true;
                self.recorder.disable();
                Some(format!(
                    "Microphone access failed ({e}). The test will continue without recording."
                ))
            }
        };
        self.enter_loop().await;
        Ok(notice)
    }

    /// Continue without any recording for the rest of the session.
    pub async fn skip_microphone(&mut self) -> Result<(), SessionError> {
        self.require_phase(PhaseKind::Consent)?;
        self.state.mic_skipped = true;
        self.recorder.disable();
        self.enter_loop().await;
        Ok(())
    }

    async fn enter_loop(&mut self) {
        let index = self.state.current_index.min(self.catalog.len() - 1);
        self.state.current_index = index;
        self.state.page = Page::Test;
        self.phase = Phase::Loop { index };
        self.save();
        self.load_question(index, false).await;
    }

    async fn load_question(&mut self, index: usize, resuming: bool) {
        let Some(question) = self.catalog.get(index) else {
            return;
        };
        let query_type = question.query_type;
        let mut evaluator = AnswerEvaluator::new(question.answer_variant(), self.config.ordered_rule);

        let mask_url = match evaluator.variant() {
            AnswerVariant::Mask { mask_ref } => Some(self.assets.resolve(mask_ref)),
            _ => None,
        };
        if let Some(url) = mask_url {
            match self.masks.load_mask(&url).await {
                Ok(mask) => evaluator.attach_mask(mask),
                Err(e) => tracing::warn!("failed to load mask {url}: {e:#}"),
            }
        }

        let restored = resuming
            && self.persistence.contains(StorageKey::AudioChunks)
            && self.recorder.restore();
        if !restored {
            self.recorder.load_question(query_type).await;
        }

        tracing::debug!("loaded question {} ({})", question.query_number, query_type);
        self.question = Some(ActiveQuestion {
            index,
            evaluator,
            show_hint: false,
        });
    }

    // -- question loop ------------------------------------------------------

    fn active_mut(&mut self) -> Result<&mut ActiveQuestion, SessionError> {
        let actual = self.phase.kind();
        self.question.as_mut().ok_or(SessionError::WrongPhase {
            expected: PhaseKind::Loop,
            actual,
        })
    }

    /// Register a click on image `image` (1-based). Only comprehension
    /// questions react to clicks.
    pub fn click(
        &mut self,
        image: u32,
        point: Option<ClickPoint>,
    ) -> Result<ClickOutcome, SessionError> {
        self.require_phase(PhaseKind::Loop)?;
        let Some(question) = self.current_question() else {
            return Ok(ClickOutcome::Ignored);
        };
        if question.query_type != QueryType::Comprehension {
            return Ok(ClickOutcome::Ignored);
        }
        if image == 0 || image > question.image_count.total() {
            tracing::debug!("click on missing image {image}");
            return Ok(ClickOutcome::Ignored);
        }
        let active = self.active_mut()?;
        Ok(active.evaluator.click(image, point))
    }

    /// Show or hide the hint. Returns whether it is now shown.
    pub fn toggle_hint(&mut self) -> Result<bool, SessionError> {
        self.require_phase(PhaseKind::Loop)?;
        let has_hint = self
            .current_question()
            .is_some_and(|q| q.hint_text().is_some());
        let active = self.active_mut()?;
        active.show_hint = has_hint && !active.show_hint;
        Ok(active.show_hint)
    }

    /// Whether the grading buttons may be used.
    pub fn can_continue(&self) -> bool {
        let (Some(active), Some(question)) = (&self.question, self.current_question()) else {
            return false;
        };
        match question.query_type {
            QueryType::Comprehension => active.evaluator.continue_enabled(),
            QueryType::Expression => self.state.mic_skipped || self.recorder.is_stopped(),
        }
    }

    /// Record the grader's choice and move on.
    pub async fn handle_continue(&mut self, outcome: GradeOutcome) -> Result<Phase, SessionError> {
        self.require_phase(PhaseKind::Loop)?;
        if !self.can_continue() {
            return Err(SessionError::ContinueLocked);
        }

        self.state.tally.record(outcome);
        let next = self.state.current_index + 1;
        if next < self.catalog.len() {
            self.state.current_index = next;
            self.phase = Phase::Loop { index: next };
            self.save();
            self.load_question(next, false).await;
        } else {
            self.save();
            self.complete().await;
        }
        Ok(self.phase)
    }

    async fn complete(&mut self) {
        self.phase = Phase::Completed;
        self.recorder.shutdown().await;
        self.question = None;
        self.session_recorder.stop().await;

        let tally = self.state.tally;
        let submission = SessionSubmission {
            user_id: self.state.respondent_id.clone(),
            age_years: self.state.age_years.unwrap_or_default(),
            age_months: self.state.age_months.unwrap_or_default(),
            correct: tally.correct,
            partial: tally.partial,
            wrong: tally.wrong,
            audio_artifact: self
                .session_recorder
                .final_artifact()
                .map(|a| a.to_data_url()),
            evaluation_text: completion_text(&tally, self.catalog.len()),
            completed_at: chrono::Utc::now(),
        };
        tracing::info!(
            "session completed: {} correct, {} partial, {} wrong",
            tally.correct,
            tally.partial,
            tally.wrong
        );
        if let Err(e) = self.sink.submit(&submission).await {
            tracing::error!("failed to submit session results: {e:#}");
        }
        self.submission = Some(submission);
    }

    /// Drive countdowns, the capture cap and session slices.
    pub async fn tick(&mut self) {
        if matches!(self.phase, Phase::Loop { .. }) {
            self.recorder.poll().await;
        }
        self.session_recorder.collect();
    }

    pub fn toggle_pause(&mut self) -> Result<bool, SessionError> {
        self.require_phase(PhaseKind::Loop)?;
        Ok(self.recorder.toggle_pause())
    }

    pub async fn stop_recording(&mut self) -> Result<bool, SessionError> {
        self.require_phase(PhaseKind::Loop)?;
        Ok(self.recorder.stop().await)
    }

    pub async fn redo_recording(&mut self) -> Result<(), SessionError> {
        self.require_phase(PhaseKind::Loop)?;
        self.recorder.redo().await;
        Ok(())
    }

    // -- dev mode -----------------------------------------------------------

    pub fn toggle_dev_mode(&mut self) -> bool {
        self.state.dev_mode = !self.state.dev_mode;
        self.persistence.save(StorageKey::DevMode, &self.state.dev_mode);
        tracing::info!("dev mode {}", if self.state.dev_mode { "on" } else { "off" });
        self.state.dev_mode
    }

    /// Move to another question without grading. Returns the new index.
    pub async fn dev_jump(&mut self, jump: DevJump) -> Result<usize, SessionError> {
        if !self.state.dev_mode {
            return Err(SessionError::DevModeDisabled);
        }
        self.require_phase(PhaseKind::Loop)?;

        let current = self.state.current_index;
        let last = self.catalog.len() - 1;
        let target = match jump {
            DevJump::Next => (current + 1).min(last),
            DevJump::Previous => current.saturating_sub(1),
            DevJump::To(n) if (1..=self.catalog.len()).contains(&n) => n - 1,
            DevJump::To(n) => {
                tracing::debug!("ignoring jump to question {n}");
                current
            }
        };
        if target != current {
            self.state.current_index = target;
            self.phase = Phase::Loop { index: target };
            self.persistence.save(StorageKey::CurrentIndex, &target);
            self.load_question(target, false).await;
        }
        Ok(target)
    }

    // -- reset --------------------------------------------------------------

    /// Stop every capture and clear all persisted keys. The engine is
    /// consumed; start a new one to begin a fresh session.
    pub async fn reset_all(mut self) {
        self.recorder.shutdown().await;
        self.session_recorder.cleanup().await;
        self.persistence.clear_all();
        tracing::info!("session reset");
    }
}
