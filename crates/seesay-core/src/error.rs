//! Error types for the session engine.
//!
//! `SessionError` variants are the operator-facing notices: the visual layer
//! shows them as a blocking message and the session stays where it was.
//! `DeviceError` covers the capture device collaborator.

use thiserror::Error;

use crate::session::PhaseKind;

/// Errors raised by session operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Years or months were not numbers, or months fell outside 0–11.
    #[error("please enter a valid age (months 0-11)")]
    MalformedAge,

    /// The respondent id was not exactly nine digits.
    #[error("please enter a valid ID number (9 digits)")]
    MalformedId,

    /// The operation is not available in the current phase.
    #[error("operation requires the {expected} phase, session is in {actual}")]
    WrongPhase {
        expected: PhaseKind,
        actual: PhaseKind,
    },

    /// Grading was attempted before the continue affordance unlocked.
    #[error("the current question cannot be graded yet")]
    ContinueLocked,

    /// The catalog contains no usable questions.
    #[error("no questions found in the catalog")]
    EmptyCatalog,

    /// A dev-mode operation was used while dev mode is off.
    #[error("dev mode is not enabled")]
    DevModeDisabled,
}

/// Errors from the capture device.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    /// The operator or the platform refused access to the microphone.
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// The platform has no capture support at all.
    #[error("audio capture is not supported on this platform")]
    Unsupported,

    /// The device is still held by another capture.
    #[error("capture device is busy")]
    Busy,

    /// Any other device failure.
    #[error("capture device failure: {0}")]
    Failed(String),
}
