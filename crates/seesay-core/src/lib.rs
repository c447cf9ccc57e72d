//! seesay-core: test-session engine for the See&Say language assessment.
//!
//! This crate holds the question catalog, the answer evaluator, the image
//! preload queue, both recorders, the persistence layer and the session
//! state machine that composes them. Every external effect (fetching,
//! decoding, the microphone, submission) sits behind a trait in [`traits`].

pub mod answer;
pub mod audio;
pub mod catalog;
pub mod error;
pub mod mock;
pub mod model;
pub mod persistence;
pub mod preload;
pub mod recording;
pub mod report;
pub mod session;
pub mod session_recorder;
pub mod traits;

pub use error::{DeviceError, SessionError};
pub use session::{SessionConfig, SessionDeps, SessionEngine};
