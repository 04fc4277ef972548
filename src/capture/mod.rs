//! Speech capture capability
//!
//! The engine never talks to a recognizer directly. It asks a
//! [`SpeechCapture`] for a session bound to a [`SessionToken`], and the
//! capability later delivers [`CaptureSignal`]s tagged with that token.

mod remote;
#[cfg(test)]
pub(crate) mod scripted;

use serde::{Deserialize, Serialize};

use crate::engine::SessionToken;

pub use remote::{BridgeId, RecognizerGuard, RecognizerRegistry, RemoteCapture};

/// Recognizer settings handed to every acquired session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureOptions {
    /// BCP 47 language tag
    pub language: String,
    /// Keep listening across utterances
    pub continuous: bool,
    /// Deliver interim results as well as finals
    pub interim_results: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            continuous: true,
            interim_results: true,
        }
    }
}

/// One transcript update from the recognizer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    pub text: String,
    pub is_final: bool,
}

/// What a capture session reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    Transcript(TranscriptEvent),
    Error(String),
    /// Session ended on its own, e.g. silence timeout
    Ended,
}

/// A capture event tagged with the session that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSignal {
    pub token: SessionToken,
    pub event: CaptureEvent,
}

impl CaptureSignal {
    pub fn transcript(token: SessionToken, text: impl Into<String>, is_final: bool) -> Self {
        Self {
            token,
            event: CaptureEvent::Transcript(TranscriptEvent {
                text: text.into(),
                is_final,
            }),
        }
    }

    pub fn error(token: SessionToken, reason: impl Into<String>) -> Self {
        Self {
            token,
            event: CaptureEvent::Error(reason.into()),
        }
    }

    pub fn ended(token: SessionToken) -> Self {
        Self {
            token,
            event: CaptureEvent::Ended,
        }
    }
}

/// Errors raised while acquiring a capture session
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("speech recognition is not supported in this environment")]
    Unavailable,

    #[error("no speech recognizer is attached")]
    NoRecognizer,

    #[error("failed to start speech recognition: {0}")]
    Backend(String),
}

/// A platform capability able to produce capture sessions
pub trait SpeechCapture: Send {
    /// Whether this environment can capture speech at all
    fn is_available(&self) -> bool;

    /// Start a new session whose signals will carry `token`
    fn acquire(
        &mut self,
        token: SessionToken,
        options: &CaptureOptions,
    ) -> Result<Box<dyn CaptureHandle>, CaptureError>;
}

/// A live capture session
pub trait CaptureHandle: Send {
    fn token(&self) -> SessionToken;

    /// Bridge that recognizes for this session, for remote capture
    fn recognizer(&self) -> Option<BridgeId> {
        None
    }

    /// Ask the capability to terminate the session
    fn abort(&mut self);
}

/// Capability for environments without speech recognition
#[derive(Debug, Default)]
pub struct UnavailableCapture;

impl SpeechCapture for UnavailableCapture {
    fn is_available(&self) -> bool {
        false
    }

    fn acquire(
        &mut self,
        _token: SessionToken,
        _options: &CaptureOptions,
    ) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        Err(CaptureError::Unavailable)
    }
}
