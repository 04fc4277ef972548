//! Events module for voice engine transitions
//!
//! Provides structured event types for session lifecycle, transcript
//! updates and the side effects the front end must perform.

use serde::{Deserialize, Serialize};

use crate::capture::{BridgeId, CaptureOptions};
use crate::commands::{Action, Destination, ScrollTarget};
use crate::engine::{SessionToken, VoiceSnapshot};

/// Slots on the broadcast bus before a slow subscriber starts lagging
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Why a listening session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// `stop()` was called, by a client or by the "stop listening" command
    Requested,
    /// The capture capability ended on its own (silence timeout)
    Ended,
    /// The capture capability reported an error
    Error,
}

/// Events emitted by the voice engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Observable state changed
    StatusChanged { snapshot: VoiceSnapshot },

    /// A capture session was acquired; the named bridge starts recognizing
    ListeningStarted {
        session: SessionToken,
        options: CaptureOptions,
        recognizer: Option<BridgeId>,
    },

    /// The active capture session was released
    ListeningStopped {
        session: SessionToken,
        reason: StopReason,
        /// How long the session was listening
        duration_ms: u64,
    },

    /// Live caption, interim or final
    TranscriptUpdated {
        session: SessionToken,
        text: String,
        is_final: bool,
    },

    /// A command phrase occurred in the transcript
    CommandMatched { phrase: String, action: Action },

    /// Front end should route to `path`
    Navigate {
        destination: Destination,
        path: String,
    },

    /// Front end should scroll the viewport
    Scroll { target: ScrollTarget },

    /// Front end should show the help listing
    Help { text: String },
}

impl std::fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineEvent::StatusChanged { snapshot } => {
                write!(f, "STATUS_CHANGED ({})", snapshot.status)
            }
            EngineEvent::ListeningStarted {
                session,
                recognizer: Some(bridge),
                ..
            } => {
                write!(f, "LISTENING_STARTED (session {}, bridge {})", session, bridge)
            }
            EngineEvent::ListeningStarted { session, .. } => {
                write!(f, "LISTENING_STARTED (session {})", session)
            }
            EngineEvent::ListeningStopped {
                session,
                reason,
                duration_ms,
            } => {
                write!(
                    f,
                    "LISTENING_STOPPED (session {}, {:?}, {}ms)",
                    session, reason, duration_ms
                )
            }
            EngineEvent::TranscriptUpdated { is_final, .. } => {
                write!(f, "TRANSCRIPT_UPDATED (final: {})", is_final)
            }
            EngineEvent::CommandMatched { phrase, .. } => {
                write!(f, "COMMAND_MATCHED ({})", phrase)
            }
            EngineEvent::Navigate { path, .. } => write!(f, "NAVIGATE ({})", path),
            EngineEvent::Scroll { target } => write!(f, "SCROLL ({})", target),
            EngineEvent::Help { .. } => write!(f, "HELP"),
        }
    }
}
