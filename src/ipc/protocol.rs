//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::capture::{BridgeId, CaptureSignal};
use crate::commands::CommandEntry;
use crate::engine::{SessionToken, Status, VoiceSnapshot};
use crate::events::EngineEvent;

/// Largest accepted frame body
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Requests from the front end to the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current voice status
    GetStatus,

    /// Start listening
    Start,

    /// Stop listening
    Stop,

    /// Mic button or keyboard shortcut
    Toggle,

    /// Request the command table
    ListCommands,

    /// Ping to check connectivity
    Ping,

    /// Subscribe to engine event notifications
    Subscribe {
        /// Client hosts a speech recognizer for remote capture
        #[serde(default)]
        recognizer: bool,
    },

    /// Transcript update from a recognizer bridge
    CaptureTranscript {
        session: SessionToken,
        text: String,
        is_final: bool,
    },

    /// Recognizer bridge hit an error
    CaptureError { session: SessionToken, reason: String },

    /// Recognizer bridge ended on its own
    CaptureEnded { session: SessionToken },
}

impl Request {
    /// Capture signal carried by this request, if any
    pub fn into_capture_signal(self) -> Option<CaptureSignal> {
        match self {
            Request::CaptureTranscript {
                session,
                text,
                is_final,
            } => Some(CaptureSignal::transcript(session, text, is_final)),
            Request::CaptureError { session, reason } => Some(CaptureSignal::error(session, reason)),
            Request::CaptureEnded { session } => Some(CaptureSignal::ended(session)),
            _ => None,
        }
    }
}

/// Responses from daemon to the front end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current voice status
    Status(VoiceStatus),

    /// Request was queued for the engine
    Accepted,

    /// Command table listing
    Commands { entries: Vec<CommandEntry> },

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed {
        /// Id assigned to a recognizer bridge, matched against
        /// `listening_started.recognizer`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bridge: Option<BridgeId>,
    },

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Push notification from daemon to subscribed clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Engine event occurred
    Event { event: EngineEvent },

    /// Events were dropped for this client; re-query status to resync
    Lagged { skipped: u64 },
}

/// Full voice status snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceStatus {
    /// Daemon version
    pub version: String,

    pub status: Status,

    /// Latest normalized transcript, for live captioning
    pub transcript: String,

    pub error: Option<String>,

    /// Whether speech capture is supported
    pub supported: bool,

    /// Active capture session token
    pub session: Option<SessionToken>,

    /// Connected recognizer bridges
    pub recognizers: usize,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl Default for VoiceStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            status: Status::Idle,
            transcript: String::new(),
            error: None,
            supported: false,
            session: None,
            recognizers: 0,
            uptime_secs: 0,
        }
    }
}

impl VoiceStatus {
    /// Apply an engine snapshot
    pub fn apply(&mut self, snapshot: VoiceSnapshot) {
        self.status = snapshot.status;
        self.transcript = snapshot.transcript;
        self.error = snapshot.error;
        self.supported = snapshot.supported;
        self.session = snapshot.session;
    }
}
