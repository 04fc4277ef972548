//! Recognition session state owned by the engine

use serde::{Deserialize, Serialize};

/// Listening status exposed to the UI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Not listening
    #[default]
    Idle,
    /// A capture session is active
    Listening,
    /// Acquisition or capture failed; restartable
    Error,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Idle => write!(f, "Idle"),
            Status::Listening => write!(f, "Listening"),
            Status::Error => write!(f, "Error"),
        }
    }
}

/// Identifies one capture session
///
/// Tokens increase monotonically and are never reused, so a signal from an
/// earlier session can always be told apart from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(u64);

impl SessionToken {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    pub(crate) fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// Mutable session state, written only by the engine
#[derive(Debug, Default)]
pub(crate) struct RecognitionSession {
    pub status: Status,
    pub last_transcript: String,
    pub last_error: Option<String>,
    /// Token of the attached capture session, if any
    pub active: Option<SessionToken>,
}

/// Read-only view of the session published to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceSnapshot {
    pub status: Status,
    pub transcript: String,
    pub error: Option<String>,
    pub supported: bool,
    pub session: Option<SessionToken>,
}

impl Default for VoiceSnapshot {
    fn default() -> Self {
        Self {
            status: Status::Idle,
            transcript: String::new(),
            error: None,
            supported: false,
            session: None,
        }
    }
}

impl RecognitionSession {
    pub fn snapshot(&self, supported: bool) -> VoiceSnapshot {
        VoiceSnapshot {
            status: self.status,
            transcript: self.last_transcript.clone(),
            error: self.last_error.clone(),
            supported,
            session: self.active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_increase() {
        let first = SessionToken::new(1);
        assert!(first.next() > first);
        assert_eq!(first.next().get(), 2);
    }

    #[test]
    fn test_snapshot_serialization() {
        let session = RecognitionSession {
            status: Status::Error,
            last_error: Some("network".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&session.snapshot(true)).unwrap();
        assert!(json.contains(r#""status":"error""#));
        assert!(json.contains(r#""error":"network""#));
        assert!(json.contains(r#""session":null"#));
    }
}
