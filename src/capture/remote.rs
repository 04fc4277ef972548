//! Capture backed by a recognizer running in an IPC client
//!
//! The browser front end owns the actual speech recognizer. It subscribes
//! as a recognizer bridge and gets a [`BridgeId`]. Each acquired session is
//! owned by exactly one bridge: only that bridge starts recognizing on
//! `listening_started`, and only its capture signals are accepted.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::engine::SessionToken;

use super::{CaptureError, CaptureHandle, CaptureOptions, SpeechCapture};

/// Identifies one connected recognizer bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BridgeId(u64);

impl BridgeId {
    #[cfg(test)]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for BridgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Bridges {
    next_id: u64,
    /// Connected bridges, oldest first
    attached: Vec<BridgeId>,
    /// Session and the bridge that owns it
    owner: Option<(SessionToken, BridgeId)>,
}

/// Tracks connected recognizer bridges and session ownership
#[derive(Debug, Clone, Default)]
pub struct RecognizerRegistry {
    bridges: Arc<Mutex<Bridges>>,
}

impl RecognizerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a bridge; it stays registered until the guard drops
    pub fn register(&self) -> RecognizerGuard {
        let mut bridges = self.lock();
        bridges.next_id += 1;
        let id = BridgeId(bridges.next_id);
        bridges.attached.push(id);
        debug!(bridge = %id, attached = bridges.attached.len(), "recognizer bridge registered");

        RecognizerGuard {
            id,
            registry: self.clone(),
        }
    }

    pub fn attached(&self) -> usize {
        self.lock().attached.len()
    }

    /// Whether `bridge` owns `session`
    pub fn owns(&self, bridge: BridgeId, session: SessionToken) -> bool {
        self.lock().owner == Some((session, bridge))
    }

    /// Session currently owned by `bridge`, if any
    pub fn owned_by(&self, bridge: BridgeId) -> Option<SessionToken> {
        match self.lock().owner {
            Some((session, owner)) if owner == bridge => Some(session),
            _ => None,
        }
    }

    /// Bind `session` to the most recently attached bridge
    fn claim(&self, session: SessionToken) -> Result<BridgeId, CaptureError> {
        let mut bridges = self
            .bridges
            .lock()
            .map_err(|_| CaptureError::Backend("recognizer registry poisoned".to_string()))?;
        let bridge = *bridges.attached.last().ok_or(CaptureError::NoRecognizer)?;
        bridges.owner = Some((session, bridge));
        Ok(bridge)
    }

    fn release(&self, session: SessionToken) {
        let mut bridges = self.lock();
        if matches!(bridges.owner, Some((owned, _)) if owned == session) {
            bridges.owner = None;
        }
    }

    fn unregister(&self, id: BridgeId) {
        let mut bridges = self.lock();
        bridges.attached.retain(|b| *b != id);
        if matches!(bridges.owner, Some((_, owner)) if owner == id) {
            bridges.owner = None;
        }
        debug!(bridge = %id, attached = bridges.attached.len(), "recognizer bridge released");
    }

    fn lock(&self) -> MutexGuard<'_, Bridges> {
        // Bookkeeping stays consistent even if a holder panicked
        self.bridges.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Keeps a recognizer bridge registered while alive
#[derive(Debug)]
pub struct RecognizerGuard {
    id: BridgeId,
    registry: RecognizerRegistry,
}

impl RecognizerGuard {
    pub fn id(&self) -> BridgeId {
        self.id
    }

    /// Session this bridge is currently recognizing for
    pub fn owned_session(&self) -> Option<SessionToken> {
        self.registry.owned_by(self.id)
    }
}

impl Drop for RecognizerGuard {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

/// Speech capture delegated to connected recognizer bridges
pub struct RemoteCapture {
    registry: RecognizerRegistry,
}

impl RemoteCapture {
    pub fn new(registry: RecognizerRegistry) -> Self {
        Self { registry }
    }
}

impl SpeechCapture for RemoteCapture {
    fn is_available(&self) -> bool {
        true
    }

    fn acquire(
        &mut self,
        token: SessionToken,
        options: &CaptureOptions,
    ) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        let bridge = self.registry.claim(token)?;

        info!(
            session = %token,
            %bridge,
            language = %options.language,
            "remote capture session acquired"
        );
        Ok(Box::new(RemoteSession {
            token,
            bridge,
            registry: self.registry.clone(),
        }))
    }
}

struct RemoteSession {
    token: SessionToken,
    bridge: BridgeId,
    registry: RecognizerRegistry,
}

impl CaptureHandle for RemoteSession {
    fn token(&self) -> SessionToken {
        self.token
    }

    fn recognizer(&self) -> Option<BridgeId> {
        Some(self.bridge)
    }

    fn abort(&mut self) {
        // The bridge stops recognizing when it sees `listening_stopped`
        debug!(session = %self.token, bridge = %self.bridge, "remote capture session aborted");
    }
}

impl Drop for RemoteSession {
    fn drop(&mut self) {
        self.registry.release(self.token);
    }
}
