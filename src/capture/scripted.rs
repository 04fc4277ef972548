//! Deterministic capture capability for tests

use std::sync::{Arc, Mutex};

use crate::engine::SessionToken;

use super::{CaptureError, CaptureHandle, CaptureOptions, SpeechCapture};

#[derive(Default)]
struct Script {
    acquired: Vec<SessionToken>,
    aborted: Vec<SessionToken>,
    fail_next: Option<String>,
}

/// Records acquisitions and aborts; tests fire signals by hand
#[derive(Clone)]
pub struct ScriptedCapture {
    available: bool,
    script: Arc<Mutex<Script>>,
}

impl ScriptedCapture {
    pub fn new() -> Self {
        Self {
            available: true,
            script: Arc::default(),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            script: Arc::default(),
        }
    }

    /// Make the next `acquire` fail with `reason`
    pub fn fail_next_acquire(&self, reason: &str) {
        self.script.lock().unwrap().fail_next = Some(reason.to_string());
    }

    pub fn acquired(&self) -> Vec<SessionToken> {
        self.script.lock().unwrap().acquired.clone()
    }

    pub fn aborted(&self) -> Vec<SessionToken> {
        self.script.lock().unwrap().aborted.clone()
    }
}

impl SpeechCapture for ScriptedCapture {
    fn is_available(&self) -> bool {
        self.available
    }

    fn acquire(
        &mut self,
        token: SessionToken,
        _options: &CaptureOptions,
    ) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        let mut script = self.script.lock().unwrap();
        if let Some(reason) = script.fail_next.take() {
            return Err(CaptureError::Backend(reason));
        }
        script.acquired.push(token);
        Ok(Box::new(ScriptedSession {
            token,
            script: Arc::clone(&self.script),
        }))
    }
}

struct ScriptedSession {
    token: SessionToken,
    script: Arc<Mutex<Script>>,
}

impl CaptureHandle for ScriptedSession {
    fn token(&self) -> SessionToken {
        self.token
    }

    fn abort(&mut self) {
        self.script.lock().unwrap().aborted.push(self.token);
    }
}
