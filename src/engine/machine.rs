//! Voice command engine
//!
//! Bridges asynchronous capture signals to command actions. The engine is
//! the only writer of the recognition session; everything else observes
//! it through `StatusChanged` snapshots.

use std::time::Instant;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::capture::{
    CaptureEvent, CaptureHandle, CaptureOptions, CaptureSignal, SpeechCapture, TranscriptEvent,
};
use crate::commands::{normalize, Action, ActionHandler, CommandEntry, CommandTable};
use crate::events::{EngineEvent, StopReason};

use super::session::{RecognitionSession, SessionToken, Status, VoiceSnapshot};

/// Inputs processed by the engine loop
#[derive(Debug, Clone)]
pub enum EngineInput {
    Start,
    Stop,
    Toggle,
    /// Signal from a capture session
    Capture(CaptureSignal),
}

/// Owns the listening state machine and the command table
pub struct VoiceEngine {
    capture: Box<dyn SpeechCapture>,
    actions: Box<dyn ActionHandler>,
    table: CommandTable,
    options: CaptureOptions,
    /// Probed once in `new`
    supported: bool,
    session: RecognitionSession,
    handle: Option<Box<dyn CaptureHandle>>,
    /// Last token handed out; 0 before the first session
    last_token: SessionToken,
    listening_since: Option<Instant>,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl VoiceEngine {
    /// Create a new engine with the builtin command table
    pub fn new(
        capture: Box<dyn SpeechCapture>,
        actions: Box<dyn ActionHandler>,
        options: CaptureOptions,
        event_tx: broadcast::Sender<EngineEvent>,
    ) -> Self {
        let supported = capture.is_available();
        Self {
            capture,
            actions,
            table: CommandTable::builtin(),
            options,
            supported,
            session: RecognitionSession::default(),
            handle: None,
            last_token: SessionToken::new(0),
            listening_since: None,
            event_tx,
        }
    }

    /// Replace the command table
    #[cfg(test)]
    pub fn with_table(mut self, table: CommandTable) -> Self {
        self.table = table;
        self
    }

    pub fn is_supported(&self) -> bool {
        self.supported
    }

    pub fn status(&self) -> Status {
        self.session.status
    }

    pub fn table(&self) -> &CommandTable {
        &self.table
    }

    pub fn snapshot(&self) -> VoiceSnapshot {
        self.session.snapshot(self.supported)
    }

    /// Run the engine, processing inputs until the channel closes
    pub async fn run(&mut self, mut input_rx: mpsc::Receiver<EngineInput>) {
        info!(supported = self.supported, "voice engine started in Idle state");
        self.emit(EngineEvent::StatusChanged {
            snapshot: self.snapshot(),
        });

        while let Some(input) = input_rx.recv().await {
            self.handle_input(input);
        }

        self.stop();
        info!("voice engine stopped");
    }

    pub fn handle_input(&mut self, input: EngineInput) {
        match input {
            EngineInput::Start => self.start(),
            EngineInput::Stop => self.stop(),
            EngineInput::Toggle => self.toggle(),
            EngineInput::Capture(signal) => self.handle_signal(signal),
        }
    }

    /// Acquire a capture session and start listening
    ///
    /// Ignored when unsupported or already listening. An acquisition
    /// failure leaves the engine in `Error` with the reason recorded.
    pub fn start(&mut self) {
        self.observed(Self::start_session);
    }

    /// Release the active session and return to `Idle`
    ///
    /// Has no observable effect when already idle.
    pub fn stop(&mut self) {
        self.observed(Self::stop_session);
    }

    pub fn toggle(&mut self) {
        if self.session.status == Status::Listening {
            self.stop();
        } else {
            self.start();
        }
    }

    /// Route a capture signal, discarding those from inactive sessions
    pub fn handle_signal(&mut self, signal: CaptureSignal) {
        if self.session.active != Some(signal.token) {
            debug!(
                session = %signal.token,
                active = ?self.session.active,
                "discarding signal from stale capture session"
            );
            return;
        }

        let token = signal.token;
        self.observed(move |engine| match signal.event {
            CaptureEvent::Transcript(event) => engine.on_transcript(token, event),
            CaptureEvent::Error(reason) => engine.on_error(reason),
            CaptureEvent::Ended => engine.on_session_ended(),
        });
    }

    fn start_session(&mut self) {
        if !self.supported {
            debug!("speech capture unsupported, ignoring start");
            return;
        }
        if self.session.status == Status::Listening {
            debug!("already listening, ignoring start");
            return;
        }

        let token = self.last_token.next();
        self.last_token = token;

        match self.capture.acquire(token, &self.options) {
            Ok(handle) => {
                let recognizer = handle.recognizer();
                self.attach(handle);
                self.session.last_transcript.clear();
                self.session.last_error = None;
                self.transition_to(Status::Listening);
                self.emit(EngineEvent::ListeningStarted {
                    session: token,
                    options: self.options.clone(),
                    recognizer,
                });
            }
            Err(e) => {
                warn!(session = %token, error = %e, "failed to acquire capture session");
                self.session.last_error = Some(e.to_string());
                self.transition_to(Status::Error);
            }
        }
    }

    fn stop_session(&mut self) {
        if !self.supported || self.session.status == Status::Idle {
            return;
        }

        if let Some(token) = self.detach(true) {
            self.emit_stopped(token, StopReason::Requested);
        }
        self.session.last_transcript.clear();
        // Stopping from Error is how the UI dismisses the error
        self.session.last_error = None;
        self.transition_to(Status::Idle);
    }

    fn on_transcript(&mut self, token: SessionToken, event: TranscriptEvent) {
        let text = normalize(&event.text);
        self.session.last_transcript = text.clone();
        self.emit(EngineEvent::TranscriptUpdated {
            session: token,
            text: text.clone(),
            is_final: event.is_final,
        });

        let matched: Vec<CommandEntry> = self.table.matches(&text).cloned().collect();
        for entry in matched {
            info!(
                phrase = %entry.phrase,
                action = %entry.action,
                is_final = event.is_final,
                "voice command matched"
            );
            self.emit(EngineEvent::CommandMatched {
                phrase: entry.phrase.clone(),
                action: entry.action,
            });
            self.perform(entry.action);
        }
    }

    fn on_error(&mut self, reason: String) {
        warn!(%reason, "capture session reported an error");
        // The capability already terminated the session; no abort
        if let Some(token) = self.detach(false) {
            self.emit_stopped(token, StopReason::Error);
        }
        self.session.last_error = Some(reason);
        self.transition_to(Status::Error);
    }

    fn on_session_ended(&mut self) {
        if self.session.status != Status::Listening {
            return;
        }
        if let Some(token) = self.detach(false) {
            self.emit_stopped(token, StopReason::Ended);
        }
        self.transition_to(Status::Idle);
    }

    fn perform(&mut self, action: Action) {
        match action {
            Action::Navigate(destination) => self.actions.navigate(destination),
            Action::Scroll(target) => self.actions.scroll(target),
            Action::StopListening => self.stop_session(),
            Action::Help => {
                let help = self.table.help_text();
                self.actions.show_help(&help);
            }
        }
    }

    fn attach(&mut self, handle: Box<dyn CaptureHandle>) {
        self.session.active = Some(handle.token());
        self.handle = Some(handle);
        self.listening_since = Some(Instant::now());
    }

    /// Invalidate the active token and release its handle
    fn detach(&mut self, abort: bool) -> Option<SessionToken> {
        let token = self.session.active.take();
        if let Some(mut handle) = self.handle.take() {
            if abort {
                handle.abort();
            }
        }
        token
    }

    fn transition_to(&mut self, new_status: Status) {
        let old_status = self.session.status;
        if old_status == new_status {
            return;
        }

        info!(from = %old_status, to = %new_status, "voice status transition");
        self.session.status = new_status;
    }

    /// Run `f` and publish a snapshot if it changed anything observable
    fn observed(&mut self, f: impl FnOnce(&mut Self)) {
        let before = self.snapshot();
        f(self);
        let after = self.snapshot();
        if after != before {
            self.emit(EngineEvent::StatusChanged { snapshot: after });
        }
    }

    fn emit_stopped(&mut self, session: SessionToken, reason: StopReason) {
        let duration_ms = self
            .listening_since
            .take()
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        self.emit(EngineEvent::ListeningStopped {
            session,
            reason,
            duration_ms,
        });
    }

    fn emit(&self, event: EngineEvent) {
        debug!(%event, "emitting engine event");
        let _ = self.event_tx.send(event);
    }
}
