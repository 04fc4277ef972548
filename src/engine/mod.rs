//! Voice command engine
//!
//! Provides an explicit state machine with three states:
//! - Idle: Default state, no capture session
//! - Listening: A capture session is attached and transcripts are matched
//! - Error: Acquisition or capture failed; `start` retries
//!
//! No state is terminal.

mod machine;
mod session;

pub use machine::{EngineInput, VoiceEngine};
pub use session::{SessionToken, Status, VoiceSnapshot};
