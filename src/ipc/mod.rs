//! IPC module for daemon-front end communication

mod protocol;
mod server;

pub use server::{EngineLink, Server};
