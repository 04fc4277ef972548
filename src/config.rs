//! Configuration loading and management

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::capture::CaptureOptions;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Recognizer settings sent to every capture session
    pub capture: CaptureOptions,

    /// Whether speech capture is available at all
    pub voice_enabled: bool,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from a variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let home = lookup("HOME").context("HOME is not set")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("portfolio-voice");

        let socket_path = lookup("PORTFOLIO_VOICE_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("voice.sock"));

        let mut capture = CaptureOptions::default();
        if let Some(language) = lookup("PORTFOLIO_VOICE_LANG").filter(|l| !l.trim().is_empty()) {
            capture.language = language.trim().to_string();
        }
        if let Some(value) = lookup("PORTFOLIO_VOICE_INTERIM") {
            capture.interim_results = parse_flag(&value)
                .with_context(|| format!("invalid PORTFOLIO_VOICE_INTERIM: {value}"))?;
        }

        let voice_enabled = match lookup("PORTFOLIO_VOICE_DISABLED") {
            Some(value) => !parse_flag(&value)
                .with_context(|| format!("invalid PORTFOLIO_VOICE_DISABLED: {value}"))?,
            None => true,
        };

        Ok(Self {
            socket_path,
            data_dir,
            capture,
            voice_enabled,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
