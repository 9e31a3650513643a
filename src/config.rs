use std::fs;
use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constraints::ConstraintParams;
use crate::tokens::Framing;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse config file: {0}")]
    Parse(#[from] ron::error::SpannedError),
}

/// What `stop` does to playback already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopPolicy {
    /// In-flight playback runs to completion (the default).
    LetPlaybackFinish,
    /// Playback is cut immediately; note-offs for struck notes still go out.
    Abandon,
}

/// Startup configuration. Every field has a default matching the live rig,
/// so a config file only needs the fields it wants to change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// UDP address the OSC listener binds.
    pub listen_addr: SocketAddr,
    /// UDP address generated notes are sent to.
    pub client_addr: SocketAddr,
    /// Seconds of human input per generation window.
    pub window_size: f64,
    /// Nucleus sampling p.
    pub top_p: f64,
    /// Sampling temperature.
    pub temperature: f64,
    /// Instrument recorded for the human performer's notes.
    pub human_instrument: u8,
    /// How captured windows are presented to the model.
    pub framing: Framing,
    /// Run the physical-constraint pipeline on generated notes.
    pub apply_constraints: bool,
    pub constraints: ConstraintParams,
    /// Treat a note received while idle as an implicit session start.
    pub auto_start_on_note: bool,
    /// Fire a C major arpeggio shortly after boot to verify the return path.
    pub startup_test: bool,
    pub stop_policy: StopPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            client_addr: SocketAddr::from(([127, 0, 0, 1], 9001)),
            window_size: 6.0,
            top_p: 0.95,
            temperature: 1.0,
            human_instrument: 0,
            framing: Framing::Continuation,
            apply_constraints: true,
            constraints: ConstraintParams::default(),
            auto_start_on_note: true,
            startup_test: false,
            stop_policy: StopPolicy::LetPlaybackFinish,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Ok(ron::from_str(&text)?)
    }
}
