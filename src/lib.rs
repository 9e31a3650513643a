//! Real-time human/machine jam session engine.
//!
//! Listens for a performer's note events over OSC, periodically hands a
//! window of the captured performance to a generative model, adapts the
//! generated notes to the physical limits of the robotic playback
//! mechanism, and schedules them back out over OSC in real time.

pub mod buffer;
pub mod config;
pub mod constraints;
pub mod events;
pub mod model;
pub mod osc;
pub mod schedule;
pub mod session;
pub mod tokens;

pub use config::{Config, ConfigError, StopPolicy};
pub use events::{NoteEvent, OutMessage};
pub use model::{EchoModel, GenerateRequest, Model, ModelError};
pub use osc::{Command, OscClient, listen, spawn_listener};
pub use session::{SessionHandle, spawn_session};
