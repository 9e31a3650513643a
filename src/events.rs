use std::time::Instant;

/// Velocity used for every generated note-on.
pub const GENERATED_VELOCITY: u8 = 80;

/// A single note, timed in seconds relative to a session or window origin.
///
/// Pipeline stages build new `NoteEvent`s rather than mutating in place.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteEvent {
    pub onset: f64,
    pub duration: f64,
    pub pitch: u8,
    pub instrument: u8,
}

impl NoteEvent {
    pub fn new(onset: f64, duration: f64, pitch: u8, instrument: u8) -> Self {
        Self {
            onset,
            duration,
            pitch,
            instrument,
        }
    }
}

/// Generated instruments map onto channels 2..=16; channel 1 belongs to the
/// human performer.
pub fn output_channel(instrument: u8) -> u8 {
    (instrument % 15) + 2
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutMessage {
    NoteOn { pitch: u8, velocity: u8, channel: u8 },
    NoteOff { pitch: u8, channel: u8 },
    Status(String),
}

/// One outbound message with its wall-clock delivery time.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub deliver_at: Instant,
    pub message: OutMessage,
}
