//! Flat integer token encoding shared with the generative model.
//!
//! Every note is one triple `[time, duration, note]` of offset integers.
//! Times and durations are quantized to `TIME_RESOLUTION` ticks per second
//! and clamped to their largest representable bucket; the note field packs
//! pitch and instrument together. The model expects triples in ascending
//! time order, ties left in input order.

use serde::{Deserialize, Serialize};

use crate::events::NoteEvent;

/// Quantization ticks per second.
pub const TIME_RESOLUTION: u32 = 100;
/// Number of time buckets (100 seconds).
pub const MAX_TIME: u32 = 10_000;
/// Number of duration buckets (10 seconds).
pub const MAX_DUR: u32 = 1_000;
pub const MAX_PITCH: u32 = 128;
pub const MAX_INSTR: u32 = 129;

pub const TIME_OFFSET: u32 = 0;
pub const DUR_OFFSET: u32 = TIME_OFFSET + MAX_TIME;
pub const NOTE_OFFSET: u32 = DUR_OFFSET + MAX_DUR;
/// Anticipated ("control") events re-base all three fields by this offset.
pub const CONTROL_OFFSET: u32 = NOTE_OFFSET + MAX_PITCH * MAX_INSTR;

/// Shortest duration `decode` will produce, seconds.
const MIN_DECODED_DURATION: f64 = 0.05;

/// Encode notes as event triples in the model's canonical time order.
pub fn encode(notes: &[NoteEvent]) -> Vec<u32> {
    let mut triples: Vec<[u32; 3]> = notes
        .iter()
        .map(|n| {
            let t_bins = ((n.onset * TIME_RESOLUTION as f64) as u32).min(MAX_TIME - 1);
            let d_bins = ((n.duration * TIME_RESOLUTION as f64) as u32).min(MAX_DUR - 1);
            let note_v = n.pitch as u32 + n.instrument as u32 * MAX_PITCH;
            [TIME_OFFSET + t_bins, DUR_OFFSET + d_bins, NOTE_OFFSET + note_v]
        })
        .collect();

    // stable, so simultaneous notes keep their input order
    triples.sort_by_key(|t| t[0]);
    triples.into_iter().flatten().collect()
}

/// Decode event triples back into notes, sorted by onset.
///
/// A triple whose note field falls outside the pitch/instrument range is
/// discarded; the model occasionally emits garbage and a dropped note is
/// better than a dead cycle. A trailing partial group is ignored.
pub fn decode(tokens: &[u32]) -> Vec<NoteEvent> {
    let mut notes = Vec::with_capacity(tokens.len() / 3);
    for group in tokens.chunks_exact(3) {
        let t_bins = group[0] as i64 - TIME_OFFSET as i64;
        let d_bins = group[1] as i64 - DUR_OFFSET as i64;
        let note_v = group[2] as i64 - NOTE_OFFSET as i64;

        if note_v < 0 || note_v >= (MAX_PITCH * MAX_INSTR) as i64 {
            continue;
        }

        let pitch = (note_v % MAX_PITCH as i64) as u8;
        let instrument = (note_v / MAX_PITCH as i64) as u8;
        let onset = t_bins as f64 / TIME_RESOLUTION as f64;
        let duration = (d_bins as f64 / TIME_RESOLUTION as f64).max(MIN_DECODED_DURATION);
        notes.push(NoteEvent::new(onset, duration, pitch, instrument));
    }

    notes.sort_by(|a, b| a.onset.total_cmp(&b.onset));
    notes
}

/// Keep only notes whose onset lies in `[start, end)`. Durations are left
/// alone even when they spill past `end`.
pub fn clip(notes: Vec<NoteEvent>, start: f64, end: f64) -> Vec<NoteEvent> {
    notes
        .into_iter()
        .filter(|n| n.onset >= start && n.onset < end)
        .collect()
}

/// Tokens handed to the model for one generation call.
#[derive(Debug, Clone, Default)]
pub struct FramedWindow {
    /// Already-happened events the model should continue from.
    pub prompt: Vec<u32>,
    /// Anticipated events the model should react to.
    pub controls: Vec<u32>,
}

/// How a captured window is presented to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Framing {
    /// Notes go in as regular event tokens; the model continues the music.
    Continuation,
    /// Notes go in as control tokens the model treats as about to happen.
    Anticipation,
}

impl Framing {
    pub fn frame(&self, notes: &[NoteEvent]) -> FramedWindow {
        let events = encode(notes);
        match self {
            Framing::Continuation => FramedWindow {
                prompt: events,
                controls: Vec::new(),
            },
            Framing::Anticipation => FramedWindow {
                prompt: Vec::new(),
                controls: events.into_iter().map(|t| t + CONTROL_OFFSET).collect(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: f64 = 1.0 / TIME_RESOLUTION as f64;

    #[test]
    fn round_trip_within_one_tick() {
        let notes = vec![
            NoteEvent::new(0.0, 0.5, 60, 0),
            NoteEvent::new(1.234, 0.25, 72, 3),
            NoteEvent::new(2.718, 1.5, 35, 1),
        ];
        let decoded = decode(&encode(&notes));
        assert_eq!(decoded.len(), notes.len());
        for (orig, got) in notes.iter().zip(&decoded) {
            assert!((orig.onset - got.onset).abs() <= TICK);
            assert!((orig.duration - got.duration).abs() <= TICK);
            assert_eq!(orig.pitch, got.pitch);
            assert_eq!(orig.instrument, got.instrument);
        }
    }

    #[test]
    fn encode_sorts_triples_by_time() {
        let notes = vec![
            NoteEvent::new(2.0, 0.1, 64, 0),
            NoteEvent::new(0.5, 0.1, 60, 0),
        ];
        let tokens = encode(&notes);
        assert_eq!(tokens.len(), 6);
        assert!(tokens[0] <= tokens[3]);
        assert_eq!(tokens[2], NOTE_OFFSET + 60);
    }

    #[test]
    fn clamps_to_largest_bucket() {
        let notes = vec![NoteEvent::new(500.0, 60.0, 127, 0)];
        let tokens = encode(&notes);
        assert_eq!(tokens[0], TIME_OFFSET + MAX_TIME - 1);
        assert_eq!(tokens[1], DUR_OFFSET + MAX_DUR - 1);
    }

    #[test]
    fn out_of_range_note_value_is_discarded() {
        let good = [TIME_OFFSET + 100, DUR_OFFSET + 50, NOTE_OFFSET + 60];
        let bad = [
            TIME_OFFSET + 200,
            DUR_OFFSET + 50,
            NOTE_OFFSET + MAX_PITCH * MAX_INSTR,
        ];
        let tokens: Vec<u32> = good.iter().chain(bad.iter()).copied().collect();
        let notes = decode(&tokens);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].pitch, 60);
    }

    #[test]
    fn trailing_partial_group_is_ignored() {
        let tokens = [TIME_OFFSET + 100, DUR_OFFSET + 50, NOTE_OFFSET + 60, 42];
        assert_eq!(decode(&tokens).len(), 1);
    }

    #[test]
    fn decoded_durations_are_floored() {
        let tokens = [TIME_OFFSET, DUR_OFFSET, NOTE_OFFSET + 60];
        let notes = decode(&tokens);
        assert!((notes[0].duration - 0.05).abs() < 1e-9);
    }

    #[test]
    fn clip_is_half_open() {
        let notes = vec![
            NoteEvent::new(5.9, 0.1, 60, 0),
            NoteEvent::new(6.0, 0.1, 61, 0),
            NoteEvent::new(11.99, 0.1, 62, 0),
            NoteEvent::new(12.0, 0.1, 63, 0),
        ];
        let clipped = clip(notes, 6.0, 12.0);
        let pitches: Vec<u8> = clipped.iter().map(|n| n.pitch).collect();
        assert_eq!(pitches, vec![61, 62]);
    }

    #[test]
    fn framings_place_the_same_events_differently() {
        let notes = vec![NoteEvent::new(0.5, 0.2, 60, 0)];

        let continuation = Framing::Continuation.frame(&notes);
        assert_eq!(continuation.prompt.len(), 3);
        assert!(continuation.controls.is_empty());

        let anticipation = Framing::Anticipation.frame(&notes);
        assert!(anticipation.prompt.is_empty());
        assert_eq!(anticipation.controls.len(), 3);
        for (p, c) in continuation.prompt.iter().zip(&anticipation.controls) {
            assert_eq!(p + CONTROL_OFFSET, *c);
        }
    }
}
