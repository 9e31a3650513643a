//! Physical-constraint pipeline for the robotic playback mechanism.
//!
//! A striking arm cannot reach outside its bar range, cannot hold a note,
//! cannot hit several far-apart bars at the same instant, and cannot travel
//! between adjacent bars arbitrarily fast. Each stage encodes one of those
//! limits. Order matters: range folding and tremolo expansion run before the
//! local timing adjustments that assume final pitches and onset density.
//!
//! Canonical order: `octave_fold → expand_tremolo → stagger_chords →
//! nudge_runs → filter_notes`.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::events::NoteEvent;

/// Notes whose onsets differ by less than this are one chord, seconds.
const CHORD_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstraintParams {
    /// Lowest and highest reachable pitch.
    pub pitch_lo: u8,
    pub pitch_hi: u8,
    /// Notes longer than this are expanded into tremolo strikes.
    pub max_note_dur_s: f64,
    /// Tremolo strikes per second.
    pub tremolo_rate: f64,
    /// Duration of each tremolo strike, ms.
    pub tremolo_strike_dur_ms: f64,
    /// Delay added per extra chord member, ms.
    pub stagger_ms: f64,
    /// Run detection: maximum gap between consecutive strikes, ms.
    pub run_interval_ms: f64,
    /// Run detection: maximum pitch distance collapsed onto one bar.
    pub run_semitones: u8,
    /// Minimum gap between consecutive kept onsets, ms.
    pub min_note_dist_ms: f64,
    /// Maximum simultaneous notes kept per onset group.
    pub max_notes_per_onset: usize,
}

impl Default for ConstraintParams {
    fn default() -> Self {
        Self {
            pitch_lo: 48,
            pitch_hi: 95,
            max_note_dur_s: 1.0,
            tremolo_rate: 10.0,
            tremolo_strike_dur_ms: 50.0,
            stagger_ms: 11.0,
            run_interval_ms: 150.0,
            run_semitones: 3,
            min_note_dist_ms: 50.0,
            max_notes_per_onset: 4,
        }
    }
}

/// Run the full pipeline in canonical order.
pub fn apply(notes: Vec<NoteEvent>, params: &ConstraintParams) -> Vec<NoteEvent> {
    let started = Instant::now();

    let notes = octave_fold(&notes, params.pitch_lo, params.pitch_hi);
    let notes = expand_tremolo(
        &notes,
        params.max_note_dur_s,
        params.tremolo_rate,
        params.tremolo_strike_dur_ms,
    );
    let notes = stagger_chords(&notes, params.stagger_ms);
    let notes = nudge_runs(&notes, params.run_interval_ms, params.run_semitones);
    let notes = filter_notes(&notes, params.min_note_dist_ms, params.max_notes_per_onset);

    debug!(
        "constraint pipeline: {} notes out in {:.3} ms",
        notes.len(),
        started.elapsed().as_secs_f64() * 1e3
    );
    notes
}

/// Shift out-of-range pitches by octaves until they land in `[lo, hi]`.
/// Order and count are preserved.
pub fn octave_fold(notes: &[NoteEvent], lo: u8, hi: u8) -> Vec<NoteEvent> {
    notes
        .iter()
        .map(|n| {
            let mut p = n.pitch as i16;
            while p < lo as i16 {
                p += 12;
            }
            while p > hi as i16 {
                p -= 12;
            }
            NoteEvent {
                pitch: p as u8,
                ..*n
            }
        })
        .collect()
}

/// Replace notes longer than `max_dur_s` with repeated rapid strikes.
///
/// A note of duration `d` becomes `floor(d * rate)` strikes of
/// `strike_dur_ms`, spaced `1/rate` apart from the original onset. The
/// result is re-sorted so strikes interleave with unrelated notes.
pub fn expand_tremolo(
    notes: &[NoteEvent],
    max_dur_s: f64,
    rate: f64,
    strike_dur_ms: f64,
) -> Vec<NoteEvent> {
    let interval = 1.0 / rate;
    let strike_dur = strike_dur_ms / 1000.0;
    let mut result = Vec::with_capacity(notes.len());

    for n in notes {
        if n.duration <= max_dur_s {
            result.push(*n);
        } else {
            let strikes = (n.duration * rate) as usize;
            for i in 0..strikes {
                result.push(NoteEvent {
                    onset: n.onset + i as f64 * interval,
                    duration: strike_dur,
                    ..*n
                });
            }
        }
    }

    result.sort_by(|a, b| a.onset.total_cmp(&b.onset));
    result
}

/// Spread chord members apart so the arms do not all strike at once.
///
/// The first note of an onset group keeps its time; each further member is
/// delayed by an additional `stagger_ms`. A new group starts once an onset
/// drifts at least the chord tolerance away from the group's reference.
pub fn stagger_chords(notes: &[NoteEvent], stagger_ms: f64) -> Vec<NoteEvent> {
    let Some(first) = notes.first() else {
        return Vec::new();
    };

    let stagger = stagger_ms / 1000.0;
    let mut result = Vec::with_capacity(notes.len());
    let mut group_onset = first.onset;
    let mut count = 0usize;

    for n in notes {
        if (n.onset - group_onset).abs() < CHORD_TOLERANCE {
            result.push(NoteEvent {
                onset: n.onset + count as f64 * stagger,
                ..*n
            });
            count += 1;
        } else {
            group_onset = n.onset;
            count = 1;
            result.push(*n);
        }
    }

    result
}

/// Collapse fast close-pitched runs onto one bar.
///
/// Each note is compared against the already-transformed previous output:
/// a sequential note (gap above the chord tolerance but under
/// `max_interval_ms`) within `max_semitones` takes the previous note's
/// pitch, so the arm strikes in place instead of travelling. Because the
/// comparison chains, a whole run collapses onto its starting pitch.
pub fn nudge_runs(notes: &[NoteEvent], max_interval_ms: f64, max_semitones: u8) -> Vec<NoteEvent> {
    if notes.len() < 2 {
        return notes.to_vec();
    }

    let max_interval = max_interval_ms / 1000.0;
    let mut result = Vec::with_capacity(notes.len());
    result.push(notes[0]);
    let mut prev_onset = notes[0].onset;
    let mut prev_pitch = notes[0].pitch;

    for n in &notes[1..] {
        let gap = n.onset - prev_onset;
        let distance = (n.pitch as i16 - prev_pitch as i16).abs();
        let pitch = if gap > CHORD_TOLERANCE
            && gap < max_interval
            && distance > 0
            && distance <= max_semitones as i16
        {
            prev_pitch
        } else {
            n.pitch
        };
        result.push(NoteEvent { pitch, ..*n });
        prev_onset = n.onset;
        prev_pitch = pitch;
    }

    result
}

/// Drop notes the mechanism cannot land: onsets closer than
/// `min_note_dist_ms` to the last kept note, and chord members beyond
/// `max_per_onset`. The first note is always kept.
pub fn filter_notes(notes: &[NoteEvent], min_note_dist_ms: f64, max_per_onset: usize) -> Vec<NoteEvent> {
    let Some(first) = notes.first() else {
        return Vec::new();
    };

    let min_dist = min_note_dist_ms / 1000.0;
    let mut kept = Vec::with_capacity(notes.len());
    kept.push(*first);
    let mut last_onset = first.onset;
    let mut same_onset = 0usize;

    for n in &notes[1..] {
        let gap = (n.onset - last_onset).abs();
        if gap < CHORD_TOLERANCE {
            if same_onset >= max_per_onset - 1 {
                continue;
            }
            same_onset += 1;
        } else if gap < min_dist {
            continue;
        } else {
            same_onset = 0;
        }
        kept.push(*n);
        last_onset = n.onset;
    }

    kept
}
