use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::events::{GENERATED_VELOCITY, NoteEvent, OutMessage, ScheduleEntry, output_channel};

/// Anything that can deliver an outbound message. The OSC client implements
/// this; tests use a capture sink.
pub trait MessageSink {
    fn deliver(&self, message: &OutMessage);
}

/// Turn window-relative notes into a delivery-ordered message schedule.
///
/// Each note becomes a note-on at `play_start + (onset - win_start)` and a
/// note-off one duration later. The sort is stable, so a note-on always
/// precedes its note-off even at zero duration.
pub fn to_schedule(notes: &[NoteEvent], play_start: Instant, win_start: f64) -> Vec<ScheduleEntry> {
    let mut entries = Vec::with_capacity(notes.len() * 2);

    for n in notes {
        let channel = output_channel(n.instrument);
        let offset = n.onset - win_start;
        entries.push(ScheduleEntry {
            deliver_at: offset_from(play_start, offset),
            message: OutMessage::NoteOn {
                pitch: n.pitch,
                velocity: GENERATED_VELOCITY,
                channel,
            },
        });
        entries.push(ScheduleEntry {
            deliver_at: offset_from(play_start, offset + n.duration),
            message: OutMessage::NoteOff {
                pitch: n.pitch,
                channel,
            },
        });
    }

    entries.sort_by_key(|e| e.deliver_at);
    entries
}

fn offset_from(start: Instant, seconds: f64) -> Instant {
    start + Duration::from_secs_f64(seconds.max(0.0))
}

/// Deliver a schedule in order, sleeping until each entry is due.
///
/// Entries already past due are sent immediately; under overload this
/// accepts additive drift rather than dropping notes. When `abort` is
/// raised the remaining entries are skipped, except note-offs for notes
/// already struck, so nothing is left ringing.
pub fn dispatch(schedule: &[ScheduleEntry], sink: &dyn MessageSink, abort: &AtomicBool) {
    debug!("playback: dispatching {} messages", schedule.len());
    let mut open: Vec<(u8, u8)> = Vec::new();

    for (i, entry) in schedule.iter().enumerate() {
        if abort.load(Ordering::Relaxed) {
            debug!(
                "playback: abandoned with {} messages left",
                schedule.len() - i
            );
            flush_open(&schedule[i..], &mut open, sink);
            return;
        }

        let now = Instant::now();
        if entry.deliver_at > now {
            thread::sleep(entry.deliver_at.duration_since(now));
        }

        match &entry.message {
            OutMessage::NoteOn { pitch, channel, .. } => open.push((*pitch, *channel)),
            OutMessage::NoteOff { pitch, channel } => {
                if let Some(pos) = open.iter().position(|&(p, c)| p == *pitch && c == *channel) {
                    open.swap_remove(pos);
                }
            }
            OutMessage::Status(_) => {}
        }
        sink.deliver(&entry.message);
    }
    debug!("playback: done");
}

fn flush_open(remaining: &[ScheduleEntry], open: &mut Vec<(u8, u8)>, sink: &dyn MessageSink) {
    for entry in remaining {
        if open.is_empty() {
            return;
        }
        if let OutMessage::NoteOff { pitch, channel } = &entry.message {
            if let Some(pos) = open.iter().position(|&(p, c)| p == *pitch && c == *channel) {
                open.swap_remove(pos);
                sink.deliver(&entry.message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CaptureSink(Mutex<Vec<OutMessage>>);

    impl CaptureSink {
        fn new() -> Self {
            Self(Mutex::new(Vec::new()))
        }

        fn messages(&self) -> Vec<OutMessage> {
            self.0.lock().unwrap().clone()
        }
    }

    impl MessageSink for CaptureSink {
        fn deliver(&self, message: &OutMessage) {
            self.0.lock().unwrap().push(message.clone());
        }
    }

    fn past_instant() -> Instant {
        Instant::now()
            .checked_sub(Duration::from_secs(5))
            .unwrap_or_else(Instant::now)
    }

    #[test]
    fn schedule_is_ordered_with_on_before_off() {
        let play_start = Instant::now();
        let notes = vec![
            NoteEvent::new(6.5, 0.5, 60, 0),
            NoteEvent::new(6.0, 0.0, 64, 0), // zero duration: on and off tie
        ];
        let schedule = to_schedule(&notes, play_start, 6.0);
        assert_eq!(schedule.len(), 4);
        assert!(
            schedule
                .windows(2)
                .all(|w| w[0].deliver_at <= w[1].deliver_at)
        );
        assert!(matches!(
            schedule[0].message,
            OutMessage::NoteOn { pitch: 64, .. }
        ));
        assert!(matches!(
            schedule[1].message,
            OutMessage::NoteOff { pitch: 64, .. }
        ));
    }

    #[test]
    fn negative_offsets_are_clamped_to_play_start() {
        let play_start = Instant::now();
        let schedule = to_schedule(&[NoteEvent::new(5.0, 0.2, 60, 0)], play_start, 6.0);
        assert_eq!(schedule[0].deliver_at, play_start);
    }

    #[test]
    fn late_entries_are_sent_immediately_not_dropped() {
        let schedule = to_schedule(
            &[
                NoteEvent::new(0.0, 0.1, 60, 0),
                NoteEvent::new(0.2, 0.1, 64, 2),
            ],
            past_instant(),
            0.0,
        );
        let sink = CaptureSink::new();
        let started = Instant::now();
        dispatch(&schedule, &sink, &AtomicBool::new(false));
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(sink.messages().len(), 4);
    }

    #[test]
    fn every_note_on_has_a_matching_later_note_off() {
        let notes = vec![
            NoteEvent::new(0.0, 0.3, 60, 0),
            NoteEvent::new(0.1, 0.1, 60, 1),
            NoteEvent::new(0.2, 0.5, 72, 0),
        ];
        let schedule = to_schedule(&notes, past_instant(), 0.0);
        let sink = CaptureSink::new();
        dispatch(&schedule, &sink, &AtomicBool::new(false));

        let mut sounding: Vec<(u8, u8)> = Vec::new();
        for message in sink.messages() {
            match message {
                OutMessage::NoteOn { pitch, channel, .. } => sounding.push((pitch, channel)),
                OutMessage::NoteOff { pitch, channel } => {
                    let pos = sounding
                        .iter()
                        .position(|&(p, c)| p == pitch && c == channel)
                        .expect("note-off without a preceding note-on");
                    sounding.remove(pos);
                }
                OutMessage::Status(_) => {}
            }
        }
        assert!(sounding.is_empty());
    }

    #[test]
    fn abort_skips_everything_when_nothing_is_sounding() {
        let schedule = to_schedule(&[NoteEvent::new(0.0, 0.1, 60, 0)], past_instant(), 0.0);
        let sink = CaptureSink::new();
        let abort = AtomicBool::new(true);
        dispatch(&schedule, &sink, &abort);
        assert!(sink.messages().is_empty());
    }
}
