use std::collections::HashMap;
use std::time::Instant;

use crossbeam::channel::{Receiver, Sender};

use crate::events::NoteEvent;

/// Shortest note the store will record, in seconds.
pub const MIN_NOTE_DURATION: f64 = 0.05;

/// Captured state of one performance epoch.
///
/// Not shared directly: `spawn_buffer` moves a `NoteStore` onto its own
/// owner thread and hands back a [`BufferHandle`]. All operations take an
/// explicit `now` so tests can drive the clock.
#[derive(Debug, Default)]
pub struct NoteStore {
    // pitch -> (session-relative onset, velocity)
    pending: HashMap<u8, (f64, u8)>,
    done: Vec<NoteEvent>,
    t0: Option<Instant>,
}

impl NoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new epoch. Anything captured before is discarded.
    pub fn start(&mut self, now: Instant) {
        self.pending.clear();
        self.done.clear();
        self.t0 = Some(now);
    }

    /// Record a note-on (`velocity > 0`) or note-off (`velocity == 0`).
    ///
    /// Events before the first `start` are dropped. A second note-on for a
    /// pitch already held overwrites the earlier onset (last-on-wins, like a
    /// real keyboard). A note-off for an unopened pitch is ignored.
    pub fn note_event(&mut self, pitch: u8, velocity: u8, instrument: u8, now: Instant) {
        let Some(t0) = self.t0 else {
            return;
        };
        let t = now.duration_since(t0).as_secs_f64();
        if velocity > 0 {
            self.pending.insert(pitch, (t, velocity));
        } else if let Some((on_t, _)) = self.pending.remove(&pitch) {
            let duration = (t - on_t).max(MIN_NOTE_DURATION);
            self.done.push(NoteEvent::new(on_t, duration, pitch, instrument));
        }
    }

    /// Completed notes with onset in `[start, end)`, shifted to
    /// window-relative time. Notes still held at the boundary are closed at
    /// `end` for this query only; the pending set is left untouched so their
    /// real note-off can still land later.
    pub fn collect_window(&self, start: f64, end: f64) -> Vec<NoteEvent> {
        let mut notes: Vec<NoteEvent> = self
            .done
            .iter()
            .filter(|n| n.onset >= start && n.onset < end)
            .map(|n| NoteEvent {
                onset: n.onset - start,
                ..*n
            })
            .collect();

        for (&pitch, &(on_t, _)) in &self.pending {
            if on_t >= start && on_t < end {
                let duration = (end - on_t).max(MIN_NOTE_DURATION);
                notes.push(NoteEvent::new(on_t - start, duration, pitch, 0));
            }
        }

        notes
    }

    /// Seconds since the epoch started, or 0 if none is active.
    pub fn elapsed(&self, now: Instant) -> f64 {
        self.t0
            .map_or(0.0, |t0| now.duration_since(t0).as_secs_f64())
    }
}

enum BufferRequest {
    Start,
    NoteEvent {
        pitch: u8,
        velocity: u8,
        instrument: u8,
    },
    CollectWindow {
        start: f64,
        end: f64,
        reply: Sender<Vec<NoteEvent>>,
    },
    Elapsed {
        reply: Sender<f64>,
    },
}

/// Channel-backed handle to the buffer owner thread. Cloneable; the
/// listener and the generation loop both talk to the same owner, so no lock
/// is needed anywhere.
#[derive(Clone)]
pub struct BufferHandle {
    tx: Sender<BufferRequest>,
}

pub fn spawn_buffer() -> BufferHandle {
    let (tx, rx) = crossbeam::channel::unbounded();
    std::thread::spawn(move || buffer_thread(rx));
    BufferHandle { tx }
}

fn buffer_thread(rx: Receiver<BufferRequest>) {
    let mut store = NoteStore::new();
    while let Ok(request) = rx.recv() {
        match request {
            BufferRequest::Start => store.start(Instant::now()),
            BufferRequest::NoteEvent {
                pitch,
                velocity,
                instrument,
            } => store.note_event(pitch, velocity, instrument, Instant::now()),
            BufferRequest::CollectWindow { start, end, reply } => {
                let _ = reply.send(store.collect_window(start, end));
            }
            BufferRequest::Elapsed { reply } => {
                let _ = reply.send(store.elapsed(Instant::now()));
            }
        }
    }
}

impl BufferHandle {
    pub fn start(&self) {
        let _ = self.tx.send(BufferRequest::Start);
    }

    pub fn note_event(&self, pitch: u8, velocity: u8, instrument: u8) {
        let _ = self.tx.send(BufferRequest::NoteEvent {
            pitch,
            velocity,
            instrument,
        });
    }

    pub fn collect_window(&self, start: f64, end: f64) -> Vec<NoteEvent> {
        let (reply, rx) = crossbeam::channel::bounded(1);
        if self
            .tx
            .send(BufferRequest::CollectWindow { start, end, reply })
            .is_err()
        {
            return Vec::new();
        }
        rx.recv().unwrap_or_default()
    }

    pub fn elapsed(&self) -> f64 {
        let (reply, rx) = crossbeam::channel::bounded(1);
        if self.tx.send(BufferRequest::Elapsed { reply }).is_err() {
            return 0.0;
        }
        rx.recv().unwrap_or(0.0)
    }
}
