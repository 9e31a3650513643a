use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use crossbeam::channel::{Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::buffer::{BufferHandle, spawn_buffer};
use crate::config::{Config, StopPolicy};
use crate::constraints::{self, ConstraintParams};
use crate::events::{NoteEvent, OutMessage};
use crate::model::{GenerateRequest, Model};
use crate::osc::{Command, OscClient};
use crate::schedule;
use crate::tokens::{self, Framing};

/// Sampling and window settings the generation loop snapshots once per
/// cycle. Held in an `ArcSwap` so protocol handlers can swap them live
/// without racing the loop.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub window_size: f64,
    pub top_p: f64,
    pub temperature: f64,
}

pub struct SessionHandle {
    pub command_tx: Sender<Command>,
}

/// Start the session controller on its own thread.
pub fn spawn_session(config: Config, model: Arc<dyn Model>, client: OscClient) -> SessionHandle {
    let (command_tx, command_rx) = crossbeam::channel::unbounded();
    thread::spawn(move || session_thread(config, model, client, command_rx));
    SessionHandle { command_tx }
}

struct Session {
    config: Config,
    gen_config: Arc<ArcSwap<GenerationConfig>>,
    buffer: BufferHandle,
    model: Arc<dyn Model>,
    client: OscClient,
    /// Run flag of the current epoch's generation loop. Each epoch gets a
    /// fresh flag so a stale loop waking after stop/start cannot resume.
    running: Option<Arc<AtomicBool>>,
    playback_abort: Arc<AtomicBool>,
}

fn session_thread(
    config: Config,
    model: Arc<dyn Model>,
    client: OscClient,
    command_rx: Receiver<Command>,
) {
    let gen_config = Arc::new(ArcSwap::from_pointee(GenerationConfig {
        window_size: config.window_size,
        top_p: config.top_p,
        temperature: config.temperature,
    }));

    if config.startup_test {
        if let Ok(client) = client.try_clone() {
            thread::spawn(move || {
                thread::sleep(Duration::from_secs(2));
                info!("startup test: firing C major arpeggio to {}", client.target());
                play_arpeggio(&client);
            });
        }
    }

    let mut session = Session {
        config,
        gen_config,
        buffer: spawn_buffer(),
        model,
        client,
        running: None,
        playback_abort: Arc::new(AtomicBool::new(false)),
    };

    loop {
        match command_rx.recv() {
            Ok(Command::Start) => session.handle_start(),
            Ok(Command::Stop) => session.handle_stop(),
            Ok(Command::Note { pitch, velocity }) => session.handle_note(pitch, velocity),
            Ok(Command::SetWindowSize(value)) => session.set_window_size(value),
            Ok(Command::SetTopP(value)) => session.set_top_p(value),
            Ok(Command::SetTemperature(value)) => session.set_temperature(value),
            Ok(Command::Test) => session.handle_test(),
            Err(crossbeam::channel::RecvError) => break,
        }
    }
}

impl Session {
    fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    fn handle_start(&mut self) {
        if self.is_running() {
            info!("already running, ignoring start");
            return;
        }
        let client = match self.client.try_clone() {
            Ok(client) => client,
            Err(e) => {
                error!("cannot start session, socket clone failed: {e}");
                return;
            }
        };

        let running = Arc::new(AtomicBool::new(true));
        self.running = Some(running.clone());
        self.playback_abort.store(false, Ordering::Relaxed);
        self.buffer.start();

        let ctx = LoopContext {
            buffer: self.buffer.clone(),
            model: self.model.clone(),
            client,
            gen_config: self.gen_config.clone(),
            running,
            playback_abort: self.playback_abort.clone(),
            framing: self.config.framing,
            constraints: self
                .config
                .apply_constraints
                .then(|| self.config.constraints.clone()),
        };
        thread::spawn(move || generation_loop(ctx));

        self.send_status("session started");
        let snapshot = self.gen_config.load();
        info!(
            "session started  window={:.1}s  top_p={:.2}  temp={:.2}",
            snapshot.window_size, snapshot.top_p, snapshot.temperature
        );
    }

    fn handle_stop(&mut self) {
        if let Some(flag) = self.running.take() {
            flag.store(false, Ordering::Relaxed);
        }
        if self.config.stop_policy == StopPolicy::Abandon {
            self.playback_abort.store(true, Ordering::Relaxed);
        }
        self.send_status("session stopped");
        info!("session stopped");
    }

    fn handle_note(&mut self, pitch: u8, velocity: u8) {
        let label = if velocity > 0 { "on" } else { "off" };
        debug!("note {label}  pitch={pitch} vel={velocity}");
        if !self.is_running() && self.config.auto_start_on_note {
            info!("auto-starting session on first note");
            self.handle_start();
        }
        self.buffer
            .note_event(pitch, velocity, self.config.human_instrument);
    }

    fn handle_test(&self) {
        if let Ok(client) = self.client.try_clone() {
            info!("test: firing arpeggio to {}", client.target());
            thread::spawn(move || play_arpeggio(&client));
        }
    }

    fn set_window_size(&self, value: f64) {
        if !value.is_finite() || value <= 0.0 {
            warn!("ignoring invalid window_size {value}");
            return;
        }
        self.update_config(|c| c.window_size = value);
        info!("window_size -> {value:.2} s");
    }

    fn set_top_p(&self, value: f64) {
        self.update_config(|c| c.top_p = value);
        info!("top_p -> {value:.3}");
    }

    fn set_temperature(&self, value: f64) {
        self.update_config(|c| c.temperature = value);
        info!("temperature -> {value:.3}");
    }

    fn update_config(&self, mutate: impl FnOnce(&mut GenerationConfig)) {
        let mut next = (**self.gen_config.load()).clone();
        mutate(&mut next);
        self.gen_config.store(Arc::new(next));
    }

    fn send_status(&self, text: &str) {
        if let Err(e) = self.client.send(&OutMessage::Status(text.to_string())) {
            error!("status send failed: {e}");
        }
    }
}

/// Everything one epoch's generation loop needs, cloned out of the session
/// so the controller keeps serving commands while the loop runs.
struct LoopContext {
    buffer: BufferHandle,
    model: Arc<dyn Model>,
    client: OscClient,
    gen_config: Arc<ArcSwap<GenerationConfig>>,
    running: Arc<AtomicBool>,
    playback_abort: Arc<AtomicBool>,
    framing: Framing,
    constraints: Option<ConstraintParams>,
}

fn generation_loop(ctx: LoopContext) {
    let mut window_num = 0u64;

    loop {
        // snapshot once per cycle; live updates land on the next one
        let snapshot = ctx.gen_config.load_full();
        let window_size = snapshot.window_size;
        thread::sleep(Duration::from_secs_f64(window_size));
        if !ctx.running.load(Ordering::Relaxed) {
            break;
        }

        let win_end = ctx.buffer.elapsed();
        let win_start = win_end - window_size;
        info!("window {window_num}: collecting [{win_start:.1}, {win_end:.1}]s");
        let notes = ctx.buffer.collect_window(win_start, win_end);

        if notes.is_empty() {
            info!("window {window_num}: no human notes, skipping generation");
            window_num += 1;
            continue;
        }

        info!("window {window_num}: {} notes, generating", notes.len());
        log_prompt(&notes, window_size);

        let framed = ctx.framing.frame(&notes);
        let request = GenerateRequest {
            window_start: window_size,
            window_end: window_size * 2.0,
            prompt: framed.prompt,
            controls: framed.controls,
            top_p: snapshot.top_p,
            temperature: snapshot.temperature,
        };

        let gen_started = Instant::now();
        let events = match ctx.model.generate(&request) {
            Ok(events) => events,
            Err(e) => {
                error!("window {window_num}: generation failed: {e}");
                let _ = ctx.client.send(&OutMessage::Status(format!("error: {e}")));
                window_num += 1;
                continue;
            }
        };

        // keep only the new continuation window
        let mut decoded = tokens::clip(
            tokens::decode(&events),
            request.window_start,
            request.window_end,
        );
        info!(
            "window {window_num}: {} generated notes in {:.2}s",
            decoded.len(),
            gen_started.elapsed().as_secs_f64()
        );

        if let Some(params) = &ctx.constraints {
            decoded = constraints::apply(decoded, params);
        } else {
            debug!("constraint pipeline disabled, passing notes through");
        }

        let play_start = Instant::now();
        let playback = schedule::to_schedule(&decoded, play_start, request.window_start);
        match ctx.client.try_clone() {
            Ok(client) => {
                let abort = ctx.playback_abort.clone();
                thread::spawn(move || schedule::dispatch(&playback, &client, &abort));
            }
            Err(e) => error!("window {window_num}: playback socket clone failed: {e}"),
        }

        window_num += 1;
    }

    info!("generation loop stopped");
}

fn log_prompt(notes: &[NoteEvent], window_size: f64) {
    const NAMES: [&str; 12] = [
        "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
    ];
    let mut sorted = notes.to_vec();
    sorted.sort_by(|a, b| a.onset.total_cmp(&b.onset));
    for n in &sorted {
        let name = format!("{}{}", NAMES[(n.pitch % 12) as usize], (n.pitch / 12) as i32 - 1);
        info!(
            "  t={:5.2}s  dur={:.2}s  {name} (pitch={}  instr={})",
            n.onset, n.duration, n.pitch, n.instrument
        );
    }
    info!(
        "  {} notes -> continuation [{:.1}, {:.1}]s",
        sorted.len(),
        window_size,
        window_size * 2.0
    );
}

/// C major arpeggio on channel 2, the return-path smoke test.
fn play_arpeggio(client: &OscClient) {
    for pitch in [60u8, 64, 67, 72] {
        let _ = client.send(&OutMessage::NoteOn {
            pitch,
            velocity: 100,
            channel: 2,
        });
        thread::sleep(Duration::from_millis(250));
        let _ = client.send(&OutMessage::NoteOff { pitch, channel: 2 });
        thread::sleep(Duration::from_millis(50));
    }
}
