//! OSC edge of the server.
//!
//! Inbound (listen port):
//!   /note                 pitch velocity   -- velocity 0 means note-off
//!   /control/start
//!   /control/stop
//!   /control/window_size  float seconds
//!   /control/top_p        float
//!   /control/temperature  float
//!   /control/test         -- fire the return-path arpeggio
//!
//! Outbound (client port):
//!   /gen/noteon   pitch velocity channel
//!   /gen/noteoff  pitch channel
//!   /gen/status   string

use std::net::{SocketAddr, UdpSocket};

use crossbeam::channel::Sender;
use rosc::{OscMessage, OscPacket, OscType, decoder, encoder};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::events::OutMessage;
use crate::schedule::MessageSink;

#[derive(Debug, Error)]
pub enum OscError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("OSC encoding error: {0}")]
    Encode(#[from] rosc::OscError),
}

/// Parsed inbound protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Stop,
    Note { pitch: u8, velocity: u8 },
    SetWindowSize(f64),
    SetTopP(f64),
    SetTemperature(f64),
    Test,
}

/// UDP sender for generated notes and status lines.
#[derive(Debug)]
pub struct OscClient {
    socket: UdpSocket,
    target: SocketAddr,
}

impl OscClient {
    pub fn connect(target: SocketAddr) -> Result<Self, OscError> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        Ok(Self { socket, target })
    }

    pub fn try_clone(&self) -> Result<Self, OscError> {
        Ok(Self {
            socket: self.socket.try_clone()?,
            target: self.target,
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn send(&self, message: &OutMessage) -> Result<(), OscError> {
        let bytes = encoder::encode(&OscPacket::Message(to_osc(message)))?;
        self.socket.send_to(&bytes, self.target)?;
        Ok(())
    }
}

impl MessageSink for OscClient {
    fn deliver(&self, message: &OutMessage) {
        if let Err(e) = self.send(message) {
            error!("OSC send to {} failed: {e}", self.target);
        }
    }
}

fn to_osc(message: &OutMessage) -> OscMessage {
    match message {
        OutMessage::NoteOn {
            pitch,
            velocity,
            channel,
        } => OscMessage {
            addr: "/gen/noteon".to_string(),
            args: vec![
                OscType::Int(*pitch as i32),
                OscType::Int(*velocity as i32),
                OscType::Int(*channel as i32),
            ],
        },
        OutMessage::NoteOff { pitch, channel } => OscMessage {
            addr: "/gen/noteoff".to_string(),
            args: vec![OscType::Int(*pitch as i32), OscType::Int(*channel as i32)],
        },
        OutMessage::Status(text) => OscMessage {
            addr: "/gen/status".to_string(),
            args: vec![OscType::String(text.clone())],
        },
    }
}

/// Run the inbound listener on the current thread. Returns once the
/// controller side of the channel goes away.
pub fn listen(socket: UdpSocket, commands: Sender<Command>) {
    let mut buf = [0u8; decoder::MTU];
    let mut parsed = Vec::new();

    loop {
        let len = match socket.recv_from(&mut buf) {
            Ok((len, _peer)) => len,
            Err(e) => {
                error!("OSC recv failed: {e}");
                continue;
            }
        };
        let packet = match decoder::decode_udp(&buf[..len]) {
            Ok((_rest, packet)) => packet,
            Err(e) => {
                warn!("undecodable OSC packet ({len} bytes): {e}");
                continue;
            }
        };
        parsed.clear();
        parse_packet(packet, &mut parsed);
        for command in parsed.drain(..) {
            if commands.send(command).is_err() {
                return;
            }
        }
    }
}

/// Same loop on its own thread, for embedding.
pub fn spawn_listener(socket: UdpSocket, commands: Sender<Command>) {
    std::thread::spawn(move || listen(socket, commands));
}

/// Flatten a packet (bundles included) into commands. Unknown addresses and
/// malformed argument lists are logged and dropped, never errors.
pub fn parse_packet(packet: OscPacket, out: &mut Vec<Command>) {
    match packet {
        OscPacket::Message(message) => {
            if let Some(command) = parse_message(&message) {
                out.push(command);
            }
        }
        OscPacket::Bundle(bundle) => {
            for inner in bundle.content {
                parse_packet(inner, out);
            }
        }
    }
}

fn parse_message(message: &OscMessage) -> Option<Command> {
    match message.addr.as_str() {
        "/note" => {
            let pitch = message.args.first().and_then(as_int);
            let velocity = message.args.get(1).and_then(as_int);
            let (Some(pitch), Some(velocity)) = (pitch, velocity) else {
                warn!("malformed /note message: {:?}", message.args);
                return None;
            };
            Some(Command::Note {
                pitch: pitch.clamp(0, 127) as u8,
                velocity: velocity.clamp(0, 127) as u8,
            })
        }
        "/control/start" => Some(Command::Start),
        "/control/stop" => Some(Command::Stop),
        "/control/test" => Some(Command::Test),
        "/control/window_size" => parse_scalar(message, Command::SetWindowSize),
        "/control/top_p" => parse_scalar(message, Command::SetTopP),
        "/control/temperature" => parse_scalar(message, Command::SetTemperature),
        other => {
            debug!("ignoring OSC message {other} {:?}", message.args);
            None
        }
    }
}

fn parse_scalar(message: &OscMessage, build: fn(f64) -> Command) -> Option<Command> {
    match message.args.first().and_then(as_float) {
        Some(value) => Some(build(value)),
        None => {
            warn!("malformed {} message: {:?}", message.addr, message.args);
            None
        }
    }
}

// Senders disagree on numeric OSC types; accept any of them.
fn as_int(arg: &OscType) -> Option<i32> {
    match arg {
        OscType::Int(v) => Some(*v),
        OscType::Long(v) => Some(*v as i32),
        OscType::Float(v) => Some(*v as i32),
        OscType::Double(v) => Some(*v as i32),
        _ => None,
    }
}

fn as_float(arg: &OscType) -> Option<f64> {
    match arg {
        OscType::Int(v) => Some(*v as f64),
        OscType::Long(v) => Some(*v as f64),
        OscType::Float(v) => Some(*v as f64),
        OscType::Double(v) => Some(*v),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(addr: &str, args: Vec<OscType>) -> OscPacket {
        OscPacket::Message(OscMessage {
            addr: addr.to_string(),
            args,
        })
    }

    fn parse_one(packet: OscPacket) -> Option<Command> {
        let mut out = Vec::new();
        parse_packet(packet, &mut out);
        out.pop()
    }

    #[test]
    fn parses_note_messages() {
        let cmd = parse_one(message(
            "/note",
            vec![OscType::Int(60), OscType::Int(100)],
        ));
        assert_eq!(
            cmd,
            Some(Command::Note {
                pitch: 60,
                velocity: 100
            })
        );
    }

    #[test]
    fn accepts_float_arguments_for_note() {
        let cmd = parse_one(message(
            "/note",
            vec![OscType::Float(60.0), OscType::Float(0.0)],
        ));
        assert_eq!(
            cmd,
            Some(Command::Note {
                pitch: 60,
                velocity: 0
            })
        );
    }

    #[test]
    fn parses_control_messages() {
        assert_eq!(parse_one(message("/control/start", vec![])), Some(Command::Start));
        assert_eq!(parse_one(message("/control/stop", vec![])), Some(Command::Stop));
        assert_eq!(
            parse_one(message("/control/window_size", vec![OscType::Float(4.0)])),
            Some(Command::SetWindowSize(4.0))
        );
        assert_eq!(
            parse_one(message("/control/top_p", vec![OscType::Double(0.9)])),
            Some(Command::SetTopP(0.9))
        );
        assert_eq!(
            parse_one(message("/control/temperature", vec![OscType::Int(1)])),
            Some(Command::SetTemperature(1.0))
        );
    }

    #[test]
    fn drops_unknown_and_malformed_messages() {
        assert_eq!(parse_one(message("/something/else", vec![])), None);
        assert_eq!(parse_one(message("/note", vec![OscType::Int(60)])), None);
        assert_eq!(
            parse_one(message("/note", vec![OscType::String("x".into()), OscType::Int(1)])),
            None
        );
        assert_eq!(parse_one(message("/control/window_size", vec![])), None);
    }

    #[test]
    fn flattens_bundles() {
        let bundle = OscPacket::Bundle(rosc::OscBundle {
            timetag: rosc::OscTime {
                seconds: 0,
                fractional: 0,
            },
            content: vec![
                message("/control/start", vec![]),
                message("/note", vec![OscType::Int(60), OscType::Int(100)]),
            ],
        });
        let mut out = Vec::new();
        parse_packet(bundle, &mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], Command::Start);
    }

    #[test]
    fn note_arguments_are_clamped_to_midi_range() {
        let cmd = parse_one(message(
            "/note",
            vec![OscType::Int(300), OscType::Int(-5)],
        ));
        assert_eq!(
            cmd,
            Some(Command::Note {
                pitch: 127,
                velocity: 0
            })
        );
    }
}
