//! Wire encodings for commands, replies and telemetry.
//!
//! The [`Codec`] trait is the seam between the generic link protocol and a particular vehicle
//! family. [`TextCodec`] speaks the plain-text SDK used by small consumer quadcopters:
//!
//! | Command | Wire |
//! |---|---|
//! | Connect | `command` |
//! | Takeoff / Land | `takeoff` / `land` |
//! | EmergencyStop | `emergency` |
//! | Move | `forward 50`, `back 50`, `left 50`, `right 50`, `up 50`, `down 50` |
//! | Rotate | `cw 90`, `ccw 90` |
//!
//! Values are whole units. A move or turn that rounds to zero is not sent, since the SDK rejects
//! it and the vehicle would not act on it anyway.
//!
//! Replies are `ok` or `error <detail>`. State datagrams are `key:value;` lists, of which `bat`
//! and `h` are read. When sequence tagging is enabled every command and reply is prefixed with
//! its decimal [`SequenceId`].

use bytes::Bytes;

use crate::command::{Command, MoveDirection, Reply, RotateDirection, SequenceId};
use crate::telemetry::TelemetryFrame;

/// A decoded inbound datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// An answer to a command. Untagged replies carry no sequence id.
    Reply {
        seq: Option<SequenceId>,
        reply: Reply,
    },
    Telemetry(TelemetryFrame),
    Unrecognized,
}

/// Outcome of encoding one command.
#[derive(Debug, Clone, PartialEq)]
pub enum Encoding {
    Datagram(Bytes),
    /// The command leaves the vehicle unchanged and is acknowledged without transmission.
    NoOp,
    /// The command has no wire representation.
    Unsupported,
}

/// Encoder/decoder capability for one vehicle family.
pub trait Codec: Send + Sync + 'static {
    fn encode(&self, seq: SequenceId, command: &Command) -> Encoding;

    fn decode(&self, datagram: &[u8]) -> Inbound;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextCodec {
    tag_sequence: bool,
}

impl TextCodec {
    /// The stock SDK dialect, without sequence tags.
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix every command with its sequence id, for vehicles that echo it in replies.
    pub fn tagged() -> Self {
        Self { tag_sequence: true }
    }

    pub fn is_tagged(&self) -> bool {
        self.tag_sequence
    }

    /// Vehicle side: parse a command datagram.
    pub fn decode_command(&self, datagram: &[u8]) -> Option<(Option<SequenceId>, Command)> {
        let text = std::str::from_utf8(datagram).ok()?.trim();
        let (seq, body) = split_tag(text);
        let mut words = body.split_whitespace();

        let command = match (words.next()?, words.next()) {
            ("command", None) => Command::Connect,
            ("takeoff", None) => Command::Takeoff,
            ("land", None) => Command::Land,
            ("emergency", None) => Command::EmergencyStop,
            ("cw", Some(value)) => Command::Rotate {
                direction: RotateDirection::Clockwise,
                degrees: value.parse().ok()?,
            },
            ("ccw", Some(value)) => Command::Rotate {
                direction: RotateDirection::CounterClockwise,
                degrees: value.parse().ok()?,
            },
            (word, Some(value)) => Command::Move {
                direction: move_direction(word)?,
                distance: value.parse().ok()?,
            },
            _ => return None,
        };

        if words.next().is_some() {
            return None;
        }
        Some((seq, command))
    }

    /// Vehicle side: encode a reply, echoing `seq` when present.
    pub fn encode_reply(seq: Option<SequenceId>, reply: &Reply) -> Bytes {
        let body = match reply {
            Reply::Ack => "ok".to_string(),
            Reply::Nack(reason) if reason.starts_with("error") => reason.clone(),
            Reply::Nack(reason) => format!("error {reason}"),
        };
        match seq {
            Some(seq) => Bytes::from(format!("{seq} {body}")),
            None => Bytes::from(body),
        }
    }

    /// Vehicle side: encode a state datagram with whichever fields are present.
    pub fn encode_state(frame: &TelemetryFrame) -> Bytes {
        let mut text = String::new();
        if let Some(battery_pct) = frame.battery_pct {
            text.push_str(&format!("bat:{battery_pct};"));
        }
        if let Some(height) = frame.height {
            text.push_str(&format!("h:{height};"));
        }
        text.push_str("\r\n");
        Bytes::from(text)
    }
}

impl Codec for TextCodec {
    fn encode(&self, seq: SequenceId, command: &Command) -> Encoding {
        let body = match command {
            Command::Connect => "command".to_string(),
            Command::Takeoff => "takeoff".to_string(),
            Command::Land => "land".to_string(),
            Command::EmergencyStop => "emergency".to_string(),
            Command::Disconnect => return Encoding::Unsupported,
            Command::Move {
                direction,
                distance,
            } => match whole_units(*distance) {
                0 => return Encoding::NoOp,
                units => format!("{} {units}", move_word(*direction)),
            },
            Command::Rotate { direction, degrees } => {
                let word = match direction {
                    RotateDirection::Clockwise => "cw",
                    RotateDirection::CounterClockwise => "ccw",
                };
                match whole_units(*degrees) {
                    0 => return Encoding::NoOp,
                    units => format!("{word} {units}"),
                }
            }
        };

        let text = if self.tag_sequence {
            format!("{seq} {body}")
        } else {
            body
        };
        Encoding::Datagram(Bytes::from(text))
    }

    fn decode(&self, datagram: &[u8]) -> Inbound {
        let Ok(text) = std::str::from_utf8(datagram) else {
            return Inbound::Unrecognized;
        };
        let text = text.trim();

        if text.contains(':') && text.contains(';') {
            return Inbound::Telemetry(parse_state(text));
        }

        let (seq, body) = split_tag(text);
        if body == "ok" {
            Inbound::Reply {
                seq,
                reply: Reply::Ack,
            }
        } else if body.starts_with("error") {
            Inbound::Reply {
                seq,
                reply: Reply::Nack(body.to_string()),
            }
        } else {
            Inbound::Unrecognized
        }
    }
}

fn whole_units(value: f64) -> i64 {
    value.round() as i64
}

/// Split a leading decimal sequence tag off `text`. A lone number is a value, not a tag.
fn split_tag(text: &str) -> (Option<SequenceId>, &str) {
    if let Some((head, rest)) = text.split_once(char::is_whitespace) {
        if let Ok(seq) = head.parse::<u32>() {
            return (Some(SequenceId(seq)), rest.trim_start());
        }
    }
    (None, text)
}

fn parse_state(text: &str) -> TelemetryFrame {
    let mut frame = TelemetryFrame::default();
    for (key, value) in text.split(';').filter_map(|field| field.split_once(':')) {
        match key.trim() {
            "bat" => frame.battery_pct = value.trim().parse().ok(),
            "h" => frame.height = value.trim().parse().ok(),
            _ => {}
        }
    }
    frame
}

fn move_word(direction: MoveDirection) -> &'static str {
    match direction {
        MoveDirection::Forward => "forward",
        MoveDirection::Back => "back",
        MoveDirection::Left => "left",
        MoveDirection::Right => "right",
        MoveDirection::Up => "up",
        MoveDirection::Down => "down",
    }
}

fn move_direction(word: &str) -> Option<MoveDirection> {
    Some(match word {
        "forward" => MoveDirection::Forward,
        "back" => MoveDirection::Back,
        "left" => MoveDirection::Left,
        "right" => MoveDirection::Right,
        "up" => MoveDirection::Up,
        "down" => MoveDirection::Down,
        _ => return None,
    })
}
