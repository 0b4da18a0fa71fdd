//! Protocol module - JSON message types for the table transport
//!
//! Line-delimited JSON. Every message has `type`, `seq` (per-sender sequence
//! number) and `ts` (milliseconds since the epoch).

use serde::{Deserialize, Serialize};

use crate::engine::{CommandError, Envelope};
use crate::types::{InputAction, PlayerId, RoomId, SeatNumber, TableId, Visibility};

pub const PROTOCOL_VERSION: &str = "1.0.0";

// ============== Client -> Server Messages ==============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HelloType {
    #[default]
    #[serde(rename = "hello")]
    Hello,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandType {
    #[default]
    #[serde(rename = "command")]
    Command,
}

/// First message on a connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloMessage {
    #[serde(rename = "type", default)]
    pub msg_type: HelloType,
    pub seq: u64,
    pub ts: u64,
    pub client: ClientInfo,
    pub protocol_version: String,
    /// Resume as an existing player; a new one is registered otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<PlayerId>,
    /// Display name for a newly registered player (defaults to the client name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Lobby, seat and gameplay commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Command {
    CreateRoom {
        name: String,
    },
    PlayNow {
        room: RoomId,
    },
    CreateTable {
        room: RoomId,
        #[serde(default)]
        visibility: Visibility,
        #[serde(default)]
        rated: bool,
    },
    JoinTable {
        table: TableId,
    },
    LeaveTable,
    Sit {
        seat: SeatNumber,
    },
    Stand,
    Ready {
        ready: bool,
    },
    Invite {
        player: PlayerId,
    },
    Boot {
        player: PlayerId,
    },
    Settings {
        #[serde(default)]
        visibility: Option<Visibility>,
        #[serde(default)]
        rated: Option<bool>,
    },
    Input {
        action: InputAction,
    },
    UsePower {
        target: SeatNumber,
    },
    /// Satisfies a `fadeRequested` event for the loop at `seat`
    FadeAck {
        seat: SeatNumber,
        nonce: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandMessage {
    #[serde(rename = "type", default)]
    pub msg_type: CommandType,
    pub seq: u64,
    pub ts: u64,
    #[serde(flatten)]
    pub command: Command,
}

// ============== Server -> Client Messages ==============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WelcomeType {
    #[serde(rename = "welcome")]
    Welcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AckType {
    #[serde(rename = "ack")]
    Ack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorType {
    #[serde(rename = "error")]
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "event")]
    Event,
}

/// Transport-level failures; command failures use [`CommandError::error_code`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    HandshakeRequired,
    ProtocolMismatch,
    InvalidCommand,
    OutOfOrder,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::HandshakeRequired => "handshake_required",
            ErrorCode::ProtocolMismatch => "protocol_mismatch",
            ErrorCode::InvalidCommand => "invalid_command",
            ErrorCode::OutOfOrder => "out_of_order",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WelcomeMessage {
    #[serde(rename = "type")]
    pub msg_type: WelcomeType,
    pub seq: u64,
    pub ts: u64,
    pub protocol_version: String,
    pub player: PlayerId,
    pub name: String,
    pub rating: i32,
    pub rooms: Vec<RoomId>,
}

/// Successful command; carries whatever the command produced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<TableId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seat: Option<SeatNumber>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckMessage {
    #[serde(rename = "type")]
    pub msg_type: AckType,
    pub seq: u64,
    pub ts: u64,
    /// `seq` of the command being acknowledged
    pub command_seq: u64,
    #[serde(flatten)]
    pub payload: AckPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMessage {
    #[serde(rename = "type")]
    pub msg_type: ErrorType,
    pub seq: u64,
    pub ts: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_seq: Option<u64>,
    pub code: String,
    pub message: String,
}

/// A bus event forwarded to the client
#[derive(Debug, Clone, Serialize)]
pub struct EventMessage<'a> {
    #[serde(rename = "type")]
    pub msg_type: EventType,
    pub seq: u64,
    pub ts: u64,
    #[serde(flatten)]
    pub envelope: &'a Envelope,
}

// ============== Message Parsing ==============

/// Parsed incoming message
#[derive(Debug, Clone)]
pub enum ParsedMessage {
    Hello(HelloMessage),
    Command(CommandMessage),
    Unknown(UnknownMessage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownMessage {
    pub seq: u64,
}

/// Parse a JSON message from a string
pub fn parse_message(json: &str) -> Result<ParsedMessage, serde_json::Error> {
    #[derive(Debug, Deserialize)]
    #[serde(tag = "type")]
    enum InboundMessage {
        #[serde(rename = "hello")]
        Hello(HelloMessage),
        #[serde(rename = "command")]
        Command(CommandMessage),
    }

    match serde_json::from_str::<InboundMessage>(json) {
        Ok(InboundMessage::Hello(m)) => Ok(ParsedMessage::Hello(m)),
        Ok(InboundMessage::Command(m)) => Ok(ParsedMessage::Command(m)),
        Err(e) => {
            // Unknown message types are reported, not treated as parse errors
            #[derive(Debug, Deserialize)]
            struct Peek<'a> {
                #[serde(rename = "type")]
                msg_type: Option<&'a str>,
                seq: Option<u64>,
            }
            let peek = serde_json::from_str::<Peek>(json)?;
            match peek.msg_type {
                Some("hello") | Some("command") => Err(e),
                _ => Ok(ParsedMessage::Unknown(UnknownMessage {
                    seq: peek.seq.unwrap_or(0),
                })),
            }
        }
    }
}

/// Whether a client's protocol version is compatible (same major)
pub fn version_compatible(client: &str) -> bool {
    let major = |v: &str| v.split('.').next().map(str::to_string);
    major(client).is_some() && major(client) == major(PROTOCOL_VERSION)
}

// ============== Utility Functions ==============

pub fn create_hello(seq: u64, client_name: &str, player: Option<PlayerId>) -> HelloMessage {
    HelloMessage {
        msg_type: HelloType::Hello,
        seq,
        ts: current_timestamp_ms(),
        client: ClientInfo {
            name: client_name.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        protocol_version: PROTOCOL_VERSION.to_string(),
        player,
        name: None,
    }
}

pub fn create_command(seq: u64, command: Command) -> CommandMessage {
    CommandMessage {
        msg_type: CommandType::Command,
        seq,
        ts: current_timestamp_ms(),
        command,
    }
}

pub fn create_welcome(
    seq: u64,
    player: PlayerId,
    name: &str,
    rating: i32,
    rooms: Vec<RoomId>,
) -> WelcomeMessage {
    WelcomeMessage {
        msg_type: WelcomeType::Welcome,
        seq,
        ts: current_timestamp_ms(),
        protocol_version: PROTOCOL_VERSION.to_string(),
        player,
        name: name.to_string(),
        rating,
        rooms,
    }
}

pub fn create_ack(seq: u64, command_seq: u64, payload: AckPayload) -> AckMessage {
    AckMessage {
        msg_type: AckType::Ack,
        seq,
        ts: current_timestamp_ms(),
        command_seq,
        payload,
    }
}

pub fn create_error(seq: u64, command_seq: Option<u64>, code: &str, message: &str) -> ErrorMessage {
    ErrorMessage {
        msg_type: ErrorType::Error,
        seq,
        ts: current_timestamp_ms(),
        command_seq,
        code: code.to_string(),
        message: message.to_string(),
    }
}

pub fn create_command_error(seq: u64, command_seq: u64, err: &CommandError) -> ErrorMessage {
    create_error(seq, Some(command_seq), err.error_code(), &err.to_string())
}

pub fn create_event(seq: u64, envelope: &Envelope) -> EventMessage<'_> {
    EventMessage {
        msg_type: EventType::Event,
        seq,
        ts: current_timestamp_ms(),
        envelope,
    }
}

/// Get current timestamp in milliseconds
pub fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flat_command() {
        let line = r#"{"type":"command","seq":4,"ts":0,"op":"sit","seat":3}"#;
        match parse_message(line).unwrap() {
            ParsedMessage::Command(m) => {
                assert_eq!(m.seq, 4);
                assert_eq!(
                    m.command,
                    Command::Sit {
                        seat: SeatNumber::new(3).unwrap()
                    }
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_input_and_unit_commands() {
        let line = r#"{"type":"command","seq":5,"ts":0,"op":"input","action":"moveLeft"}"#;
        assert!(matches!(
            parse_message(line).unwrap(),
            ParsedMessage::Command(CommandMessage {
                command: Command::Input {
                    action: InputAction::MoveLeft
                },
                ..
            })
        ));

        let line = r#"{"type":"command","seq":6,"ts":0,"op":"stand"}"#;
        assert!(matches!(
            parse_message(line).unwrap(),
            ParsedMessage::Command(CommandMessage {
                command: Command::Stand,
                ..
            })
        ));
    }

    #[test]
    fn test_unknown_type_is_not_an_error() {
        let parsed = parse_message(r#"{"type":"ping","seq":9}"#).unwrap();
        assert!(matches!(parsed, ParsedMessage::Unknown(UnknownMessage { seq: 9 })));
    }

    #[test]
    fn test_bad_seat_is_a_parse_error() {
        let line = r#"{"type":"command","seq":1,"ts":0,"op":"sit","seat":9}"#;
        assert!(parse_message(line).is_err());
    }

    #[test]
    fn test_client_helpers_parse_back() {
        let line = serde_json::to_string(&create_hello(1, "bot", Some(PlayerId(4)))).unwrap();
        match parse_message(&line).unwrap() {
            ParsedMessage::Hello(m) => assert_eq!(m.player, Some(PlayerId(4))),
            other => panic!("unexpected {:?}", other),
        }

        let line = serde_json::to_string(&create_command(2, Command::LeaveTable)).unwrap();
        assert!(matches!(
            parse_message(&line).unwrap(),
            ParsedMessage::Command(CommandMessage {
                command: Command::LeaveTable,
                ..
            })
        ));
    }

    #[test]
    fn test_version_compatibility() {
        assert!(version_compatible("1.4.2"));
        assert!(!version_compatible("2.0.0"));
        assert!(!version_compatible(""));
    }

    #[test]
    fn test_ack_payload_is_flattened() {
        let ack = create_ack(
            2,
            1,
            AckPayload {
                table: Some(TableId(7)),
                ..AckPayload::default()
            },
        );
        let value: serde_json::Value = serde_json::to_value(&ack).unwrap();
        assert_eq!(value["type"], "ack");
        assert_eq!(value["command_seq"], 1);
        assert_eq!(value["table"], 7);
        assert!(value.get("seat").is_none());
    }
}
