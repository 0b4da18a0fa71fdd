//! Adapter module - table transport over TCP with a JSON protocol
//!
//! Remote clients reach the lobby through a line-delimited JSON protocol.
//! Commands are mapped onto [`engine::Lobby`]; bus events for the client's
//! player and current table are streamed back.
//!
//! # Protocol Overview
//!
//! 1. **Connection**: client connects to the TCP socket (default: 127.0.0.1:7777)
//! 2. **Handshake**: client sends `hello`, server responds with `welcome`
//!    (registering a new player unless `player` names an existing one)
//! 3. **Commanding**: client sends `command` messages; each gets an `ack` or
//!    an `error` referencing its `seq`
//! 4. **Events**: the server pushes `event` messages as the table changes
//!
//! # Environment Variables
//!
//! - `BLOCKFALL_HOST`: bind address (default: "127.0.0.1")
//! - `BLOCKFALL_PORT`: port number (default: 7777)
//! - `BLOCKFALL_MAX_PENDING`: outbound lines buffered per client (default: 256)
//!
//! # Example Protocol Flow
//!
//! ```text
//! Client -> Server: {"type":"hello","seq":1,"ts":0,"client":{"name":"bot","version":"1.0.0"},"protocol_version":"1.0.0"}
//! Server -> Client: {"type":"welcome","seq":1,"ts":0,"protocol_version":"1.0.0","player":1,"name":"bot","rating":1200,"rooms":[1]}
//! Client -> Server: {"type":"command","seq":2,"ts":0,"op":"playNow","room":1}
//! Server -> Client: {"type":"ack","seq":2,"ts":0,"command_seq":2,"table":1,"seat":1}
//! Server -> Client: {"type":"event","seq":3,"ts":0,"topic":{"scope":"table","id":1},"event":"tableChanged",...}
//! ```

pub mod protocol;
pub mod server;

pub use blockfall_core as core;
pub use blockfall_engine as engine;
pub use blockfall_types as types;

// Re-export protocol types for convenience
pub use protocol::*;
pub use server::*;
