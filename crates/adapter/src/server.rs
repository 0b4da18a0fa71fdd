//! TCP server for the table transport
//!
//! Handles incoming connections and manages client lifecycle.
//! Each connection gets a reader loop (commands), a writer task (all outbound
//! lines, numbered in order) and, after the handshake, an event pump that
//! forwards the player's and their table's bus events.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::engine::{CommandError, Envelope, Lobby, Topic};
use crate::protocol::*;
use crate::types::{PlayerId, TableId};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Outbound lines buffered per client before events are dropped
    pub max_pending: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7777,
            max_pending: 256,
        }
    }
}

impl ServerConfig {
    /// Create from `BLOCKFALL_HOST`, `BLOCKFALL_PORT` and `BLOCKFALL_MAX_PENDING`
    pub fn from_env() -> Self {
        use std::env;

        let defaults = Self::default();
        let host = env::var("BLOCKFALL_HOST").unwrap_or(defaults.host);
        let port = env::var("BLOCKFALL_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.port);
        let max_pending = env::var("BLOCKFALL_MAX_PENDING")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(defaults.max_pending);

        Self {
            host,
            port,
            max_pending,
        }
    }

    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid socket address {}:{}", self.host, self.port))
    }
}

/// Outbound item; the writer task assigns `seq`
#[derive(Debug, Clone)]
enum ClientOutbound {
    Welcome {
        player: PlayerId,
        name: String,
        rating: i32,
    },
    Ack {
        command_seq: u64,
        payload: AckPayload,
    },
    Error {
        command_seq: Option<u64>,
        code: String,
        message: String,
    },
    Event(Arc<Envelope>),
}

impl ClientOutbound {
    fn protocol_error(command_seq: Option<u64>, code: ErrorCode, message: impl Into<String>) -> Self {
        ClientOutbound::Error {
            command_seq,
            code: code.as_str().to_string(),
            message: message.into(),
        }
    }

    fn command_error(command_seq: u64, err: &CommandError) -> Self {
        ClientOutbound::Error {
            command_seq: Some(command_seq),
            code: err.error_code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Start the TCP server
pub async fn run_server(
    config: ServerConfig,
    lobby: Arc<Lobby>,
    ready_tx: Option<oneshot::Sender<SocketAddr>>,
) -> anyhow::Result<()> {
    let addr = config.socket_addr()?;
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    let bound = listener.local_addr()?;
    info!(addr = %bound, "server listening");
    if let Some(tx) = ready_tx {
        let _ = tx.send(bound);
    }

    let mut client_id_counter = 0u64;

    // Accept incoming connections
    loop {
        let (socket, addr) = listener.accept().await?;
        client_id_counter += 1;
        let client_id = client_id_counter;
        info!(client = client_id, %addr, "client connected");

        let lobby = Arc::clone(&lobby);
        let config = config.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_client(socket, client_id, lobby, config).await {
                warn!(client = client_id, error = %e, "client error");
            }
            info!(client = client_id, "client disconnected");
        });
    }
}

/// Handle a single client connection
async fn handle_client(
    socket: TcpStream,
    client_id: u64,
    lobby: Arc<Lobby>,
    config: ServerConfig,
) -> anyhow::Result<()> {
    let (reader, mut writer) = tokio::io::split(socket);
    let mut reader = BufReader::new(reader);

    // Channel to send messages to this client
    let (tx, mut rx) = mpsc::channel::<ClientOutbound>(config.max_pending);

    // Spawn task to write messages to client
    let rooms_lobby = Arc::clone(&lobby);
    let write_task = tokio::spawn(async move {
        let mut buf: Vec<u8> = Vec::with_capacity(4096);
        let mut seq = 0u64;
        while let Some(msg) = rx.recv().await {
            seq += 1;
            buf.clear();
            let encoded = match &msg {
                ClientOutbound::Welcome {
                    player,
                    name,
                    rating,
                } => serde_json::to_writer(
                    &mut buf,
                    &create_welcome(seq, *player, name, *rating, rooms_lobby.registry().rooms()),
                ),
                ClientOutbound::Ack {
                    command_seq,
                    payload,
                } => serde_json::to_writer(&mut buf, &create_ack(seq, *command_seq, payload.clone())),
                ClientOutbound::Error {
                    command_seq,
                    code,
                    message,
                } => serde_json::to_writer(&mut buf, &create_error(seq, *command_seq, code, message)),
                ClientOutbound::Event(envelope) => {
                    serde_json::to_writer(&mut buf, &create_event(seq, envelope))
                }
            };
            if let Err(e) = encoded {
                warn!(client = client_id, error = %e, "encode failed");
                continue;
            }
            buf.push(b'\n');
            if writer.write_all(&buf).await.is_err() {
                break;
            }
            if writer.flush().await.is_err() {
                break;
            }
        }
    });

    // Table the player currently follows, for the event pump
    let (table_tx, table_rx) = watch::channel::<Option<TableId>>(None);
    let mut pump_task: Option<tokio::task::JoinHandle<()>> = None;

    let mut player: Option<PlayerId> = None;
    let mut last_seq: Option<u64> = None;
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            // Client disconnected
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let parsed = match parse_message(trimmed) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(client = client_id, error = %e, "unparseable line");
                let _ = tx
                    .send(ClientOutbound::protocol_error(
                        None,
                        ErrorCode::InvalidCommand,
                        format!("parse error: {}", e),
                    ))
                    .await;
                continue;
            }
        };

        let seq = match &parsed {
            ParsedMessage::Hello(m) => m.seq,
            ParsedMessage::Command(m) => m.seq,
            ParsedMessage::Unknown(m) => m.seq,
        };
        // Sequencing: enforce monotonic seq per sender
        if last_seq.is_some_and(|prev| seq <= prev) {
            let _ = tx
                .send(ClientOutbound::protocol_error(
                    Some(seq),
                    ErrorCode::OutOfOrder,
                    "seq must increase",
                ))
                .await;
            continue;
        }
        last_seq = Some(seq);

        match parsed {
            ParsedMessage::Hello(hello) => {
                if player.is_some() {
                    let _ = tx
                        .send(ClientOutbound::protocol_error(
                            Some(seq),
                            ErrorCode::InvalidCommand,
                            "already handshaken",
                        ))
                        .await;
                    continue;
                }
                if !version_compatible(&hello.protocol_version) {
                    let _ = tx
                        .send(ClientOutbound::protocol_error(
                            Some(seq),
                            ErrorCode::ProtocolMismatch,
                            format!("server speaks {}", PROTOCOL_VERSION),
                        ))
                        .await;
                    continue;
                }

                let record = match hello.player.and_then(|id| lobby.player(id).ok()) {
                    Some(record) => record,
                    None => {
                        let name = hello.name.as_deref().unwrap_or(&hello.client.name);
                        lobby.register_player(name)
                    }
                };
                info!(client = client_id, player = %record.id, name = %record.name, "handshake complete");

                player = Some(record.id);
                let _ = table_tx.send(lobby.table_of(record.id));
                pump_task = Some(tokio::spawn(pump_events(
                    Arc::clone(&lobby),
                    record.id,
                    table_rx.clone(),
                    tx.clone(),
                )));
                let _ = tx
                    .send(ClientOutbound::Welcome {
                        player: record.id,
                        name: record.name,
                        rating: record.rating,
                    })
                    .await;
            }
            ParsedMessage::Command(cmd) => {
                let Some(player) = player else {
                    let _ = tx
                        .send(ClientOutbound::protocol_error(
                            Some(seq),
                            ErrorCode::HandshakeRequired,
                            "send hello first",
                        ))
                        .await;
                    continue;
                };

                let reply = match dispatch(&lobby, player, cmd.command) {
                    Ok(payload) => ClientOutbound::Ack {
                        command_seq: seq,
                        payload,
                    },
                    Err(err) => ClientOutbound::command_error(seq, &err),
                };
                table_tx.send_if_modified(|current| {
                    let now = lobby.table_of(player);
                    let changed = *current != now;
                    *current = now;
                    changed
                });
                let _ = tx.send(reply).await;
            }
            ParsedMessage::Unknown(_) => {
                let _ = tx
                    .send(ClientOutbound::protocol_error(
                        Some(seq),
                        ErrorCode::InvalidCommand,
                        "unknown message type",
                    ))
                    .await;
            }
        }
    }

    // Leaving the connection leaves the table
    if let Some(player) = player {
        if lobby.table_of(player).is_some() {
            if let Err(err) = lobby.leave_table(player) {
                debug!(client = client_id, player = %player, %err, "leave on disconnect failed");
            }
        }
    }
    if let Some(pump) = pump_task {
        pump.abort();
    }
    drop(tx);
    let _ = write_task.await;
    Ok(())
}

/// Forward the player's and their table's bus events to the writer
async fn pump_events(
    lobby: Arc<Lobby>,
    player: PlayerId,
    mut table_rx: watch::Receiver<Option<TableId>>,
    tx: mpsc::Sender<ClientOutbound>,
) {
    let mut subscription = lobby.subscribe(player);
    let mut following = *table_rx.borrow_and_update();
    if let Some(table) = following {
        subscription.follow(Topic::Table(table));
    }

    loop {
        tokio::select! {
            changed = table_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = *table_rx.borrow_and_update();
                if let Some(old) = following {
                    subscription.unfollow(Topic::Table(old));
                }
                if let Some(new) = next {
                    subscription.follow(Topic::Table(new));
                }
                following = next;
            }
            envelope = subscription.recv() => {
                let Some(envelope) = envelope else { break };
                match tx.try_send(ClientOutbound::Event(envelope)) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(player = %player, "client backlog full, event dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
        }
    }
}

/// Apply one command to the lobby
fn dispatch(lobby: &Lobby, player: PlayerId, command: Command) -> Result<AckPayload, CommandError> {
    let mut ack = AckPayload::default();
    match command {
        Command::CreateRoom { name } => ack.room = Some(lobby.create_room(&name)),
        Command::PlayNow { room } => {
            let (table, seat) = lobby.play_now(player, room)?;
            ack.table = Some(table);
            ack.seat = Some(seat);
        }
        Command::CreateTable {
            room,
            visibility,
            rated,
        } => ack.table = Some(lobby.create_table(player, room, visibility, rated)?),
        Command::JoinTable { table } => {
            lobby.join_table(player, table)?;
            ack.table = Some(table);
        }
        Command::LeaveTable => lobby.leave_table(player)?,
        Command::Sit { seat } => {
            lobby.sit(player, seat)?;
            ack.seat = Some(seat);
        }
        Command::Stand => lobby.stand(player)?,
        Command::Ready { ready } => lobby.set_ready(player, ready)?,
        Command::Invite { player: invitee } => lobby.invite(player, invitee)?,
        Command::Boot { player: target } => lobby.boot(player, target)?,
        Command::Settings { visibility, rated } => {
            lobby.update_settings(player, visibility, rated)?
        }
        Command::Input { action } => lobby.input(player, action)?,
        Command::UsePower { target } => lobby.use_power(player, target)?,
        Command::FadeAck { seat, nonce } => {
            lobby.fade_ack(player, seat, nonce)?;
        }
    }
    Ok(ack)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{GameConfig, Services};
    use crate::types::RoomId;

    fn lobby() -> Lobby {
        Lobby::new(Arc::new(Services::in_memory(GameConfig::for_tests())))
    }

    #[test]
    fn test_config_rejects_bad_address() {
        let config = ServerConfig {
            host: "not an ip".to_string(),
            ..ServerConfig::default()
        };
        assert!(config.socket_addr().is_err());
    }

    #[tokio::test]
    async fn test_dispatch_play_now_fills_ack() {
        let lobby = lobby();
        let room = lobby.create_room("main");
        let player = lobby.register_player("ann").id;

        let ack = dispatch(&lobby, player, Command::PlayNow { room }).unwrap();
        assert!(ack.table.is_some());
        assert_eq!(ack.seat.map(|s| s.get()), Some(1));
    }

    #[tokio::test]
    async fn test_dispatch_maps_errors() {
        let lobby = lobby();
        let player = lobby.register_player("ann").id;
        let err = dispatch(&lobby, player, Command::PlayNow { room: RoomId(42) }).unwrap_err();
        assert_eq!(err.error_code(), "room_not_found");
        let err = dispatch(&lobby, player, Command::Stand).unwrap_err();
        assert_eq!(err.error_code(), "not_seated");
    }
}
