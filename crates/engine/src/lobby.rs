//! Command facade
//!
//! Every client command enters here. Commands are validated against seat and
//! host ownership before anything is mutated; failures come back as
//! [`CommandError`] and are logged at debug level. A player sits at no more
//! than one table at a time.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::bus::{Subscription, Topic};
use crate::error::CommandError;
use crate::matchmaker::SeatMatchmaker;
use crate::notify::Notification;
use crate::orchestrator::Orchestrator;
use crate::player_loop::LoopPeer;
use crate::registry::Registry;
use crate::services::Services;
use crate::store::PlayerRecord;
use crate::types::{InputAction, PlayerId, RoomId, SeatNumber, TableId, Visibility};

#[derive(Debug)]
pub struct Lobby {
    services: Arc<Services>,
    registry: Arc<Registry>,
    matchmaker: SeatMatchmaker,
    /// Table each player currently belongs to
    sessions: DashMap<PlayerId, TableId>,
}

fn rejected(player: PlayerId, command: &'static str) -> impl FnOnce(&CommandError) {
    move |err: &CommandError| {
        debug!(player = %player, command, code = err.error_code(), %err, "command rejected")
    }
}

impl Lobby {
    pub fn new(services: Arc<Services>) -> Self {
        let registry = Arc::new(Registry::new(Arc::clone(&services)));
        Self {
            matchmaker: SeatMatchmaker::new(Arc::clone(&registry)),
            services,
            registry,
            sessions: DashMap::new(),
        }
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn register_player(&self, name: &str) -> PlayerRecord {
        let record = self.services.players.create_player(name);
        debug!(player = %record.id, name, "player registered");
        record
    }

    pub fn player(&self, id: PlayerId) -> Result<PlayerRecord, CommandError> {
        self.services
            .players
            .find_player(id)
            .ok_or(CommandError::PlayerNotFound(id))
    }

    pub fn create_room(&self, name: &str) -> RoomId {
        self.registry.create_room(name)
    }

    /// Bus subscription following the player's own notifications
    pub fn subscribe(&self, player: PlayerId) -> Subscription {
        self.services.bus.subscribe([Topic::Player(player)])
    }

    pub fn table_of(&self, player: PlayerId) -> Option<TableId> {
        self.sessions.get(&player).map(|t| *t)
    }

    /// Run `f` against the player's current table
    fn with_table<R>(
        &self,
        player: PlayerId,
        f: impl FnOnce(&mut Orchestrator) -> Result<R, CommandError>,
    ) -> Result<R, CommandError> {
        let table = self
            .table_of(player)
            .ok_or(CommandError::NotSeated(player))?;
        let handle = self.registry.get(table)?;
        let mut orchestrator = handle.orchestrator().lock();
        f(&mut orchestrator)
    }

    /// Seat bookkeeping after membership changed
    fn touched(&self, orchestrator: &Orchestrator) {
        self.services
            .tables
            .upsert_table(orchestrator.table().record());
        orchestrator.publish_table();
    }

    pub fn play_now(
        &self,
        player: PlayerId,
        room: RoomId,
    ) -> Result<(TableId, SeatNumber), CommandError> {
        self.player(player)?;
        if self.table_of(player).is_some() {
            self.leave_table(player)?;
        }
        let (table, seat) = self
            .matchmaker
            .play_now(room, player)
            .inspect_err(rejected(player, "playNow"))?;
        self.sessions.insert(player, table);
        debug!(player = %player, table = %table, seat = %seat, "play now seated");
        Ok((table, seat))
    }

    /// Create a table and join it as host
    pub fn create_table(
        &self,
        player: PlayerId,
        room: RoomId,
        visibility: Visibility,
        rated: bool,
    ) -> Result<TableId, CommandError> {
        self.player(player)?;
        let handle = self.registry.create_table(room, visibility, rated)?;
        self.join_table(player, handle.id)?;
        Ok(handle.id)
    }

    pub fn join_table(&self, player: PlayerId, table: TableId) -> Result<(), CommandError> {
        self.player(player)?;
        match self.table_of(player) {
            Some(current) if current == table => return Ok(()),
            Some(_) => self.leave_table(player)?,
            None => {}
        }
        let handle = self.registry.get(table)?;
        {
            let mut orchestrator = handle.orchestrator().lock();
            orchestrator
                .table_mut()
                .join(player)
                .inspect_err(rejected(player, "join"))?;
            self.touched(&orchestrator);
        }
        self.sessions.insert(player, table);
        Ok(())
    }

    /// Leave the current table; an empty table is destroyed
    pub fn leave_table(&self, player: PlayerId) -> Result<(), CommandError> {
        let empty = self.with_table(player, |o| {
            if let Some(seat) = o.table_mut().leave(player) {
                o.on_departure(player, seat);
            }
            self.touched(o);
            Ok(o.table().is_empty().then_some(o.id()))
        })?;
        self.sessions.remove(&player);
        if let Some(table) = empty {
            self.registry.destroy_table(table);
        }
        Ok(())
    }

    pub fn sit(&self, player: PlayerId, seat: SeatNumber) -> Result<(), CommandError> {
        self.with_table(player, |o| {
            let previous = o.table().seat_of(player);
            o.table_mut().sit(player, seat)?;
            if let Some(previous) = previous.filter(|p| *p != seat) {
                o.on_departure(player, previous);
            }
            o.on_ready_changed();
            self.touched(o);
            Ok(())
        })
        .inspect_err(rejected(player, "sit"))
    }

    pub fn stand(&self, player: PlayerId) -> Result<(), CommandError> {
        self.with_table(player, |o| {
            let seat = o.table_mut().stand(player)?;
            o.on_departure(player, seat);
            self.touched(o);
            Ok(())
        })
        .inspect_err(rejected(player, "stand"))
    }

    pub fn set_ready(&self, player: PlayerId, ready: bool) -> Result<(), CommandError> {
        self.with_table(player, |o| {
            o.table_mut().set_ready(player, ready)?;
            o.on_ready_changed();
            o.publish_table();
            Ok(())
        })
        .inspect_err(rejected(player, "ready"))
    }

    pub fn invite(&self, host: PlayerId, player: PlayerId) -> Result<(), CommandError> {
        self.player(player)?;
        let table = self
            .with_table(host, |o| {
                o.table_mut().invite(host, player)?;
                Ok(o.id())
            })
            .inspect_err(rejected(host, "invite"))?;
        self.services
            .notifier
            .notify(player, Notification::Invitation { table, from: host });
        Ok(())
    }

    pub fn boot(&self, host: PlayerId, player: PlayerId) -> Result<(), CommandError> {
        let table = self
            .with_table(host, |o| {
                if let Some(seat) = o.table_mut().boot(host, player)? {
                    o.on_departure(player, seat);
                }
                self.touched(o);
                Ok(o.id())
            })
            .inspect_err(rejected(host, "boot"))?;
        self.sessions.remove_if(&player, |_, t| *t == table);
        self.services
            .notifier
            .notify(player, Notification::Booted { table, by: host });
        Ok(())
    }

    pub fn update_settings(
        &self,
        host: PlayerId,
        visibility: Option<Visibility>,
        rated: Option<bool>,
    ) -> Result<(), CommandError> {
        self.with_table(host, |o| {
            o.table_mut().update_settings(host, visibility, rated)?;
            self.touched(o);
            Ok(())
        })
        .inspect_err(rejected(host, "settings"))
    }

    fn playing_peer(&self, player: PlayerId) -> Result<LoopPeer, CommandError> {
        self.with_table(player, |o| {
            let seat = o
                .table()
                .seat_of(player)
                .ok_or(CommandError::NotSeated(player))?;
            o.directory()
                .get(seat)
                .ok_or(CommandError::InputRejected("seat is not playing"))
        })
    }

    pub fn input(&self, player: PlayerId, action: InputAction) -> Result<(), CommandError> {
        self.playing_peer(player)
            .and_then(|peer| peer.submit_input(action))
            .inspect_err(rejected(player, "input"))
    }

    pub fn use_power(&self, player: PlayerId, target: SeatNumber) -> Result<(), CommandError> {
        self.playing_peer(player)
            .and_then(|peer| peer.use_power(target))
            .inspect_err(rejected(player, "usePower"))
    }

    /// Acknowledge a fade for the loop at `loop_seat`. The player must sit at
    /// that seat or at its partner seat.
    pub fn fade_ack(
        &self,
        player: PlayerId,
        loop_seat: SeatNumber,
        nonce: u64,
    ) -> Result<bool, CommandError> {
        self.with_table(player, |o| {
            let seat = o
                .table()
                .seat_of(player)
                .ok_or(CommandError::NotSeated(player))?;
            if seat != loop_seat && seat != loop_seat.partner() {
                return Err(CommandError::InputRejected("fade ack for a foreign seat"));
            }
            Ok(o
                .directory()
                .get(loop_seat)
                .map(|peer| peer.fade_ack(nonce))
                .unwrap_or(false))
        })
        .inspect_err(rejected(player, "fadeAck"))
    }

    /// Tear down every table
    pub fn shutdown(&self) {
        self.registry.shutdown();
        self.sessions.clear();
    }
}
