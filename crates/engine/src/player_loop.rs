//! Per-seat round loop
//!
//! One tokio task per playing seat drives that seat's board, piece queue and
//! power bar. The task owns all of its state except the board, which is shared
//! with the partner seat's loop for cross-board matching.
//!
//! # States
//!
//! - **Running**: the piece falls one row per tick, input is accepted
//! - **Locked**: a landing is resolving; ticks and input are skipped
//! - **Stopped**: the seat is out of the round, the task exits
//!
//! # Landing
//!
//! On collision the piece is committed, the cascade runs step by step (board
//! locks are released while awaiting each fade acknowledgement), forwarded
//! blocks go to the opposing teams, partner-earned items go to the partner,
//! then the game-over rule is checked and the next piece is drawn.
//!
//! Partner seats share a [`LandingPermit`]. A landing holds it from the
//! collision until its cascade is resolved, so the partner cannot start a
//! landing of its own while this one waits on a fade.
//!
//! # Messages
//!
//! Cross-seat traffic ([`LoopMessage::Hoo`], [`LoopMessage::ApplyPower`],
//! [`LoopMessage::Grant`]) is fire-and-forget and carries a unique id; the
//! receiving loop ignores ids it has already seen.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use blockfall_core::{
    Board, EffectContext, EffectKey, GeneratorConfig, Landing, LandingOutcome, Piece,
    PieceGenerator, PowerBar, SeatSnapshot, SimpleRng,
};

use crate::bus::{GameEvent, Topic};
use crate::error::CommandError;
use crate::fade::{FadeGate, FadeResult};
use crate::services::Services;
use crate::types::{
    Block, InputAction, PlayerId, Pos, PowerBarItem, PowerLevel, SeatNumber, TableId, TeamNumber,
    TickSpeed,
};

pub type SharedBoard = Arc<Mutex<Board>>;

/// Held for the whole of a landing; one per partner pair
pub type LandingPermit = Arc<tokio::sync::Mutex<()>>;

/// Message ids remembered per loop for duplicate suppression
const SEEN_IDS_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Locked,
    Stopped,
}

impl LoopState {
    fn to_u8(self) -> u8 {
        match self {
            LoopState::Running => 0,
            LoopState::Locked => 1,
            LoopState::Stopped => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => LoopState::Running,
            1 => LoopState::Locked,
            _ => LoopState::Stopped,
        }
    }
}

/// Lock-free view of a loop's state, readable from command handlers
#[derive(Debug, Default)]
pub struct LoopStatus {
    state: AtomicU8,
    /// Bumped at every landing; inputs carry the value they were issued under
    landings: AtomicU64,
}

impl LoopStatus {
    pub fn state(&self) -> LoopState {
        LoopState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set(&self, state: LoopState) {
        self.state.store(state.to_u8(), Ordering::Release);
    }

    fn begin_landing(&self) {
        self.landings.fetch_add(1, Ordering::AcqRel);
        self.set(LoopState::Locked);
    }

    pub fn epoch(&self) -> u64 {
        self.landings.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.state() == LoopState::Running
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == LoopState::Stopped
    }
}

#[derive(Debug, Clone)]
pub enum LoopMessage {
    Input {
        action: InputAction,
        epoch: u64,
    },
    UsePower {
        target: SeatNumber,
    },
    ApplyPower {
        id: u64,
        from: SeatNumber,
        item: PowerBarItem,
    },
    Hoo {
        id: u64,
        from: SeatNumber,
        blocks: Vec<Block>,
    },
    Grant {
        id: u64,
        items: Vec<PowerBarItem>,
    },
}

/// Report from a loop to its table's orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatReport {
    GameOver { seat: SeatNumber, player: PlayerId },
}

/// Handle to a running loop
#[derive(Debug, Clone)]
pub struct LoopPeer {
    pub seat: SeatNumber,
    pub player: PlayerId,
    tx: mpsc::UnboundedSender<LoopMessage>,
    status: Arc<LoopStatus>,
    fade: Arc<FadeGate>,
    cancel: CancellationToken,
}

impl LoopPeer {
    pub fn team(&self) -> TeamNumber {
        self.seat.team()
    }

    pub fn status(&self) -> &LoopStatus {
        &self.status
    }

    pub fn is_playing(&self) -> bool {
        !self.status.is_stopped() && !self.cancel.is_cancelled()
    }

    /// Fire-and-forget delivery. False if the loop is gone.
    pub fn send(&self, msg: LoopMessage) -> bool {
        self.tx.send(msg).is_ok()
    }

    /// Queue a movement input stamped with the current landing epoch
    pub fn submit_input(&self, action: InputAction) -> Result<(), CommandError> {
        match self.status.state() {
            LoopState::Running => {}
            LoopState::Locked => return Err(CommandError::InputRejected("seat is locked")),
            LoopState::Stopped => return Err(CommandError::InputRejected("seat is not playing")),
        }
        let epoch = self.status.epoch();
        if self.send(LoopMessage::Input { action, epoch }) {
            Ok(())
        } else {
            Err(CommandError::InputRejected("seat is not playing"))
        }
    }

    pub fn use_power(&self, target: SeatNumber) -> Result<(), CommandError> {
        if !self.is_playing() {
            return Err(CommandError::InputRejected("seat is not playing"));
        }
        if self.send(LoopMessage::UsePower { target }) {
            Ok(())
        } else {
            Err(CommandError::InputRejected("seat is not playing"))
        }
    }

    pub fn fade_ack(&self, nonce: u64) -> bool {
        self.fade.ack(nonce)
    }

    /// Cancel the loop task
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

/// Loops of one round, by seat
#[derive(Debug, Default)]
pub struct LoopDirectory {
    peers: RwLock<BTreeMap<SeatNumber, LoopPeer>>,
    next_id: AtomicU64,
}

impl LoopDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, peer: LoopPeer) {
        self.peers.write().insert(peer.seat, peer);
    }

    pub fn get(&self, seat: SeatNumber) -> Option<LoopPeer> {
        self.peers.read().get(&seat).cloned()
    }

    pub fn remove(&self, seat: SeatNumber) -> Option<LoopPeer> {
        self.peers.write().remove(&seat)
    }

    pub fn peers(&self) -> Vec<LoopPeer> {
        self.peers.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    /// Stop every loop and forget them
    pub fn stop_all(&self) {
        let peers = std::mem::take(&mut *self.peers.write());
        for peer in peers.values() {
            peer.stop();
        }
    }

    /// Distinct teams with at least one loop still playing
    pub fn active_teams(&self) -> Vec<TeamNumber> {
        let mut teams: Vec<TeamNumber> = self
            .peers
            .read()
            .values()
            .filter(|p| p.is_playing())
            .map(|p| p.team())
            .collect();
        teams.sort();
        teams.dedup();
        teams
    }

    pub fn next_message_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Bounded set of recently seen message ids
#[derive(Debug)]
struct SeenIds {
    order: VecDeque<u64>,
    set: HashSet<u64>,
    capacity: usize,
}

impl SeenIds {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            set: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// True if the id is new
    fn insert(&mut self, id: u64) -> bool {
        if !self.set.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.set.remove(&old);
            }
        }
        true
    }
}

/// Everything needed to start one seat's loop
#[derive(Debug, Clone)]
pub struct LoopSetup {
    pub table: TableId,
    pub seat: SeatNumber,
    pub player: PlayerId,
    pub board: SharedBoard,
    /// Partner seat and board, when linked
    pub partner: Option<(SeatNumber, SharedBoard)>,
    /// Shared with the partner seat's loop
    pub permit: LandingPermit,
    pub seed: u32,
}

/// Start a seat loop and register it in `directory`
pub fn spawn_player_loop(
    setup: LoopSetup,
    services: Arc<Services>,
    directory: Arc<LoopDirectory>,
    reports: mpsc::UnboundedSender<SeatReport>,
    cancel: CancellationToken,
) -> (LoopPeer, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let status = Arc::new(LoopStatus::default());
    let fade = Arc::new(FadeGate::new());

    let peer = LoopPeer {
        seat: setup.seat,
        player: setup.player,
        tx,
        status: Arc::clone(&status),
        fade: Arc::clone(&fade),
        cancel: cancel.clone(),
    };
    directory.insert(peer.clone());

    let (snapshots, snapshot_rx) = watch::channel(None);
    tokio::spawn(publish_snapshots(
        services.clone(),
        setup.table,
        snapshot_rx,
    ));

    let generator = GeneratorConfig {
        power_chance_per_mille: services.config.power_chance_per_mille,
        ..GeneratorConfig::default()
    };

    let seat_loop = SeatLoop {
        table: setup.table,
        seat: setup.seat,
        player: setup.player,
        services,
        directory,
        reports,
        status,
        fade,
        cancel,
        board: setup.board,
        partner: setup.partner,
        permit: setup.permit,
        pieces: PieceGenerator::with_config(setup.seed, generator),
        bar: PowerBar::new(),
        rng: SimpleRng::new(setup.seed.rotate_left(16) ^ 0x9e37_79b9),
        piece: None,
        dropping: false,
        speed_drop_remaining: 0,
        speed: TickSpeed::Normal,
        seen: SeenIds::new(SEEN_IDS_CAPACITY),
        snapshots,
    };

    let join = tokio::spawn(seat_loop.run(rx));
    (peer, join)
}

/// Coalesce snapshot updates: only the latest pending one is published
async fn publish_snapshots(
    services: Arc<Services>,
    table: TableId,
    mut rx: watch::Receiver<Option<SeatSnapshot>>,
) {
    while rx.changed().await.is_ok() {
        let snapshot = rx.borrow_and_update().clone();
        if let Some(snapshot) = snapshot {
            services.bus.publish(
                Topic::Table(table),
                GameEvent::SeatState {
                    table,
                    snapshot: Box::new(snapshot),
                },
            );
        }
    }
}

struct SeatLoop {
    table: TableId,
    seat: SeatNumber,
    player: PlayerId,
    services: Arc<Services>,
    directory: Arc<LoopDirectory>,
    reports: mpsc::UnboundedSender<SeatReport>,
    status: Arc<LoopStatus>,
    fade: Arc<FadeGate>,
    cancel: CancellationToken,
    board: SharedBoard,
    partner: Option<(SeatNumber, SharedBoard)>,
    permit: LandingPermit,
    pieces: PieceGenerator,
    bar: PowerBar,
    rng: SimpleRng,
    piece: Option<Piece>,
    dropping: bool,
    speed_drop_remaining: u32,
    speed: TickSpeed,
    seen: SeenIds,
    snapshots: watch::Sender<Option<SeatSnapshot>>,
}

impl SeatLoop {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<LoopMessage>) {
        info!(table = %self.table, seat = %self.seat, player = %self.player, "seat loop started");

        let cancel = self.cancel.clone();
        self.next_piece();
        self.broadcast();
        let mut next_tick = Instant::now() + self.interval();

        while !self.status.is_stopped() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    let before = self.speed;
                    self.handle(msg);
                    if self.speed != before {
                        next_tick = Instant::now() + self.interval();
                    }
                }
                _ = tokio::time::sleep_until(next_tick) => {
                    self.tick().await;
                    next_tick = Instant::now() + self.interval();
                }
            }
        }

        self.status.set(LoopState::Stopped);
        debug!(table = %self.table, seat = %self.seat, "seat loop finished");
    }

    fn interval(&self) -> Duration {
        self.services.config.ticks.interval(self.speed)
    }

    fn falling_speed(&self) -> TickSpeed {
        TickSpeed::falling(self.dropping, self.speed_drop_remaining > 0)
    }

    /// Lock own and partner boards, lower seat first
    fn lock_boards(&self) -> (MutexGuard<'_, Board>, Option<MutexGuard<'_, Board>>) {
        match &self.partner {
            Some((seat, partner)) if *seat < self.seat => {
                let partner = partner.lock();
                let own = self.board.lock();
                (own, Some(partner))
            }
            Some((_, partner)) => {
                let own = self.board.lock();
                let partner = partner.lock();
                (own, Some(partner))
            }
            None => (self.board.lock(), None),
        }
    }

    fn snapshot(&self) -> SeatSnapshot {
        let board = self.board.lock();
        SeatSnapshot::capture(
            self.seat,
            &board,
            self.piece.as_ref(),
            &self.pieces,
            &self.bar,
            self.speed,
            self.speed_drop_remaining,
            self.status.state() == LoopState::Locked,
            !self.status.is_stopped(),
        )
    }

    fn broadcast(&self) {
        self.snapshots.send_replace(Some(self.snapshot()));
    }

    fn publish(&self, event: GameEvent) {
        self.services.bus.publish(Topic::Table(self.table), event);
    }

    fn handle(&mut self, msg: LoopMessage) {
        match msg {
            LoopMessage::Input { action, epoch } => self.apply_input(action, epoch),
            LoopMessage::UsePower { target } => self.use_power(target),
            LoopMessage::ApplyPower { id, from, item } => {
                if self.seen.insert(id) {
                    self.apply_power(from, item);
                }
            }
            LoopMessage::Hoo { id, from, blocks } => {
                if self.seen.insert(id) {
                    self.receive_hoo(from, &blocks);
                }
            }
            LoopMessage::Grant { id, items } => {
                if self.seen.insert(id) {
                    for item in items {
                        self.bar.add_item(item);
                    }
                    self.broadcast();
                }
            }
        }
    }

    fn apply_input(&mut self, action: InputAction, epoch: u64) {
        if !self.status.is_running() || epoch != self.status.epoch() {
            debug!(seat = %self.seat, action = action.as_str(), "stale input dropped");
            return;
        }
        let Some(piece) = self.piece else {
            return;
        };

        match action {
            InputAction::MoveLeft | InputAction::MoveRight => {
                let d_col = if action == InputAction::MoveLeft { -1 } else { 1 };
                let moved = piece.moved(0, d_col);
                if !self.board.lock().has_collision(&moved) {
                    self.piece = Some(moved);
                }
            }
            InputAction::CycleColors => {
                let mut cycled = piece;
                cycled.cycle_colors();
                self.piece = Some(cycled);
            }
            InputAction::StartDrop => self.dropping = true,
            InputAction::StopDrop => self.dropping = false,
        }

        self.speed = self.falling_speed();
        self.broadcast();
    }

    fn use_power(&mut self, target: SeatNumber) {
        if !self.status.is_running() {
            return;
        }
        let Some(item) = self.bar.front().copied() else {
            debug!(seat = %self.seat, "power bar empty");
            return;
        };
        let Some(peer) = self.directory.get(target) else {
            debug!(seat = %self.seat, target = %target, "power target has no loop");
            return;
        };
        if !peer.is_playing() {
            debug!(seat = %self.seat, target = %target, "power target is out");
            return;
        }
        let same_team = target.team() == self.seat.team();
        if item.targets_opponent() == same_team {
            debug!(seat = %self.seat, target = %target, "power target on the wrong team");
            return;
        }

        self.bar.pop_front();
        if target == self.seat {
            self.apply_power(self.seat, item);
        } else {
            let id = self.directory.next_message_id();
            peer.send(LoopMessage::ApplyPower {
                id,
                from: self.seat,
                item,
            });
        }
        self.broadcast();
    }

    fn apply_power(&mut self, from: SeatNumber, item: PowerBarItem) {
        let level = match item {
            PowerBarItem::Block { power, .. } => power.level,
            PowerBarItem::Diamond { .. } => PowerLevel::Normal,
        };

        let outcome = {
            let mut board = self.board.lock();
            let mut ctx = EffectContext {
                source: from,
                target: self.seat,
                level,
                board: &mut *board,
                power_bar: &mut self.bar,
                pieces: &mut self.pieces,
                rng: &mut self.rng,
            };
            self.services
                .powers
                .apply(EffectKey::for_item(&item), &mut ctx)
        };

        let Some(outcome) = outcome else {
            warn!(seat = %self.seat, ?item, "no effect registered");
            return;
        };
        debug!(seat = %self.seat, from = %from, ?item, changed = outcome.blocks_changed, "power applied");

        self.speed_drop_remaining += outcome.speed_drop_pieces;
        self.publish(GameEvent::PowerApplied {
            table: self.table,
            from,
            to: self.seat,
            item,
        });
        self.after_board_change();
    }

    fn receive_hoo(&mut self, from: SeatNumber, blocks: &[Block]) {
        let placed = self
            .board
            .lock()
            .place_blocks_from_hoo(blocks, &mut self.rng);
        debug!(seat = %self.seat, from = %from, sent = blocks.len(), placed, "hoo received");
        self.after_board_change();
    }

    /// Keep the falling piece clear of blocks pushed into it, then re-check game over
    fn after_board_change(&mut self) {
        let over = {
            let mut board = self.board.lock();
            if let Some(mut piece) = self.piece {
                while board.has_collision(&piece) && piece.row > 0 {
                    piece = piece.moved(-1, 0);
                }
                if board.has_collision(&piece) {
                    board.set_game_over();
                }
                self.piece = Some(piece);
            }
            board.check_if_game_over(None)
        };

        if over {
            self.game_over();
        } else {
            self.speed = self.falling_speed();
            self.broadcast();
        }
    }

    async fn tick(&mut self) {
        if !self.status.is_running() {
            return;
        }
        let Some(piece) = self.piece else {
            self.next_piece();
            return;
        };

        let moved = piece.moved(1, 0);
        if !self.board.lock().has_collision(&moved) {
            self.piece = Some(moved);
            self.broadcast();
            return;
        }

        let permit = Arc::clone(&self.permit);
        let _turn = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return,
            turn = permit.lock_owned() => turn,
        };
        // The partner's landing may have cleared the cells below
        if !self.board.lock().has_collision(&moved) {
            self.piece = Some(moved);
            self.broadcast();
            return;
        }
        self.land(piece).await;
    }

    async fn land(&mut self, piece: Piece) {
        self.status.begin_landing();
        self.piece = None;
        self.speed = TickSpeed::BreakingBlocks;

        let placed = {
            let mut board = self.board.lock();
            let placed = board.place_piece(&piece);
            if placed && piece.is_special() {
                board.convert_surrounding_blocks_to_power_blocks(&piece);
            }
            placed
        };
        if !placed {
            warn!(seat = %self.seat, "landed piece overlaps the grid");
            self.board.lock().set_game_over();
            self.game_over();
            return;
        }
        self.broadcast();

        let outcome = self.resolve_cascade().await;
        if self.cancel.is_cancelled() {
            return;
        }
        self.distribute(&outcome);

        let over = self.board.lock().check_if_game_over(Some(&piece));
        if over {
            self.game_over();
            return;
        }

        self.speed_drop_remaining = self.speed_drop_remaining.saturating_sub(1);
        self.status.set(LoopState::Running);
        self.next_piece();
        self.broadcast();
    }

    async fn resolve_cascade(&mut self) -> LandingOutcome {
        let services = Arc::clone(&self.services);
        let mut landing = {
            let board = self.board.lock();
            Landing::begin(&board)
        };

        loop {
            let batch = {
                let (mut own, mut partner) = self.lock_boards();
                landing.detect(&services.detectors, &mut own, partner.as_deref_mut())
            };
            let Some(batch) = batch else {
                break;
            };
            self.broadcast();

            if !batch.own.is_empty() {
                self.await_fade(self.seat, &batch.own).await;
            }
            if let Some((partner_seat, _)) = &self.partner {
                if !batch.partner.is_empty() {
                    self.await_fade(*partner_seat, &batch.partner).await;
                }
            }
            if self.cancel.is_cancelled() {
                break;
            }

            {
                let (mut own, mut partner) = self.lock_boards();
                landing.resolve(&batch, &mut own, partner.as_deref_mut());
            }
            self.broadcast();
        }

        let mut board = self.board.lock();
        landing.finish(&mut board)
    }

    async fn await_fade(&self, board_seat: SeatNumber, cells: &[Pos]) {
        let wait = self.fade.begin();
        self.publish(GameEvent::FadeRequested {
            table: self.table,
            loop_seat: self.seat,
            board_seat,
            nonce: wait.nonce(),
            cells: cells.to_vec(),
        });

        let result = self
            .fade
            .wait(wait, self.services.config.fade_timeout, &self.cancel)
            .await;
        if result == FadeResult::TimedOut {
            debug!(seat = %self.seat, board = %board_seat, "fade ack timed out");
        }
    }

    fn distribute(&mut self, outcome: &LandingOutcome) {
        for item in &outcome.earned_own {
            self.bar.add_item(*item);
        }

        if let Some((partner_seat, _)) = &self.partner {
            if !outcome.earned_partner.is_empty() {
                if let Some(peer) = self.directory.get(*partner_seat) {
                    peer.send(LoopMessage::Grant {
                        id: self.directory.next_message_id(),
                        items: outcome.earned_partner.clone(),
                    });
                }
            }
        }

        let forwarded: Vec<Block> = outcome.forwarded().copied().collect();
        if !forwarded.is_empty() {
            self.send_hoo(forwarded);
        }
    }

    /// Each opposing team gets the whole payload, dealt across its playing seats
    fn send_hoo(&self, blocks: Vec<Block>) {
        let my_team = self.seat.team();
        let mut teams: BTreeMap<TeamNumber, Vec<LoopPeer>> = BTreeMap::new();
        for peer in self.directory.peers() {
            if peer.team() != my_team && peer.is_playing() {
                teams.entry(peer.team()).or_default().push(peer);
            }
        }

        for seats in teams.values() {
            let mut dealt: Vec<Vec<Block>> = vec![Vec::new(); seats.len()];
            for (i, block) in blocks.iter().enumerate() {
                dealt[i % seats.len()].push(*block);
            }
            for (peer, share) in seats.iter().zip(dealt) {
                if share.is_empty() {
                    continue;
                }
                let count = share.len();
                peer.send(LoopMessage::Hoo {
                    id: self.directory.next_message_id(),
                    from: self.seat,
                    blocks: share,
                });
                self.publish(GameEvent::HooForwarded {
                    table: self.table,
                    from: self.seat,
                    to: peer.seat,
                    blocks: count,
                });
            }
        }
    }

    fn next_piece(&mut self) {
        let piece = self.pieces.get_next_piece();
        let blocked = self.board.lock().has_collision(&piece);
        self.speed = self.falling_speed();
        if blocked {
            self.board.lock().set_game_over();
            self.game_over();
            return;
        }
        self.piece = Some(piece);
    }

    fn game_over(&mut self) {
        if self.status.is_stopped() {
            return;
        }
        self.status.set(LoopState::Stopped);
        self.piece = None;
        {
            let (mut own, partner) = self.lock_boards();
            own.set_partner(None);
            if let Some(mut partner) = partner {
                partner.set_partner(None);
            }
        }

        info!(table = %self.table, seat = %self.seat, player = %self.player, "seat game over");
        self.publish(GameEvent::SeatGameOver {
            table: self.table,
            seat: self.seat,
        });
        self.publish(GameEvent::SeatState {
            table: self.table,
            snapshot: Box::new(self.snapshot()),
        });
        let _ = self.reports.send(SeatReport::GameOver {
            seat: self.seat,
            player: self.player,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Subscription;
    use crate::config::GameConfig;
    use crate::types::{
        Letter, Power, PowerKind, Side, SpecialDiamond, BOARD_ROWS, SPEED_DROP_PIECES,
    };
    use blockfall_core::{BoardConfig, PartnerLink};

    const LAST: usize = BOARD_ROWS - 1;

    fn seat(n: u8) -> SeatNumber {
        SeatNumber::new(n).unwrap()
    }

    fn shared(board: Board) -> SharedBoard {
        Arc::new(Mutex::new(board))
    }

    /// Stone column under the spawn point from `top` down, `bottom` as the last row
    fn stacked(top: usize, bottom: &str) -> Board {
        let mut rows: Vec<String> = (top..LAST).map(|_| "..#...".to_string()).collect();
        rows.push(bottom.to_string());
        let rows: Vec<&str> = rows.iter().map(String::as_str).collect();
        Board::from_rows(BoardConfig::default(), &rows)
    }

    struct Harness {
        services: Arc<Services>,
        directory: Arc<LoopDirectory>,
        reports: mpsc::UnboundedSender<SeatReport>,
        report_rx: mpsc::UnboundedReceiver<SeatReport>,
        cancel: CancellationToken,
    }

    impl Harness {
        fn new(config: GameConfig) -> Self {
            let (reports, report_rx) = mpsc::unbounded_channel();
            Self {
                services: Arc::new(Services::in_memory(config)),
                directory: Arc::new(LoopDirectory::new()),
                reports,
                report_rx,
                cancel: CancellationToken::new(),
            }
        }

        fn events(&self) -> Subscription {
            self.services.bus.subscribe([Topic::Table(TableId(1))])
        }

        fn spawn(
            &self,
            n: u8,
            board: &SharedBoard,
            partner: Option<(SeatNumber, SharedBoard)>,
            permit: &LandingPermit,
        ) -> LoopPeer {
            let (peer, _join) = spawn_player_loop(
                LoopSetup {
                    table: TableId(1),
                    seat: seat(n),
                    player: PlayerId(n as u64),
                    board: Arc::clone(board),
                    partner,
                    permit: Arc::clone(permit),
                    seed: 3 + n as u32,
                },
                Arc::clone(&self.services),
                Arc::clone(&self.directory),
                self.reports.clone(),
                self.cancel.child_token(),
            );
            peer
        }
    }

    fn drain(events: &mut Subscription) -> Vec<GameEvent> {
        let mut out = Vec::new();
        while let Some(envelope) = events.try_recv() {
            out.push(envelope.event.clone());
        }
        out
    }

    fn last_snapshot(events: &[GameEvent], of: SeatNumber) -> Option<SeatSnapshot> {
        events.iter().rev().find_map(|event| match event {
            GameEvent::SeatState { snapshot, .. } if snapshot.seat == of => {
                Some((**snapshot).clone())
            }
            _ => None,
        })
    }

    /// Next fade request issued by `loop_seat`: (board seat, nonce, cells)
    async fn next_fade(
        events: &mut Subscription,
        loop_seat: SeatNumber,
    ) -> (SeatNumber, u64, Vec<Pos>) {
        tokio::time::timeout(Duration::from_secs(30), async {
            loop {
                let envelope = events.recv().await.expect("bus open");
                if let GameEvent::FadeRequested {
                    loop_seat: from,
                    board_seat,
                    nonce,
                    cells,
                    ..
                } = &envelope.event
                {
                    if *from == loop_seat {
                        return (*board_seat, *nonce, cells.clone());
                    }
                }
            }
        })
        .await
        .expect("fade requested in time")
    }

    async fn until(mut done: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(30), async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("condition reached in time");
    }

    fn slow_fades() -> GameConfig {
        GameConfig {
            fade_timeout: Duration::from_secs(60),
            ..GameConfig::for_tests()
        }
    }

    #[test]
    fn test_seen_ids_are_bounded() {
        let mut seen = SeenIds::new(2);
        assert!(seen.insert(1));
        assert!(!seen.insert(1));
        assert!(seen.insert(2));
        assert!(seen.insert(3));
        // 1 fell out of the window
        assert!(seen.insert(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_column_reports_game_over() {
        let mut h = Harness::new(GameConfig::for_tests());
        let board = shared(stacked(4, "..#..."));
        let peer = h.spawn(1, &board, None, &LandingPermit::default());

        let report = tokio::time::timeout(Duration::from_secs(30), h.report_rx.recv())
            .await
            .expect("game over in time");
        assert_eq!(
            report,
            Some(SeatReport::GameOver {
                seat: seat(1),
                player: PlayerId(1)
            })
        );
        assert!(board.lock().is_game_over());
        assert!(!peer.is_playing());
        assert!(peer.submit_input(InputAction::MoveLeft).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_hoo_is_applied_once() {
        let h = Harness::new(GameConfig::for_tests());
        let board = shared(Board::new());
        let peer = h.spawn(1, &board, None, &LandingPermit::default());
        for _ in 0..2 {
            peer.send(LoopMessage::Hoo {
                id: 77,
                from: seat(3),
                blocks: vec![Block::Stone, Block::Stone],
            });
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        let stones = board.lock().cells().iter().filter(|b| b.is_stone()).count();
        assert_eq!(stones, 2);
        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_loop() {
        let h = Harness::new(GameConfig::for_tests());
        let peer = h.spawn(1, &shared(Board::new()), None, &LandingPermit::default());
        assert!(peer.is_playing());
        h.cancel.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!peer.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_landing_holds_until_fade_ack() {
        let h = Harness::new(slow_fades());
        let mut events = h.events();
        let board = shared(stacked(6, "..#OOO"));
        let peer = h.spawn(1, &board, None, &LandingPermit::default());

        let (board_seat, nonce, cells) = next_fade(&mut events, seat(1)).await;
        assert_eq!(board_seat, seat(1));
        for col in 3..6 {
            assert!(cells.contains(&Pos::new(LAST, col)));
        }

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(peer.status().state(), LoopState::Locked);
        assert!(peer.submit_input(InputAction::MoveLeft).is_err());
        assert!(board.lock().is_pending(LAST, 3));
        let locked = last_snapshot(&drain(&mut events), seat(1)).expect("locked seat state");
        assert_eq!(locked.speed, TickSpeed::BreakingBlocks);
        assert!(locked.locked);

        assert!(peer.fade_ack(nonce));
        until(|| peer.status().is_running()).await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(board.lock().to_rows()[LAST], "..#...");
        assert!(!board.lock().has_pending());
        let resumed = last_snapshot(&drain(&mut events), seat(1)).expect("resumed seat state");
        assert_eq!(resumed.speed, TickSpeed::Normal);
        assert!(!resumed.locked);
        assert!(resumed.piece.is_some());
        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_client_does_not_stall_landing() {
        let h = Harness::new(GameConfig {
            fade_timeout: Duration::from_millis(500),
            ..GameConfig::for_tests()
        });
        let mut events = h.events();
        let board = shared(stacked(6, "..#OOO"));
        let peer = h.spawn(1, &board, None, &LandingPermit::default());

        next_fade(&mut events, seat(1)).await;
        let asked = Instant::now();
        until(|| peer.status().epoch() == 1 && peer.status().is_running()).await;

        assert!(asked.elapsed() >= Duration::from_millis(500));
        assert_eq!(board.lock().to_rows()[LAST], "..#...");
        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_partner_landing_waits_for_the_other_cascade() {
        let h = Harness::new(slow_fades());
        let mut events = h.events();
        let left = shared(stacked(6, "..#.OO"));
        let right = shared(stacked(12, "O.#..."));
        left.lock().set_partner(Some(PartnerLink {
            seat: seat(2),
            side: Side::Right,
        }));
        right.lock().set_partner(Some(PartnerLink {
            seat: seat(1),
            side: Side::Left,
        }));
        let turn = LandingPermit::default();
        let first = h.spawn(1, &left, Some((seat(2), Arc::clone(&right))), &turn);
        let second = h.spawn(2, &right, Some((seat(1), Arc::clone(&left))), &turn);

        let (board_seat, nonce, _) = next_fade(&mut events, seat(1)).await;
        assert_eq!(board_seat, seat(1));
        assert!(right.lock().is_pending(LAST, 0));

        // Seat 2 reaches its stack long before seat 1 hears back
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(second.status().epoch(), 0);
        assert!(right.lock().is_pending(LAST, 0));
        assert_eq!(right.lock().block(LAST, 0), Block::plain(Letter::O));
        assert!(!drain(&mut events).iter().any(|event| matches!(
            event,
            GameEvent::FadeRequested { loop_seat, .. } if *loop_seat == seat(2)
        )));

        assert!(first.fade_ack(nonce));
        let (board_seat, nonce, cells) = next_fade(&mut events, seat(1)).await;
        assert_eq!(board_seat, seat(2));
        assert_eq!(cells, vec![Pos::new(LAST, 0)]);
        assert!(first.fade_ack(nonce));

        until(|| second.status().epoch() > 0).await;
        assert_eq!(right.lock().block(LAST, 0), Block::Empty);
        assert_eq!(left.lock().block(LAST, 4), Block::Empty);
        assert_eq!(left.lock().block(LAST, 5), Block::Empty);
        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_speed_drop_counts_down_per_piece() {
        let h = Harness::new(GameConfig::for_tests());
        let mut events = h.events();
        let peer = h.spawn(1, &shared(Board::new()), None, &LandingPermit::default());
        tokio::time::sleep(Duration::from_millis(1)).await;

        peer.send(LoopMessage::ApplyPower {
            id: 9001,
            from: seat(3),
            item: PowerBarItem::Diamond {
                diamond: SpecialDiamond::SpeedDrop,
            },
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        let hit = last_snapshot(&drain(&mut events), seat(1)).expect("seat state");
        assert_eq!(hit.speed_drop_remaining, SPEED_DROP_PIECES);
        assert_eq!(hit.speed, TickSpeed::SpeedDrop);

        until(|| peer.status().epoch() == 1 && peer.status().is_running()).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        let next = last_snapshot(&drain(&mut events), seat(1)).expect("seat state");
        assert_eq!(next.speed_drop_remaining, SPEED_DROP_PIECES - 1);
        assert_eq!(next.speed, TickSpeed::SpeedDrop);
        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_inputs_collapse_into_one_broadcast() {
        let h = Harness::new(GameConfig::for_tests());
        let mut events = h.events();
        let peer = h.spawn(1, &shared(Board::new()), None, &LandingPermit::default());
        tokio::time::sleep(Duration::from_millis(1)).await;
        drain(&mut events);

        peer.submit_input(InputAction::MoveLeft).unwrap();
        peer.submit_input(InputAction::MoveLeft).unwrap();
        peer.submit_input(InputAction::CycleColors).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        let states: Vec<SeatSnapshot> = drain(&mut events)
            .into_iter()
            .filter_map(|event| match event {
                GameEvent::SeatState { snapshot, .. } => Some(*snapshot),
                _ => None,
            })
            .collect();
        assert_eq!(states.len(), 1);
        let piece = states[0].piece.expect("falling piece");
        assert_eq!(piece.col, 0);
        assert_eq!(piece.cycle, 1);
        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_forwarded_blocks_reach_every_opposing_team() {
        let h = Harness::new(GameConfig::for_tests());
        let mut events = h.events();
        let source = shared(stacked(6, "..#OOO"));
        source.lock().set_forward_remaining(1);
        let targets: Vec<(u8, SharedBoard)> =
            [3, 4, 5].into_iter().map(|n| (n, shared(Board::new()))).collect();
        h.spawn(1, &source, None, &LandingPermit::default());
        for (n, board) in &targets {
            h.spawn(*n, board, None, &LandingPermit::default());
        }

        let sent = tokio::time::timeout(Duration::from_secs(30), async {
            let mut sent = BTreeMap::new();
            while sent.len() < 3 {
                let envelope = events.recv().await.expect("bus open");
                if let GameEvent::HooForwarded {
                    from, to, blocks, ..
                } = &envelope.event
                {
                    assert_eq!(*from, seat(1));
                    sent.insert(to.get(), *blocks);
                }
            }
            sent
        })
        .await
        .expect("hoo forwarded in time");
        tokio::time::sleep(Duration::from_millis(1)).await;

        // Team 3 gets the whole payload, team 2 splits it across seats 3 and 4
        let total = sent[&5];
        assert!(total >= 3);
        assert_eq!(sent[&3] + sent[&4], total);
        assert!(sent[&3] >= sent[&4]);
        for (n, board) in &targets {
            let board = board.lock();
            let placed: Vec<Block> = board
                .cells()
                .iter()
                .copied()
                .filter(|b| !b.is_empty())
                .collect();
            assert_eq!(placed.len(), sent[n]);
            assert!(placed.iter().all(|b| !b.is_stone() && b.power().is_none()));
        }
        assert_eq!(source.lock().forward_remaining(), 0);
        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_targets_follow_team_rules() {
        let h = Harness::new(GameConfig::for_tests());
        let mut events = h.events();
        let boards: Vec<SharedBoard> = (0..3).map(|_| shared(Board::new())).collect();
        let own = h.spawn(1, &boards[0], None, &LandingPermit::default());
        h.spawn(2, &boards[1], None, &LandingPermit::default());
        let opponent = h.spawn(3, &boards[2], None, &LandingPermit::default());
        let item = |kind| PowerBarItem::Block {
            letter: Letter::Y,
            power: Power {
                kind,
                level: PowerLevel::Minor,
            },
        };
        let step = || tokio::time::sleep(Duration::from_millis(5));

        own.send(LoopMessage::Grant {
            id: 9001,
            items: vec![item(PowerKind::Attack)],
        });
        own.use_power(seat(2)).unwrap(); // attack on a teammate: ignored
        own.use_power(seat(3)).unwrap();
        own.use_power(seat(3)).unwrap(); // bar is empty by now
        step().await;
        assert!(boards[2].lock().to_rows()[LAST].chars().all(|c| c != '.'));

        own.send(LoopMessage::Grant {
            id: 9002,
            items: vec![item(PowerKind::Defense)],
        });
        own.use_power(seat(3)).unwrap(); // defense on an opponent: ignored
        own.use_power(seat(2)).unwrap();
        step().await;

        opponent.stop();
        step().await;
        own.send(LoopMessage::Grant {
            id: 9003,
            items: vec![item(PowerKind::Attack)],
        });
        own.use_power(seat(3)).unwrap(); // target is out: ignored
        step().await;

        let seen = drain(&mut events);
        let applied: Vec<(SeatNumber, PowerKind)> = seen
            .iter()
            .filter_map(|event| match event {
                GameEvent::PowerApplied {
                    from,
                    to,
                    item: PowerBarItem::Block { power, .. },
                    ..
                } => {
                    assert_eq!(*from, seat(1));
                    Some((*to, power.kind))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            applied,
            vec![(seat(3), PowerKind::Attack), (seat(2), PowerKind::Defense)]
        );
        let bar = last_snapshot(&seen, seat(1)).expect("seat state").power_bar;
        assert_eq!(bar, vec![item(PowerKind::Attack)]);
        h.cancel.cancel();
    }
}
