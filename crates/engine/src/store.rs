//! Persistence collaborator
//!
//! The engine only needs find-by-id and upsert. [`InMemoryStore`] backs tests
//! and the reference server.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::types::{PlayerId, RoomId, TableId, Visibility, DEFAULT_RATING};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: PlayerId,
    pub name: String,
    pub rating: i32,
    pub wins: u32,
    pub losses: u32,
    pub reward_codes: Vec<String>,
}

impl PlayerRecord {
    pub fn new(id: PlayerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            rating: DEFAULT_RATING,
            wins: 0,
            losses: 0,
            reward_codes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRecord {
    pub id: TableId,
    pub room: RoomId,
    pub host: Option<PlayerId>,
    pub visibility: Visibility,
    pub rated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRecord {
    pub id: RoomId,
    pub name: String,
}

pub trait PlayerStore: Send + Sync {
    fn create_player(&self, name: &str) -> PlayerRecord;
    fn find_player(&self, id: PlayerId) -> Option<PlayerRecord>;
    fn upsert_player(&self, record: PlayerRecord);

    /// Stored rating, or the default for unknown players
    fn rating(&self, id: PlayerId) -> i32 {
        self.find_player(id)
            .map(|p| p.rating)
            .unwrap_or(DEFAULT_RATING)
    }

    /// Bump the win or loss counter, creating the record if needed
    fn record_result(&self, id: PlayerId, won: bool) {
        let mut record = self
            .find_player(id)
            .unwrap_or_else(|| PlayerRecord::new(id, id.to_string()));
        if won {
            record.wins += 1;
        } else {
            record.losses += 1;
        }
        self.upsert_player(record);
    }
}

pub trait TableStore: Send + Sync {
    fn find_table(&self, id: TableId) -> Option<TableRecord>;
    fn upsert_table(&self, record: TableRecord);
    fn delete_table(&self, id: TableId);
    fn find_room(&self, id: RoomId) -> Option<RoomRecord>;
    fn upsert_room(&self, record: RoomRecord);
}

/// DashMap-backed store
#[derive(Debug, Default)]
pub struct InMemoryStore {
    players: DashMap<PlayerId, PlayerRecord>,
    tables: DashMap<TableId, TableRecord>,
    rooms: DashMap<RoomId, RoomRecord>,
    next_player: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }
}

impl PlayerStore for InMemoryStore {
    fn create_player(&self, name: &str) -> PlayerRecord {
        let id = PlayerId(self.next_player.fetch_add(1, Ordering::Relaxed) + 1);
        let record = PlayerRecord::new(id, name);
        self.players.insert(id, record.clone());
        record
    }

    fn find_player(&self, id: PlayerId) -> Option<PlayerRecord> {
        self.players.get(&id).map(|p| p.clone())
    }

    fn upsert_player(&self, record: PlayerRecord) {
        self.players.insert(record.id, record);
    }
}

impl TableStore for InMemoryStore {
    fn find_table(&self, id: TableId) -> Option<TableRecord> {
        self.tables.get(&id).map(|t| t.clone())
    }

    fn upsert_table(&self, record: TableRecord) {
        self.tables.insert(record.id, record);
    }

    fn delete_table(&self, id: TableId) {
        self.tables.remove(&id);
    }

    fn find_room(&self, id: RoomId) -> Option<RoomRecord> {
        self.rooms.get(&id).map(|r| r.clone())
    }

    fn upsert_room(&self, record: RoomRecord) {
        self.rooms.insert(record.id, record);
    }
}
