//! Table and room registry
//!
//! One registry per server process (or per test). Rooms group tables; each
//! table has an orchestrator plus the driver task feeding it.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::CommandError;
use crate::orchestrator::{spawn_table_driver, Orchestrator, SharedOrchestrator};
use crate::services::Services;
use crate::store::RoomRecord;
use crate::table::Table;
use crate::types::{RoomId, TableId, Visibility};

/// A live table
#[derive(Debug, Clone)]
pub struct TableHandle {
    pub id: TableId,
    pub room: RoomId,
    orchestrator: SharedOrchestrator,
    cancel: CancellationToken,
}

impl TableHandle {
    pub fn orchestrator(&self) -> &SharedOrchestrator {
        &self.orchestrator
    }
}

#[derive(Debug, Default)]
struct RoomEntry {
    tables: BTreeSet<TableId>,
}

#[derive(Debug)]
pub struct Registry {
    services: Arc<Services>,
    rooms: DashMap<RoomId, RoomEntry>,
    tables: DashMap<TableId, TableHandle>,
    next_room: AtomicU64,
    next_table: AtomicU64,
}

impl Registry {
    pub fn new(services: Arc<Services>) -> Self {
        Self {
            services,
            rooms: DashMap::new(),
            tables: DashMap::new(),
            next_room: AtomicU64::new(0),
            next_table: AtomicU64::new(0),
        }
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn create_room(&self, name: &str) -> RoomId {
        let id = RoomId(self.next_room.fetch_add(1, Ordering::Relaxed) + 1);
        self.rooms.insert(id, RoomEntry::default());
        self.services.tables.upsert_room(RoomRecord {
            id,
            name: name.to_string(),
        });
        info!(room = %id, name, "room created");
        id
    }

    pub fn has_room(&self, room: RoomId) -> bool {
        self.rooms.contains_key(&room)
    }

    pub fn rooms(&self) -> Vec<RoomId> {
        let mut rooms: Vec<RoomId> = self.rooms.iter().map(|r| *r.key()).collect();
        rooms.sort();
        rooms
    }

    /// Create a table and start its driver. Must run inside a tokio runtime.
    pub fn create_table(
        &self,
        room: RoomId,
        visibility: Visibility,
        rated: bool,
    ) -> Result<TableHandle, CommandError> {
        let mut entry = self
            .rooms
            .get_mut(&room)
            .ok_or(CommandError::RoomNotFound(room))?;

        let id = TableId(self.next_table.fetch_add(1, Ordering::Relaxed) + 1);
        let table = Table::new(id, room, visibility, rated);
        self.services.tables.upsert_table(table.record());

        let cancel = CancellationToken::new();
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let orchestrator = Arc::new(Mutex::new(Orchestrator::new(
            table,
            Arc::clone(&self.services),
            report_tx,
            cancel.clone(),
        )));
        spawn_table_driver(Arc::clone(&orchestrator), report_rx, cancel.clone());

        let handle = TableHandle {
            id,
            room,
            orchestrator,
            cancel,
        };
        entry.tables.insert(id);
        self.tables.insert(id, handle.clone());
        info!(table = %id, room = %room, ?visibility, rated, "table created");
        Ok(handle)
    }

    pub fn get(&self, id: TableId) -> Result<TableHandle, CommandError> {
        self.tables
            .get(&id)
            .map(|t| t.clone())
            .ok_or(CommandError::TableNotFound(id))
    }

    pub fn tables_in_room(&self, room: RoomId) -> Result<Vec<TableHandle>, CommandError> {
        let ids: Vec<TableId> = self
            .rooms
            .get(&room)
            .ok_or(CommandError::RoomNotFound(room))?
            .tables
            .iter()
            .copied()
            .collect();
        Ok(ids.into_iter().filter_map(|id| self.get(id).ok()).collect())
    }

    /// Stop the table's loops and timers and forget it
    pub fn destroy_table(&self, id: TableId) {
        let Some((_, handle)) = self.tables.remove(&id) else {
            return;
        };
        handle.orchestrator.lock().shutdown();
        handle.cancel.cancel();
        if let Some(mut room) = self.rooms.get_mut(&handle.room) {
            room.tables.remove(&id);
        }
        self.services.tables.delete_table(id);
        info!(table = %id, "table destroyed");
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Tear down every table
    pub fn shutdown(&self) {
        let ids: Vec<TableId> = self.tables.iter().map(|t| *t.key()).collect();
        for id in ids {
            self.destroy_table(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;

    #[tokio::test]
    async fn test_create_and_destroy_table() {
        let registry = Registry::new(Arc::new(Services::in_memory(GameConfig::for_tests())));
        let room = registry.create_room("lobby");
        let table = registry
            .create_table(room, Visibility::Public, false)
            .unwrap();

        assert_eq!(registry.tables_in_room(room).unwrap().len(), 1);
        assert!(registry.services().tables.find_table(table.id).is_some());

        registry.destroy_table(table.id);
        assert!(registry.tables_in_room(room).unwrap().is_empty());
        assert_eq!(registry.get(table.id).unwrap_err(), CommandError::TableNotFound(table.id));
        assert!(table.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_unknown_room_is_rejected() {
        let registry = Registry::new(Arc::new(Services::in_memory(GameConfig::for_tests())));
        let err = registry
            .create_table(RoomId(9), Visibility::Public, false)
            .unwrap_err();
        assert_eq!(err, CommandError::RoomNotFound(RoomId(9)));
    }
}
