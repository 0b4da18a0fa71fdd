//! Collaborators shared by every table of a server process

use std::sync::Arc;

use blockfall_core::{Detectors, PowerEffectRegistry};

use crate::bus::EventBus;
use crate::config::GameConfig;
use crate::notify::{BusNotifier, Notifier};
use crate::rating::RatingEngine;
use crate::store::{InMemoryStore, PlayerStore, TableStore};

pub struct Services {
    pub config: GameConfig,
    pub bus: EventBus,
    pub players: Arc<dyn PlayerStore>,
    pub tables: Arc<dyn TableStore>,
    pub notifier: Arc<dyn Notifier>,
    pub powers: PowerEffectRegistry,
    pub detectors: Detectors,
    pub rating: RatingEngine,
}

impl Services {
    /// In-memory persistence and bus-delivered notifications
    pub fn in_memory(config: GameConfig) -> Self {
        let bus = EventBus::new();
        let store = Arc::new(InMemoryStore::new());
        Self {
            rating: RatingEngine::new(config.k_factor),
            config,
            notifier: Arc::new(BusNotifier::new(bus.clone())),
            bus,
            players: store.clone(),
            tables: store,
            powers: PowerEffectRegistry::default(),
            detectors: Detectors::default(),
        }
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("config", &self.config)
            .field("powers", &self.powers)
            .finish_non_exhaustive()
    }
}
