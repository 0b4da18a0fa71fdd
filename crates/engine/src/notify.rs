//! Notification collaborator
//!
//! The engine hands structured payloads to a [`Notifier`]; how (and whether)
//! they reach the player is up to the implementation.

use serde::Serialize;

use crate::bus::{EventBus, GameEvent, Topic};
use crate::types::{PlayerId, TableId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Notification {
    Invitation { table: TableId, from: PlayerId },
    Booted { table: TableId, by: PlayerId },
    RatingChanged { table: TableId, old: i32, new: i32 },
    RewardCode { table: TableId, code: String },
}

pub trait Notifier: Send + Sync {
    fn notify(&self, player: PlayerId, notification: Notification);
}

/// Delivers notifications as player-scoped bus events
#[derive(Debug, Clone)]
pub struct BusNotifier {
    bus: EventBus,
}

impl BusNotifier {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

impl Notifier for BusNotifier {
    fn notify(&self, player: PlayerId, notification: Notification) {
        self.bus.publish(
            Topic::Player(player),
            GameEvent::Notification {
                player,
                notification,
            },
        );
    }
}
