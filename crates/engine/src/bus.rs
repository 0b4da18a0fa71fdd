//! Typed, topic-scoped event bus
//!
//! Every event is published under a [`Topic`] (a table or a single player).
//! A [`Subscription`] only yields events for the topics it follows; topics can
//! be added and removed as a client joins and leaves tables.
//!
//! Delivery is at-least-once from the consumer's point of view: a lagging
//! subscriber skips ahead and a reconnecting one may see events again, so
//! consumers must tolerate gaps and duplicates.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::warn;

use blockfall_core::SeatSnapshot;

use crate::notify::Notification;
use crate::round::RoundResult;
use crate::types::{Pos, PlayerId, PowerBarItem, RoundState, SeatNumber, TableId};

/// Buffered events per subscriber before it starts lagging
pub const BUS_CAPACITY: usize = 1024;

/// Event scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "scope", content = "id", rename_all = "lowercase")]
pub enum Topic {
    Table(TableId),
    Player(PlayerId),
}

/// Public view of one seat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeatView {
    pub seat: SeatNumber,
    pub player: Option<PlayerId>,
    pub ready: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum GameEvent {
    /// Latest state of one seat (coalesced)
    SeatState {
        table: TableId,
        snapshot: Box<SeatSnapshot>,
    },
    /// Seat occupancy, readiness or host changed
    TableChanged {
        table: TableId,
        host: Option<PlayerId>,
        seats: Vec<SeatView>,
    },
    RoundState {
        table: TableId,
        state: RoundState,
    },
    Countdown {
        table: TableId,
        remaining: u32,
    },
    /// Cells are pending removal; `loop_seat` waits for a `fadeAck` with `nonce`
    FadeRequested {
        table: TableId,
        loop_seat: SeatNumber,
        board_seat: SeatNumber,
        nonce: u64,
        cells: Vec<Pos>,
    },
    HooForwarded {
        table: TableId,
        from: SeatNumber,
        to: SeatNumber,
        blocks: usize,
    },
    PowerApplied {
        table: TableId,
        from: SeatNumber,
        to: SeatNumber,
        item: PowerBarItem,
    },
    SeatGameOver {
        table: TableId,
        seat: SeatNumber,
    },
    RoundResult {
        table: TableId,
        result: RoundResult,
    },
    Notification {
        player: PlayerId,
        notification: Notification,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub topic: Topic,
    #[serde(flatten)]
    pub event: GameEvent,
}

/// Process-wide event bus
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Arc<Envelope>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, topic: Topic, event: GameEvent) {
        let _ = self.tx.send(Arc::new(Envelope { topic, event }));
    }

    pub fn subscribe(&self, topics: impl IntoIterator<Item = Topic>) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            topics: topics.into_iter().collect(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Filtered view of the bus
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<Arc<Envelope>>,
    topics: HashSet<Topic>,
}

impl Subscription {
    pub fn follow(&mut self, topic: Topic) {
        self.topics.insert(topic);
    }

    pub fn unfollow(&mut self, topic: Topic) {
        self.topics.remove(&topic);
    }

    pub fn follows(&self, topic: &Topic) -> bool {
        self.topics.contains(topic)
    }

    /// Next event on a followed topic. None once the bus is gone.
    pub async fn recv(&mut self) -> Option<Arc<Envelope>> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) if self.topics.contains(&envelope.topic) => return Some(envelope),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "bus subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`Subscription::recv`]
    pub fn try_recv(&mut self) -> Option<Arc<Envelope>> {
        loop {
            match self.rx.try_recv() {
                Ok(envelope) if self.topics.contains(&envelope.topic) => return Some(envelope),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscription_filters_by_topic() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe([Topic::Table(TableId(1))]);

        bus.publish(
            Topic::Table(TableId(2)),
            GameEvent::Countdown {
                table: TableId(2),
                remaining: 3,
            },
        );
        bus.publish(
            Topic::Table(TableId(1)),
            GameEvent::Countdown {
                table: TableId(1),
                remaining: 2,
            },
        );

        let envelope = sub.recv().await.unwrap();
        assert_eq!(envelope.topic, Topic::Table(TableId(1)));
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_envelope_serializes_flat() {
        let envelope = Envelope {
            topic: Topic::Table(TableId(4)),
            event: GameEvent::RoundState {
                table: TableId(4),
                state: RoundState::Countdown,
            },
        };
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["event"], "roundState");
        assert_eq!(value["state"], "COUNTDOWN");
        assert_eq!(value["topic"]["scope"], "table");
    }
}
