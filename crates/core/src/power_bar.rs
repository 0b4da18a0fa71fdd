//! Per-seat queue of earned ability items

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::types::{PowerBarItem, POWER_BAR_CAPACITY};

/// Ordered queue of earned items, oldest first.
///
/// When full, adding an item evicts the oldest one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerBar {
    items: VecDeque<PowerBarItem>,
    capacity: usize,
}

impl PowerBar {
    pub fn new() -> Self {
        Self::with_capacity(POWER_BAR_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Append an item. Returns the evicted item if the bar was full
    pub fn add_item(&mut self, item: PowerBarItem) -> Option<PowerBarItem> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Dequeue the oldest letter-block item, skipping special diamonds
    pub fn remove_piece_block_item(&mut self) -> Option<PowerBarItem> {
        let idx = self.items.iter().position(|item| !item.is_diamond())?;
        self.items.remove(idx)
    }

    /// Dequeue the oldest item of any kind
    pub fn pop_front(&mut self) -> Option<PowerBarItem> {
        self.items.pop_front()
    }

    pub fn front(&self) -> Option<&PowerBarItem> {
        self.items.front()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> impl Iterator<Item = &PowerBarItem> {
        self.items.iter()
    }
}

impl Default for PowerBar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Letter, Power, PowerKind, PowerLevel, SpecialDiamond};

    fn block_item(letter: Letter) -> PowerBarItem {
        PowerBarItem::Block {
            letter,
            power: Power {
                kind: PowerKind::Attack,
                level: PowerLevel::Minor,
            },
        }
    }

    #[test]
    fn test_remove_piece_block_item_skips_diamonds() {
        let mut bar = PowerBar::new();
        bar.add_item(PowerBarItem::Diamond {
            diamond: SpecialDiamond::SpeedDrop,
        });
        bar.add_item(block_item(Letter::O));
        bar.add_item(block_item(Letter::U));

        assert_eq!(bar.remove_piece_block_item(), Some(block_item(Letter::O)));
        assert_eq!(bar.len(), 2);
        assert!(bar.front().unwrap().is_diamond());
    }

    #[test]
    fn test_full_bar_evicts_oldest() {
        let mut bar = PowerBar::with_capacity(2);
        bar.add_item(block_item(Letter::Y));
        bar.add_item(block_item(Letter::O));
        let evicted = bar.add_item(block_item(Letter::U));
        assert_eq!(evicted, Some(block_item(Letter::Y)));
        assert_eq!(bar.len(), 2);
    }
}
