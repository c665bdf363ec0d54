// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Best-effort fan-out of ledger events to admin observers.
//!
//! Every subscriber owns a bounded channel. Publishing never blocks: a
//! subscriber whose buffer is full misses that event, and a subscriber whose
//! receiver was dropped is pruned. Observers reconcile through the query
//! service, using the account `version` carried by each event to spot gaps.

use crate::base::{Money, OrderId, RiderId};
use crate::bonus::BonusProgress;
use crate::settlement::SettlementStatus;
use crossbeam::channel::{self, Receiver, Sender, TryRecvError, TrySendError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NotificationConfig {
    /// Events buffered per subscriber before new ones are dropped.
    pub channel_capacity: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    OrderUpdated {
        rider_id: RiderId,
        order_id: OrderId,
        cod_collected: Money,
        rider_earning: Money,
        version: u64,
    },
    BonusProgressUpdated {
        rider_id: RiderId,
        progress: BonusProgress,
        version: u64,
    },
    BonusAchieved {
        rider_id: RiderId,
        progress: BonusProgress,
        version: u64,
    },
    StatsUpdated {
        rider_id: RiderId,
        cod_balance: Money,
        earnings_balance: Money,
        settlement_status: SettlementStatus,
        version: u64,
    },
}

impl LedgerEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::OrderUpdated { .. } => "order_updated",
            Self::BonusProgressUpdated { .. } => "bonus_progress_updated",
            Self::BonusAchieved { .. } => "bonus_achieved",
            Self::StatsUpdated { .. } => "stats_updated",
        }
    }

    pub fn rider_id(&self) -> RiderId {
        match self {
            Self::OrderUpdated { rider_id, .. }
            | Self::BonusProgressUpdated { rider_id, .. }
            | Self::BonusAchieved { rider_id, .. }
            | Self::StatsUpdated { rider_id, .. } => *rider_id,
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            Self::OrderUpdated { version, .. }
            | Self::BonusProgressUpdated { version, .. }
            | Self::BonusAchieved { version, .. }
            | Self::StatsUpdated { version, .. } => *version,
        }
    }
}

/// Receiving end handed to an observer.
#[derive(Debug)]
pub struct Subscription {
    receiver: Receiver<LedgerEvent>,
}

impl Subscription {
    /// Next buffered event, if any.
    pub fn try_next(&self) -> Option<LedgerEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Blocks until the next event. `None` once the publisher is gone.
    pub fn recv(&self) -> Option<LedgerEvent> {
        self.receiver.recv().ok()
    }

    /// Waits up to `timeout` for the next event.
    pub fn next_timeout(&self, timeout: Duration) -> Option<LedgerEvent> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Drains everything buffered so far.
    pub fn drain(&self) -> Vec<LedgerEvent> {
        self.receiver.try_iter().collect()
    }
}

#[derive(Debug)]
pub struct NotificationPublisher {
    subscribers: RwLock<Vec<Sender<LedgerEvent>>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl NotificationPublisher {
    pub fn new(config: &NotificationConfig) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            capacity: config.channel_capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = channel::bounded(self.capacity);
        self.subscribers.write().push(sender);
        Subscription { receiver }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Events lost to full buffers since startup.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Sends `event` to every live subscriber without blocking.
    pub fn publish(&self, event: LedgerEvent) {
        let mut disconnected = Vec::new();
        {
            let subscribers = self.subscribers.read();
            for sender in subscribers.iter() {
                match sender.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            event = event.name(),
                            rider_id = %event.rider_id(),
                            "subscriber buffer full, event dropped"
                        );
                    }
                    Err(TrySendError::Disconnected(_)) => disconnected.push(sender.clone()),
                }
            }
        }
        if !disconnected.is_empty() {
            self.subscribers
                .write()
                .retain(|sender| !disconnected.iter().any(|dead| dead.same_channel(sender)));
        }
        trace!(event = event.name(), version = event.version(), "event published");
    }

    pub fn publish_all(&self, events: impl IntoIterator<Item = LedgerEvent>) {
        for event in events {
            self.publish(event);
        }
    }
}

impl Default for NotificationPublisher {
    fn default() -> Self {
        Self::new(&NotificationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(version: u64) -> LedgerEvent {
        LedgerEvent::StatsUpdated {
            rider_id: RiderId(1),
            cod_balance: 0,
            earnings_balance: 0,
            settlement_status: SettlementStatus::Active,
            version,
        }
    }

    #[test]
    fn every_subscriber_receives_event() {
        let publisher = NotificationPublisher::default();
        let a = publisher.subscribe();
        let b = publisher.subscribe();

        publisher.publish(stats(1));

        assert_eq!(a.try_next(), Some(stats(1)));
        assert_eq!(b.try_next(), Some(stats(1)));
    }

    #[test]
    fn full_buffer_drops_without_blocking() {
        let publisher = NotificationPublisher::new(&NotificationConfig {
            channel_capacity: 2,
        });
        let sub = publisher.subscribe();

        publisher.publish_all((1..=5).map(stats));

        let received: Vec<u64> = sub.drain().iter().map(LedgerEvent::version).collect();
        assert_eq!(received, vec![1, 2]);
        assert_eq!(publisher.dropped(), 3);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let publisher = NotificationPublisher::default();
        let kept = publisher.subscribe();
        drop(publisher.subscribe());
        assert_eq!(publisher.subscriber_count(), 2);

        publisher.publish(stats(1));

        assert_eq!(publisher.subscriber_count(), 1);
        assert_eq!(kept.try_next(), Some(stats(1)));
    }

    #[test]
    fn publishing_without_subscribers_is_a_no_op() {
        let publisher = NotificationPublisher::default();
        publisher.publish(stats(1));
        assert_eq!(publisher.dropped(), 0);
    }

    #[test]
    fn event_names_match_wire_names() {
        assert_eq!(stats(1).name(), "stats_updated");
        let json = serde_json::to_value(stats(1)).unwrap();
        assert_eq!(json["event"], "stats_updated");
    }
}
