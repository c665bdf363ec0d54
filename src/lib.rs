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


//! # Rider Ledger
//!
//! Cash ledger and settlement engine for delivery riders. Tracks the cash a
//! rider holds after cash-on-delivery orders, what the rider is owed, whether
//! the rider is within exposure limits, and a daily delivery-count bonus that
//! is credited exactly once per rider per day.
//!
//! ## Core Components
//!
//! - [`Engine`]: Per-rider accounts; `post_delivery`, `settle`, `set_blocked`, `increment_bonus`
//! - [`Account`]: One rider's balances, transaction log and bonus days
//! - [`SettlementPolicy`]: Threshold and grace-period rule behind active/overdue
//! - [`OrderCompletionIngestor`]: Entry point for delivered orders
//! - [`NotificationPublisher`]: Best-effort event fan-out to admin observers
//! - [`AdminQueryService`]: Per-rider and fleet read models
//! - [`LedgerError`]: Error types for rejected operations
//!
//! ## Example
//!
//! ```
//! use rider_ledger::{AdminContext, Engine, OrderId, RiderId};
//!
//! let engine = Engine::new();
//!
//! // Rider collects 500 in cash: 50 is their fee, 450 belongs to the platform.
//! engine.post_delivery(RiderId(1), OrderId(1), 500, 50, 450).unwrap();
//!
//! let account = engine.get_account(&RiderId(1)).unwrap();
//! assert_eq!(account.cod_balance(), 500);
//!
//! // The rider hands the cash in.
//! engine
//!     .settle(RiderId(1), 500, 0, &AdminContext::new("ops"))
//!     .unwrap();
//! assert_eq!(account.cod_balance(), 0);
//! ```
//!
//! ## Thread Safety
//!
//! Each rider's account has its own lock, so deliveries and admin actions for
//! different riders proceed in parallel. Readers use the snapshot published
//! at each commit and never wait on a writer.

pub mod account;
mod base;
pub mod bonus;
pub mod clock;
pub mod config;
mod engine;
pub mod error;
pub mod ingestor;
pub mod notify;
pub mod query;
pub mod settlement;
mod shared_log;
mod transaction;

pub use account::{Account, RiderSnapshot};
pub use base::{Money, OrderId, RiderId, SettlementId, TransactionId};
pub use bonus::{BonusOutcome, BonusProgress, BonusRule};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use engine::{AdminContext, Committed, Engine};
pub use error::{ConfigError, LedgerError};
pub use ingestor::{DeliveryCompleted, DeliveryReceipt, DeliverySplit, FeeSchedule, OrderCompletionIngestor};
pub use notify::{LedgerEvent, NotificationConfig, NotificationPublisher, Subscription};
pub use query::{AdminQueryService, FleetTotals, PendingBreakdown, PendingLine, RiderSummary};
pub use settlement::{SettlementPolicy, SettlementStatus};
pub use shared_log::LogView;
pub use transaction::{LedgerTransaction, PostOutcome, SettlementBatch, TransactionStatus};
