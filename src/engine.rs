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


use crate::account::{Account, RiderSnapshot, validate_split};
use crate::base::{Money, OrderId, RiderId};
use crate::bonus::BonusOutcome;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::notify::{LedgerEvent, NotificationPublisher, Subscription};
use crate::settlement::SettlementStatus;
use crate::transaction::{PostOutcome, SettlementBatch};
use crate::LedgerError;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Request-scoped identity of an admin command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminContext {
    /// Who is acting, recorded on settlement batches.
    pub actor: String,
    /// Account version the actor last saw. When set, the command fails with
    /// [`LedgerError::ConcurrentMutationConflict`] if the account moved on.
    pub expected_version: Option<u64>,
}

impl AdminContext {
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            expected_version: None,
        }
    }

    pub fn at_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }
}

/// Outcome of a command together with the account state it committed.
#[derive(Debug, Clone)]
pub struct Committed<T> {
    pub outcome: T,
    pub snapshot: Arc<RiderSnapshot>,
}

/// The rider ledger.
///
/// Holds one [`Account`] per rider. Commands on the same rider serialize on
/// that rider's lock; commands on different riders only share a brief
/// lookup in the account map.
pub struct Engine {
    accounts: DashMap<RiderId, Arc<Account>>,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    publisher: NotificationPublisher,
}

impl Engine {
    /// Creates an engine with default configuration and the system clock.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let publisher = NotificationPublisher::new(&config.notifications);
        Engine {
            accounts: DashMap::new(),
            config,
            clock,
            publisher,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Business date of the current instant, for bonus bookkeeping.
    pub fn business_date(&self) -> NaiveDate {
        self.config.bonus.business_date(self.now())
    }

    pub fn publisher(&self) -> &NotificationPublisher {
        &self.publisher
    }

    pub fn subscribe(&self) -> Subscription {
        self.publisher.subscribe()
    }

    /// Retrieves a rider's account.
    ///
    /// The map guard is dropped before returning, so holding the account
    /// never blocks access to other riders.
    pub fn get_account(&self, rider_id: &RiderId) -> Option<Arc<Account>> {
        self.accounts.get(rider_id).map(|entry| Arc::clone(entry.value()))
    }

    fn account_or_create(&self, rider_id: RiderId) -> Arc<Account> {
        if let Some(account) = self.get_account(&rider_id) {
            return account;
        }
        let account = self
            .accounts
            .entry(rider_id)
            .or_insert_with(|| {
                debug!(rider_id = %rider_id, "opening ledger account");
                Arc::new(Account::new(rider_id))
            });
        Arc::clone(account.value())
    }

    /// All accounts, in no particular order.
    pub fn accounts(&self) -> Vec<Arc<Account>> {
        self.accounts
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn rider_count(&self) -> usize {
        self.accounts.len()
    }

    /// Current settlement status. Riders without an account are active.
    pub fn status(&self, rider_id: &RiderId) -> SettlementStatus {
        self.get_account(rider_id)
            .map(|account| account.status())
            .unwrap_or_default()
    }

    /// Records the cash effect of a delivered order.
    ///
    /// A repeated `order_id` for the same rider is absorbed and returns the
    /// recorded transaction as [`PostOutcome::Duplicate`].
    ///
    /// # Errors
    ///
    /// - [`LedgerError::RiderBlocked`] - Rider is blocked.
    /// - [`LedgerError::InvalidSplit`] - Figures are negative or don't add up.
    /// - [`LedgerError::InvalidAmount`] - A balance would overflow.
    pub fn post_delivery(
        &self,
        rider_id: RiderId,
        order_id: OrderId,
        cod_collected: Money,
        rider_earning: Money,
        admin_net: Money,
    ) -> Result<Committed<PostOutcome>, LedgerError> {
        let account = match self.get_account(&rider_id) {
            Some(account) => account,
            None => {
                // Reject bad figures before an account is opened for them.
                validate_split(cod_collected, rider_earning, admin_net)?;
                self.account_or_create(rider_id)
            }
        };
        let now = self.now();

        let (outcome, snapshot) = account
            .post_delivery(
                order_id,
                cod_collected,
                rider_earning,
                admin_net,
                &self.config.settlement,
                now,
            )
            .inspect_err(|e| warn!(rider_id = %rider_id, order_id = %order_id, error = %e, "delivery rejected"))?;

        match &outcome {
            PostOutcome::Duplicate(_) => {
                debug!(rider_id = %rider_id, order_id = %order_id, "duplicate delivery absorbed");
            }
            PostOutcome::Recorded(tx) => {
                info!(
                    rider_id = %rider_id,
                    order_id = %order_id,
                    cod_collected = tx.cod_collected,
                    rider_earning = tx.rider_earning,
                    version = snapshot.version,
                    "delivery posted"
                );
                self.publisher.publish(LedgerEvent::OrderUpdated {
                    rider_id,
                    order_id,
                    cod_collected: tx.cod_collected,
                    rider_earning: tx.rider_earning,
                    version: snapshot.version,
                });
                self.publish_stats(&snapshot);
            }
        }
        Ok(Committed { outcome, snapshot })
    }

    /// Takes `amount_collected` cash from the rider and pays out
    /// `earnings_paid`, clearing the oldest pending transactions the cash
    /// covers.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] - Either figure is negative.
    /// - [`LedgerError::InsufficientBalance`] - More cash than the rider holds,
    ///   or more earnings than the rider is owed.
    /// - [`LedgerError::RiderNotFound`] - No account for the rider.
    /// - [`LedgerError::ConcurrentMutationConflict`] - `ctx.expected_version` is stale.
    pub fn settle(
        &self,
        rider_id: RiderId,
        amount_collected: Money,
        earnings_paid: Money,
        ctx: &AdminContext,
    ) -> Result<Committed<SettlementBatch>, LedgerError> {
        let account = self
            .get_account(&rider_id)
            .ok_or(LedgerError::RiderNotFound)?;
        let (batch, snapshot) = account
            .settle(
                amount_collected,
                earnings_paid,
                &ctx.actor,
                ctx.expected_version,
                &self.config.settlement,
                self.now(),
            )
            .inspect_err(|e| warn!(rider_id = %rider_id, actor = %ctx.actor, error = %e, "settlement rejected"))?;

        info!(
            rider_id = %rider_id,
            settlement_id = %batch.id,
            amount_collected,
            earnings_paid,
            cleared = batch.cleared.len(),
            actor = %ctx.actor,
            version = snapshot.version,
            "rider settled"
        );
        self.publish_stats(&snapshot);
        Ok(Committed {
            outcome: batch,
            snapshot,
        })
    }

    /// Blocks or unblocks a rider. The outcome reports whether the status
    /// changed; repeating the current setting is a no-op.
    ///
    /// Unblocking returns the rider to active and then applies the usual
    /// balance rule, so a rider still holding too much cash lands in overdue.
    pub fn set_blocked(
        &self,
        rider_id: RiderId,
        blocked: bool,
        ctx: &AdminContext,
    ) -> Result<Committed<bool>, LedgerError> {
        let account = self.account_or_create(rider_id);
        let (changed, snapshot) =
            account.set_blocked(blocked, ctx.expected_version, &self.config.settlement, self.now())?;
        if changed {
            info!(
                rider_id = %rider_id,
                blocked,
                status = snapshot.settlement_status.as_str(),
                actor = %ctx.actor,
                "rider block flag changed"
            );
            self.publish_stats(&snapshot);
        }
        Ok(Committed {
            outcome: changed,
            snapshot,
        })
    }

    /// Counts a delivered order towards the rider's daily bonus.
    ///
    /// Idempotent per `(rider_id, order_id)`. The increment that reaches the
    /// day's target credits the bonus to the rider's earnings in the same
    /// critical section, so exactly one caller ever credits a given day.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] - The credit would overflow the
    ///   rider's earnings; the order is not counted.
    pub fn increment_bonus(
        &self,
        rider_id: RiderId,
        order_id: OrderId,
        date: NaiveDate,
    ) -> Result<Committed<BonusOutcome>, LedgerError> {
        let account = self.account_or_create(rider_id);
        let (outcome, snapshot) = account
            .increment_bonus(
                order_id,
                date,
                &self.config.bonus,
                &self.config.settlement,
                self.now(),
            )
            .inspect_err(|e| warn!(rider_id = %rider_id, order_id = %order_id, error = %e, "bonus increment rejected"))?;

        if !outcome.is_duplicate() {
            let progress = outcome.progress().clone();
            self.publisher.publish(LedgerEvent::BonusProgressUpdated {
                rider_id,
                progress: progress.clone(),
                version: snapshot.version,
            });
            if outcome.credited().is_some() {
                self.publisher.publish(LedgerEvent::BonusAchieved {
                    rider_id,
                    progress,
                    version: snapshot.version,
                });
                self.publish_stats(&snapshot);
            }
        }
        Ok(Committed { outcome, snapshot })
    }

    /// Re-applies the automatic status rule to every account, so grace
    /// periods that lapse without any ledger activity are noticed.
    ///
    /// Returns `(rider, from, to)` for each rider whose status changed.
    pub fn refresh_statuses(&self) -> Vec<(RiderId, SettlementStatus, SettlementStatus)> {
        let now = self.now();
        let mut changed = Vec::new();
        for account in self.accounts() {
            if let Some((from, snapshot)) = account.refresh_status(&self.config.settlement, now) {
                self.publish_stats(&snapshot);
                changed.push((snapshot.rider_id, from, snapshot.settlement_status));
            }
        }
        if !changed.is_empty() {
            info!(changed = changed.len(), "settlement statuses refreshed");
        }
        changed
    }

    fn publish_stats(&self, snapshot: &RiderSnapshot) {
        self.publisher.publish(LedgerEvent::StatsUpdated {
            rider_id: snapshot.rider_id,
            cod_balance: snapshot.cod_balance,
            earnings_balance: snapshot.earnings_balance,
            settlement_status: snapshot.settlement_status,
            version: snapshot.version,
        });
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
