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


use crate::base::{Money, OrderId, RiderId, SettlementId, TransactionId};
use crate::bonus::{BonusBook, BonusOutcome, BonusProgress, BonusRule};
use crate::settlement::{Exposure, SettlementPolicy, SettlementStatus};
use crate::shared_log::{LogView, SharedLog};
use crate::transaction::{LedgerTransaction, PostOutcome, SettlementBatch, TransactionStatus};
use crate::LedgerError;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug)]
struct AccountData {
    rider_id: RiderId,
    cod_balance: Money,
    earnings_balance: Money,
    status: SettlementStatus,
    last_settlement_date: Option<DateTime<Utc>>,
    /// Cash received at a settlement that did not cover the next whole
    /// pending transaction. Applied first at the next settlement.
    settlement_credit: Money,
    /// When the first cash order was posted. Nothing is cleared before the
    /// first settlement, so until then this is the oldest pending cash.
    first_cash_at: Option<DateTime<Utc>>,
    /// Bumped by every committed mutation.
    version: u64,
    /// Transactions as recorded, in commit order. Settlement clears a
    /// prefix, so entries from `first_pending` on are exactly the pending
    /// ones; settled entries take their status from the batch that cleared
    /// them.
    transactions: SharedLog<LedgerTransaction>,
    first_pending: usize,
    /// Order -> position in `transactions`.
    by_order: HashMap<OrderId, usize>,
    settlements: SharedLog<SettlementBatch>,
    /// `first_pending` after each batch, parallel to `settlements`.
    settled_through: Vec<usize>,
    bonus: BonusBook,
}

impl AccountData {
    fn new(rider_id: RiderId) -> Self {
        Self {
            rider_id,
            cod_balance: 0,
            earnings_balance: 0,
            status: SettlementStatus::Active,
            last_settlement_date: None,
            settlement_credit: 0,
            first_cash_at: None,
            version: 0,
            transactions: SharedLog::default(),
            first_pending: 0,
            by_order: HashMap::new(),
            settlements: SharedLog::default(),
            settled_through: Vec::new(),
            bonus: BonusBook::default(),
        }
    }

    /// Checks that the cached balances agree with a replay of the log.
    fn assert_invariants(&self) {
        if !cfg!(debug_assertions) {
            return;
        }
        let pending_cod: Money = self.pending().map(|tx| tx.cod_collected).sum();
        let earned: Money = self.transactions.iter().map(|tx| tx.rider_earning).sum();
        let paid: Money = self.settlements.iter().map(|b| b.earnings_paid).sum();

        debug_assert!(
            self.cod_balance >= 0,
            "Invariant violated: cod balance went negative: {}",
            self.cod_balance
        );
        debug_assert!(
            self.settlement_credit >= 0,
            "Invariant violated: settlement credit went negative: {}",
            self.settlement_credit
        );
        debug_assert_eq!(
            self.cod_balance + self.settlement_credit,
            pending_cod,
            "Invariant violated: cod balance diverged from pending transactions"
        );
        debug_assert_eq!(
            self.earnings_balance,
            earned + self.bonus.credited_total() - paid,
            "Invariant violated: earnings balance diverged from the log"
        );
        debug_assert_eq!(
            self.settled_through.len(),
            self.settlements.len(),
            "Invariant violated: settlement bounds out of step with batches"
        );
        debug_assert_eq!(
            self.settled_through.last().copied().unwrap_or(0),
            self.first_pending,
            "Invariant violated: settled prefix does not end at the first pending transaction"
        );
        if self.last_settlement_date.is_none() {
            debug_assert_eq!(
                self.first_cash_at,
                self.pending().find(|tx| tx.is_cod()).map(|tx| tx.created_at),
                "Invariant violated: first cash timestamp does not match the log"
            );
        }
    }

    fn pending(&self) -> impl Iterator<Item = &LedgerTransaction> {
        self.transactions.iter_from(self.first_pending)
    }

    /// The transaction at `index`, with its settlement applied.
    fn transaction(&self, index: usize) -> Option<LedgerTransaction> {
        let mut tx = self.transactions.get(index)?.clone();
        if index < self.first_pending {
            let batch = self.settled_through.partition_point(|&end| end <= index);
            let batch = self.settlements.get(batch)?;
            tx.status = TransactionStatus::Settled;
            tx.settled_at = Some(batch.settled_at);
            tx.settlement_id = Some(batch.id);
        }
        Some(tx)
    }

    /// Cash held and since when. Prepaid orders carry no cash, so they never
    /// start the clock.
    fn exposure(&self) -> Exposure {
        Exposure {
            cod_balance: self.cod_balance,
            since: self.last_settlement_date.or(self.first_cash_at),
        }
    }

    fn check_version(&self, expected: Option<u64>) -> Result<(), LedgerError> {
        match expected {
            Some(expected) if expected != self.version => Err(LedgerError::ConcurrentMutationConflict {
                expected,
                actual: self.version,
            }),
            _ => Ok(()),
        }
    }

    /// Bumps the version and re-derives the status after a mutation.
    fn commit(&mut self, policy: &SettlementPolicy, now: DateTime<Utc>) {
        self.version += 1;
        self.reevaluate(policy, now);
        self.assert_invariants();
    }

    /// Applies the automatic status rule. Returns the transition, if any.
    fn reevaluate(
        &mut self,
        policy: &SettlementPolicy,
        now: DateTime<Utc>,
    ) -> Option<(SettlementStatus, SettlementStatus)> {
        let next = policy.evaluate(self.status, self.exposure(), now);
        if next == self.status {
            return None;
        }
        let from = std::mem::replace(&mut self.status, next);
        info!(
            rider_id = %self.rider_id,
            from = from.as_str(),
            to = next.as_str(),
            cod_balance = self.cod_balance,
            "settlement status changed"
        );
        Some((from, next))
    }

    /// Appends a pending transaction for a delivered order.
    fn post_delivery(
        &mut self,
        order_id: OrderId,
        cod_collected: Money,
        rider_earning: Money,
        admin_net: Money,
        now: DateTime<Utc>,
    ) -> Result<PostOutcome, LedgerError> {
        if self.status == SettlementStatus::Blocked {
            return Err(LedgerError::RiderBlocked);
        }
        validate_split(cod_collected, rider_earning, admin_net)?;
        if let Some(existing) = self.by_order.get(&order_id).and_then(|&i| self.transaction(i)) {
            if !existing.same_split(cod_collected, rider_earning, admin_net) {
                warn!(
                    rider_id = %self.rider_id,
                    order_id = %order_id,
                    "replayed delivery carries different figures, keeping the recorded ones"
                );
            }
            return Ok(PostOutcome::Duplicate(existing));
        }

        let (Some(cod_balance), Some(earnings_balance)) = (
            self.cod_balance.checked_add(cod_collected),
            self.earnings_balance.checked_add(rider_earning),
        ) else {
            return Err(LedgerError::InvalidAmount);
        };

        let transaction = LedgerTransaction {
            id: TransactionId::from(order_id),
            rider_id: self.rider_id,
            order_id,
            cod_collected,
            rider_earning,
            admin_net,
            status: TransactionStatus::Pending,
            created_at: now,
            settled_at: None,
            settlement_id: None,
        };
        self.cod_balance = cod_balance;
        self.earnings_balance = earnings_balance;
        if transaction.is_cod() && self.first_cash_at.is_none() {
            self.first_cash_at = Some(now);
        }
        self.by_order.insert(order_id, self.transactions.len());
        self.transactions.push(transaction.clone());
        Ok(PostOutcome::Recorded(transaction))
    }

    /// Takes cash from the rider and pays out earnings, clearing the oldest
    /// pending transactions the cash covers.
    fn settle(
        &mut self,
        amount_collected: Money,
        earnings_paid: Money,
        settled_by: &str,
        now: DateTime<Utc>,
    ) -> Result<SettlementBatch, LedgerError> {
        if amount_collected < 0 || earnings_paid < 0 {
            return Err(LedgerError::InvalidAmount);
        }
        if amount_collected > self.cod_balance {
            return Err(LedgerError::InsufficientBalance {
                requested: amount_collected,
                available: self.cod_balance,
            });
        }
        if earnings_paid > self.earnings_balance {
            return Err(LedgerError::InsufficientBalance {
                requested: earnings_paid,
                available: self.earnings_balance,
            });
        }
        let mut available = self
            .settlement_credit
            .checked_add(amount_collected)
            .ok_or(LedgerError::InvalidAmount)?;

        let id = SettlementId(self.settlements.len() as u64 + 1);
        let mut cleared = Vec::new();
        for tx in self.transactions.iter_from(self.first_pending) {
            if tx.cod_collected > available {
                break;
            }
            available -= tx.cod_collected;
            cleared.push(tx.id);
        }
        self.first_pending += cleared.len();
        self.settled_through.push(self.first_pending);
        self.settlement_credit = available;
        self.cod_balance -= amount_collected;
        self.earnings_balance -= earnings_paid;
        self.last_settlement_date = Some(now);

        let batch = SettlementBatch {
            id,
            rider_id: self.rider_id,
            amount_collected,
            earnings_paid,
            settled_at: now,
            settled_by: settled_by.to_string(),
            cleared,
        };
        self.settlements.push(batch.clone());
        Ok(batch)
    }

    /// Returns whether the status changed.
    fn set_blocked(&mut self, blocked: bool) -> bool {
        match (blocked, self.status) {
            (true, SettlementStatus::Blocked) | (false, SettlementStatus::Active | SettlementStatus::Overdue) => {
                false
            }
            (true, from) => {
                self.status = SettlementStatus::Blocked;
                info!(rider_id = %self.rider_id, from = from.as_str(), "rider blocked");
                true
            }
            (false, SettlementStatus::Blocked) => {
                // Lands in active; the commit re-evaluation may move it on to overdue.
                self.status = SettlementStatus::Active;
                info!(rider_id = %self.rider_id, "rider unblocked");
                true
            }
        }
    }

    fn increment_bonus(
        &mut self,
        order_id: OrderId,
        date: NaiveDate,
        rule: &BonusRule,
        now: DateTime<Utc>,
    ) -> Result<BonusOutcome, LedgerError> {
        if let Some(amount) = self.bonus.pending_credit(order_id, date, rule) {
            if self.earnings_balance.checked_add(amount).is_none() {
                return Err(LedgerError::InvalidAmount);
            }
        }
        let outcome = self.bonus.increment(self.rider_id, order_id, date, rule, now);
        if let Some(amount) = outcome.credited() {
            self.earnings_balance += amount;
            info!(
                rider_id = %self.rider_id,
                date = %date,
                amount,
                "daily delivery bonus credited"
            );
        }
        Ok(outcome)
    }

    fn snapshot(&self) -> RiderSnapshot {
        RiderSnapshot {
            rider_id: self.rider_id,
            cod_balance: self.cod_balance,
            earnings_balance: self.earnings_balance,
            settlement_status: self.status,
            last_settlement_date: self.last_settlement_date,
            settlement_credit: self.settlement_credit,
            version: self.version,
            transaction_count: self.transactions.len(),
            pending: self.transactions.view(self.first_pending),
            settlements: self.settlements.view(0),
            bonus_days: Arc::clone(self.bonus.days()),
        }
    }
}

pub(crate) fn validate_split(cod_collected: Money, rider_earning: Money, admin_net: Money) -> Result<(), LedgerError> {
    let balanced = if cod_collected == 0 {
        // Prepaid order: only the rider's fee moves.
        admin_net == 0
    } else {
        rider_earning.checked_add(admin_net) == Some(cod_collected)
    };
    if cod_collected < 0 || rider_earning < 0 || admin_net < 0 || !balanced {
        return Err(LedgerError::InvalidSplit {
            cod_collected,
            rider_earning,
            admin_net,
        });
    }
    Ok(())
}

/// Point-in-time view of one rider's account, published at every commit.
///
/// The transaction log, settlement history and bonus days are shared with
/// the account rather than copied, so a snapshot is cheap to take however
/// long the rider's history.
#[derive(Debug, Clone, Serialize)]
pub struct RiderSnapshot {
    pub rider_id: RiderId,
    /// Cash the rider still owes the platform.
    pub cod_balance: Money,
    pub earnings_balance: Money,
    pub settlement_status: SettlementStatus,
    pub last_settlement_date: Option<DateTime<Utc>>,
    /// Cash already handed in that does not yet cover the oldest pending
    /// transaction. Reconcile as
    /// `cod_balance + settlement_credit == sum of pending cod_collected`;
    /// when every settlement clears whole transactions this is zero and
    /// `cod_balance` alone equals the pending cash.
    pub settlement_credit: Money,
    pub version: u64,
    pub transaction_count: usize,
    /// Pending transactions, oldest first.
    pub pending: LogView<LedgerTransaction>,
    /// Settlement batches, oldest first.
    pub settlements: LogView<SettlementBatch>,
    /// Every day with deliveries, keyed by business date.
    pub bonus_days: Arc<BTreeMap<NaiveDate, BonusProgress>>,
}

impl RiderSnapshot {
    pub fn bonus_on(&self, date: NaiveDate) -> Option<&BonusProgress> {
        self.bonus_days.get(&date)
    }

    pub fn is_blocked(&self) -> bool {
        self.settlement_status == SettlementStatus::Blocked
    }
}

/// One rider's ledger account.
///
/// Mutations serialize on `inner`. Every commit also swaps a fresh
/// [`RiderSnapshot`] into `published`, which is all readers ever touch, so a
/// reader never waits on a writer's critical section.
#[derive(Debug)]
pub struct Account {
    inner: Mutex<AccountData>,
    published: RwLock<Arc<RiderSnapshot>>,
}

impl Account {
    pub fn new(rider_id: RiderId) -> Self {
        let data = AccountData::new(rider_id);
        let snapshot = Arc::new(data.snapshot());
        Self {
            inner: Mutex::new(data),
            published: RwLock::new(snapshot),
        }
    }

    /// Latest committed state.
    pub fn snapshot(&self) -> Arc<RiderSnapshot> {
        Arc::clone(&self.published.read())
    }

    pub fn rider_id(&self) -> RiderId {
        self.snapshot().rider_id
    }

    pub fn cod_balance(&self) -> Money {
        self.snapshot().cod_balance
    }

    pub fn earnings_balance(&self) -> Money {
        self.snapshot().earnings_balance
    }

    pub fn status(&self) -> SettlementStatus {
        self.snapshot().settlement_status
    }

    pub fn version(&self) -> u64 {
        self.snapshot().version
    }

    fn publish(&self, data: &AccountData) -> Arc<RiderSnapshot> {
        let snapshot = Arc::new(data.snapshot());
        *self.published.write() = Arc::clone(&snapshot);
        snapshot
    }

    pub(crate) fn post_delivery(
        &self,
        order_id: OrderId,
        cod_collected: Money,
        rider_earning: Money,
        admin_net: Money,
        policy: &SettlementPolicy,
        now: DateTime<Utc>,
    ) -> Result<(PostOutcome, Arc<RiderSnapshot>), LedgerError> {
        let mut data = self.inner.lock();
        let outcome = data.post_delivery(order_id, cod_collected, rider_earning, admin_net, now)?;
        if outcome.is_duplicate() {
            return Ok((outcome, self.snapshot()));
        }
        data.commit(policy, now);
        Ok((outcome, self.publish(&data)))
    }

    pub(crate) fn settle(
        &self,
        amount_collected: Money,
        earnings_paid: Money,
        settled_by: &str,
        expected_version: Option<u64>,
        policy: &SettlementPolicy,
        now: DateTime<Utc>,
    ) -> Result<(SettlementBatch, Arc<RiderSnapshot>), LedgerError> {
        let mut data = self.inner.lock();
        data.check_version(expected_version)?;
        let batch = data.settle(amount_collected, earnings_paid, settled_by, now)?;
        data.commit(policy, now);
        Ok((batch, self.publish(&data)))
    }

    pub(crate) fn set_blocked(
        &self,
        blocked: bool,
        expected_version: Option<u64>,
        policy: &SettlementPolicy,
        now: DateTime<Utc>,
    ) -> Result<(bool, Arc<RiderSnapshot>), LedgerError> {
        let mut data = self.inner.lock();
        data.check_version(expected_version)?;
        if !data.set_blocked(blocked) {
            return Ok((false, self.snapshot()));
        }
        data.commit(policy, now);
        Ok((true, self.publish(&data)))
    }

    pub(crate) fn increment_bonus(
        &self,
        order_id: OrderId,
        date: NaiveDate,
        rule: &BonusRule,
        policy: &SettlementPolicy,
        now: DateTime<Utc>,
    ) -> Result<(BonusOutcome, Arc<RiderSnapshot>), LedgerError> {
        let mut data = self.inner.lock();
        let outcome = data.increment_bonus(order_id, date, rule, now)?;
        if outcome.is_duplicate() {
            return Ok((outcome, self.snapshot()));
        }
        data.commit(policy, now);
        Ok((outcome, self.publish(&data)))
    }

    /// Re-applies the automatic status rule against `now`.
    pub(crate) fn refresh_status(
        &self,
        policy: &SettlementPolicy,
        now: DateTime<Utc>,
    ) -> Option<(SettlementStatus, Arc<RiderSnapshot>)> {
        let mut data = self.inner.lock();
        let (from, _) = data.reevaluate(policy, now)?;
        data.version += 1;
        Some((from, self.publish(&data)))
    }
}
