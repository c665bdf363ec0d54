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


//! Read side for admin dashboards.
//!
//! Every read goes through the snapshot each account publishes at commit, so
//! queries never wait on a rider's mutation lock. Fleet aggregates are built
//! from per-rider snapshots taken one after another: each rider's figures are
//! internally consistent, while the fleet view may mix slightly different
//! moments across riders.

use crate::account::RiderSnapshot;
use crate::base::{Money, OrderId, RiderId};
use crate::bonus::BonusProgress;
use crate::engine::Engine;
use crate::settlement::SettlementStatus;
use crate::shared_log::LogView;
use crate::transaction::SettlementBatch;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Flat per-rider view, suitable for tables and CSV.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RiderSummary {
    pub rider: RiderId,
    pub cod_balance: Money,
    pub earnings_balance: Money,
    pub settlement_status: SettlementStatus,
    pub last_settlement_date: Option<DateTime<Utc>>,
    pub pending_transactions: usize,
    pub version: u64,
}

impl From<&RiderSnapshot> for RiderSummary {
    fn from(snapshot: &RiderSnapshot) -> Self {
        Self {
            rider: snapshot.rider_id,
            cod_balance: snapshot.cod_balance,
            earnings_balance: snapshot.earnings_balance,
            settlement_status: snapshot.settlement_status,
            last_settlement_date: snapshot.last_settlement_date,
            pending_transactions: snapshot.pending.len(),
            version: snapshot.version,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct FleetTotals {
    pub riders: usize,
    /// Cash held by riders across the fleet.
    pub cash_in_field: Money,
    /// Earnings owed to riders across the fleet.
    pub pending_payouts: Money,
    pub active: usize,
    pub overdue: usize,
    pub blocked: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PendingLine {
    pub order_id: OrderId,
    pub collected: Money,
    pub fee: Money,
    pub net: Money,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PendingBreakdown {
    pub rider_id: RiderId,
    pub version: u64,
    pub lines: Vec<PendingLine>,
    pub total_collected: Money,
    pub total_fee: Money,
    pub total_net: Money,
    /// Cash already handed in against these lines.
    pub settlement_credit: Money,
}

pub struct AdminQueryService {
    engine: Arc<Engine>,
}

impl AdminQueryService {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub fn snapshot(&self, rider_id: &RiderId) -> Option<Arc<RiderSnapshot>> {
        self.engine.get_account(rider_id).map(|account| account.snapshot())
    }

    pub fn rider_summary(&self, rider_id: &RiderId) -> Option<RiderSummary> {
        self.snapshot(rider_id).map(|s| RiderSummary::from(&*s))
    }

    /// Summaries of every rider, ordered by rider id.
    pub fn rider_summaries(&self) -> Vec<RiderSummary> {
        let mut summaries: Vec<RiderSummary> = self
            .engine
            .accounts()
            .iter()
            .map(|account| RiderSummary::from(&*account.snapshot()))
            .collect();
        summaries.sort_by_key(|s| s.rider);
        summaries
    }

    pub fn riders_with_status(&self, status: SettlementStatus) -> Vec<RiderSummary> {
        self.rider_summaries()
            .into_iter()
            .filter(|s| s.settlement_status == status)
            .collect()
    }

    pub fn fleet_totals(&self) -> FleetTotals {
        self.engine
            .accounts()
            .iter()
            .map(|account| account.snapshot())
            .fold(FleetTotals::default(), |mut totals, s| {
                totals.riders += 1;
                totals.cash_in_field += s.cod_balance;
                totals.pending_payouts += s.earnings_balance;
                match s.settlement_status {
                    SettlementStatus::Active => totals.active += 1,
                    SettlementStatus::Overdue => totals.overdue += 1,
                    SettlementStatus::Blocked => totals.blocked += 1,
                }
                totals
            })
    }

    pub fn pending_breakdown(&self, rider_id: &RiderId) -> Option<PendingBreakdown> {
        let snapshot = self.snapshot(rider_id)?;
        let lines: Vec<PendingLine> = snapshot
            .pending
            .iter()
            .map(|tx| PendingLine {
                order_id: tx.order_id,
                collected: tx.cod_collected,
                fee: tx.rider_earning,
                net: tx.admin_net,
                created_at: tx.created_at,
            })
            .collect();
        Some(PendingBreakdown {
            rider_id: snapshot.rider_id,
            version: snapshot.version,
            total_collected: lines.iter().map(|l| l.collected).sum(),
            total_fee: lines.iter().map(|l| l.fee).sum(),
            total_net: lines.iter().map(|l| l.net).sum(),
            settlement_credit: snapshot.settlement_credit,
            lines,
        })
    }

    /// Bonus progress for one day. Every day the rider delivered on is kept,
    /// however old; a day with no deliveries reports a zero count against the
    /// configured rule.
    pub fn bonus_progress(&self, rider_id: &RiderId, date: NaiveDate) -> BonusProgress {
        let recorded = self
            .snapshot(rider_id)
            .and_then(|s| s.bonus_on(date).cloned());
        recorded.unwrap_or_else(|| {
            let rule = &self.engine.config().bonus;
            BonusProgress {
                rider_id: *rider_id,
                date,
                daily_delivery_count: 0,
                target_deliveries: rule.target_deliveries,
                bonus_amount: rule.bonus_amount,
                is_bonus_achieved: false,
                bonus_credited_at: None,
            }
        })
    }

    /// Settlement batches, oldest first.
    pub fn settlement_history(&self, rider_id: &RiderId) -> Option<LogView<SettlementBatch>> {
        self.snapshot(rider_id).map(|s| s.settlements.clone())
    }
}
