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


//! Settlement status derivation.
//!
//! A rider's status lives on two axes. The balance-driven axis moves between
//! `Active` and `Overdue` automatically after every ledger mutation. `Blocked`
//! sits outside it: only an explicit admin decision enters or leaves it, and
//! it is the only status that stops a rider from taking deliveries.

use crate::base::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    #[default]
    Active,
    Overdue,
    Blocked,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Overdue => "overdue",
            Self::Blocked => "blocked",
        }
    }
}

/// Exposure limits that drive the active/overdue axis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SettlementPolicy {
    /// Cash a rider may hold before being flagged overdue.
    pub overdue_threshold: Money,
    /// Days a rider may hold any cash without settling.
    pub grace_period_days: i64,
}

impl Default for SettlementPolicy {
    fn default() -> Self {
        Self {
            overdue_threshold: 15_000,
            grace_period_days: 7,
        }
    }
}

/// Inputs to a status evaluation, read from the account under its lock.
#[derive(Debug, Clone, Copy)]
pub struct Exposure {
    pub cod_balance: Money,
    /// Start of the current exposure window: the last settlement, or the
    /// first cash order for a rider who never settled.
    pub since: Option<DateTime<Utc>>,
}

impl SettlementPolicy {
    /// Whether the exposure breaches either limit at `now`.
    pub fn is_overdue(&self, exposure: Exposure, now: DateTime<Utc>) -> bool {
        if exposure.cod_balance > self.overdue_threshold {
            return true;
        }
        // Nothing to remit means nothing can be late.
        if exposure.cod_balance <= 0 {
            return false;
        }
        match exposure.since {
            Some(since) => (now - since).num_days() > self.grace_period_days,
            None => false,
        }
    }

    /// Next status for an account currently in `current`.
    ///
    /// `Blocked` is returned unchanged: the automatic rule never enters or
    /// leaves it.
    pub fn evaluate(
        &self,
        current: SettlementStatus,
        exposure: Exposure,
        now: DateTime<Utc>,
    ) -> SettlementStatus {
        match current {
            SettlementStatus::Blocked => SettlementStatus::Blocked,
            SettlementStatus::Active | SettlementStatus::Overdue => {
                if self.is_overdue(exposure, now) {
                    SettlementStatus::Overdue
                } else {
                    SettlementStatus::Active
                }
            }
        }
    }
}
