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
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Settled,
}

/// Cash effect of one delivered order on a rider's account.
///
/// Append-only: once recorded the monetary fields never change, and the
/// status only moves `Pending -> Settled` when a settlement batch covers it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerTransaction {
    pub id: TransactionId,
    pub rider_id: RiderId,
    pub order_id: OrderId,
    pub cod_collected: Money,
    pub rider_earning: Money,
    pub admin_net: Money,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
    pub settlement_id: Option<SettlementId>,
}

impl LedgerTransaction {
    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }

    pub fn is_cod(&self) -> bool {
        self.cod_collected > 0
    }

    /// Whether a replayed delivery carries the same figures as this record.
    pub(crate) fn same_split(&self, cod_collected: Money, rider_earning: Money, admin_net: Money) -> bool {
        self.cod_collected == cod_collected
            && self.rider_earning == rider_earning
            && self.admin_net == admin_net
    }
}

/// Record of an admin settlement action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SettlementBatch {
    pub id: SettlementId,
    pub rider_id: RiderId,
    pub amount_collected: Money,
    pub earnings_paid: Money,
    pub settled_at: DateTime<Utc>,
    pub settled_by: String,
    /// Transactions this batch moved to `Settled`, oldest first.
    pub cleared: Vec<TransactionId>,
}

/// Result of posting a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostOutcome {
    /// A new pending transaction was appended.
    Recorded(LedgerTransaction),
    /// The order was already on the ledger; nothing changed.
    Duplicate(LedgerTransaction),
}

impl PostOutcome {
    pub fn transaction(&self) -> &LedgerTransaction {
        match self {
            Self::Recorded(tx) | Self::Duplicate(tx) => tx,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}
