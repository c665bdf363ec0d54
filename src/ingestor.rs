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


//! Entry point for delivered orders.
//!
//! The order-lifecycle system calls [`OrderCompletionIngestor::on_order_delivered`]
//! at least once per delivered order. The ingestor splits the order into the
//! rider's and the platform's share, posts it to the ledger and counts it
//! towards the daily bonus. Both steps are keyed on the order id, so a
//! caller that times out can simply retry.

use crate::account::RiderSnapshot;
use crate::base::{Money, OrderId, RiderId};
use crate::bonus::BonusOutcome;
use crate::engine::Engine;
use crate::settlement::SettlementStatus;
use crate::transaction::PostOutcome;
use crate::LedgerError;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// How the rider's delivery fee is computed when the order doesn't carry one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FeeSchedule {
    /// Flat fee per delivery.
    pub base_fee: Money,
    /// Share of the order total added to the flat fee.
    pub per_order_rate: Decimal,
    /// Commission applied when a caller doesn't supply one.
    pub default_commission_rate: Decimal,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            base_fee: 0,
            per_order_rate: Decimal::ZERO,
            default_commission_rate: Decimal::new(10, 2),
        }
    }
}

impl FeeSchedule {
    /// Scheduled rider fee for an order of `order_total`.
    pub fn rider_fee(&self, order_total: Money) -> Result<Money, LedgerError> {
        self.base_fee
            .checked_add(apply_rate(order_total, self.per_order_rate)?)
            .ok_or(LedgerError::InvalidAmount)
    }
}

/// `amount * rate`, rounded half-to-even to whole minor units.
fn apply_rate(amount: Money, rate: Decimal) -> Result<Money, LedgerError> {
    if rate < Decimal::ZERO || rate > Decimal::ONE {
        return Err(LedgerError::InvalidAmount);
    }
    (Decimal::from(amount) * rate)
        .round()
        .to_i64()
        .ok_or(LedgerError::InvalidAmount)
}

/// A delivered order, as reported by the order-lifecycle system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryCompleted {
    pub order_id: OrderId,
    pub rider_id: RiderId,
    pub order_total: Money,
    pub commission_rate: Decimal,
    pub is_cod: bool,
    /// Explicit rider fee; the fee schedule applies when absent.
    #[serde(default)]
    pub delivery_fee: Option<Money>,
}

/// How an order's money divides between rider, platform and restaurant.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct DeliverySplit {
    pub order_total: Money,
    /// Owed by the restaurant; reported, not posted.
    pub platform_commission: Money,
    pub cod_collected: Money,
    pub rider_earning: Money,
    pub admin_net: Money,
}

impl DeliverySplit {
    pub fn compute(event: &DeliveryCompleted, fees: &FeeSchedule) -> Result<Self, LedgerError> {
        if event.order_total < 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let platform_commission = apply_rate(event.order_total, event.commission_rate)?;
        let rider_earning = match event.delivery_fee {
            Some(fee) => fee,
            // A scheduled fee never exceeds the cash the rider collected.
            None if event.is_cod => fees.rider_fee(event.order_total)?.min(event.order_total),
            None => fees.rider_fee(event.order_total)?,
        };

        let (cod_collected, admin_net) = if event.is_cod {
            let admin_net = event
                .order_total
                .checked_sub(rider_earning)
                .ok_or(LedgerError::InvalidAmount)?;
            (event.order_total, admin_net)
        } else {
            (0, 0)
        };
        Ok(Self {
            order_total: event.order_total,
            platform_commission,
            cod_collected,
            rider_earning,
            admin_net,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    pub split: DeliverySplit,
    pub posting: PostOutcome,
    pub bonus: BonusOutcome,
    /// Account state after both steps.
    pub snapshot: Arc<RiderSnapshot>,
}

impl DeliveryReceipt {
    /// Whether this call was a replay of an already-ingested order.
    pub fn is_duplicate(&self) -> bool {
        self.posting.is_duplicate() && self.bonus.is_duplicate()
    }
}

pub struct OrderCompletionIngestor {
    engine: Arc<Engine>,
}

impl OrderCompletionIngestor {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    /// Ingests one delivered order.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::RiderBlocked`] - Nothing is recorded; the order must be
    ///   reassigned rather than retried against this rider.
    /// - [`LedgerError::InvalidAmount`] - Negative total or a rate outside `[0, 1]`.
    /// - [`LedgerError::InvalidSplit`] - Explicit fee exceeds the cash collected.
    pub fn on_order_delivered(&self, event: &DeliveryCompleted) -> Result<DeliveryReceipt, LedgerError> {
        if self.engine.status(&event.rider_id) == SettlementStatus::Blocked {
            warn!(
                rider_id = %event.rider_id,
                order_id = %event.order_id,
                "delivery refused for blocked rider"
            );
            return Err(LedgerError::RiderBlocked);
        }

        let split = DeliverySplit::compute(event, &self.engine.config().fees)?;
        debug!(
            order_id = %event.order_id,
            cod_collected = split.cod_collected,
            rider_earning = split.rider_earning,
            admin_net = split.admin_net,
            platform_commission = split.platform_commission,
            "delivery split computed"
        );

        let posting = self.engine.post_delivery(
            event.rider_id,
            event.order_id,
            split.cod_collected,
            split.rider_earning,
            split.admin_net,
        )?;
        let date = self.engine.business_date();
        let bonus = self
            .engine
            .increment_bonus(event.rider_id, event.order_id, date)?;

        Ok(DeliveryReceipt {
            split,
            posting: posting.outcome,
            bonus: bonus.outcome,
            snapshot: bonus.snapshot,
        })
    }
}
