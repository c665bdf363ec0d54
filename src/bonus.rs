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


//! Daily delivery-count bonus.
//!
//! Each rider gets one [`BonusProgress`] per business day. The day's record
//! remembers the target and amount in force when it was opened, and
//! `is_bonus_achieved` is write-once: the increment that reaches the target
//! flips it and reports the credit; every later increment sees it set.
//!
//! The book is owned by the rider's account and only touched under the
//! account lock, which is what makes the flip and the earnings credit one
//! atomic step.

use crate::base::{Money, OrderId, RiderId};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BonusRule {
    pub target_deliveries: u32,
    pub bonus_amount: Money,
    /// Offset from UTC at which the business day rolls over.
    pub business_day_utc_offset_minutes: i32,
}

impl Default for BonusRule {
    fn default() -> Self {
        Self {
            target_deliveries: 10,
            bonus_amount: 300,
            business_day_utc_offset_minutes: 0,
        }
    }
}

impl BonusRule {
    /// Business date a delivery completed at `at` counts towards.
    pub fn business_date(&self, at: DateTime<Utc>) -> NaiveDate {
        (at + Duration::minutes(i64::from(self.business_day_utc_offset_minutes))).date_naive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BonusProgress {
    pub rider_id: RiderId,
    pub date: NaiveDate,
    pub daily_delivery_count: u32,
    pub target_deliveries: u32,
    pub bonus_amount: Money,
    pub is_bonus_achieved: bool,
    pub bonus_credited_at: Option<DateTime<Utc>>,
}

impl BonusProgress {
    fn open(rider_id: RiderId, date: NaiveDate, rule: &BonusRule) -> Self {
        Self {
            rider_id,
            date,
            daily_delivery_count: 0,
            target_deliveries: rule.target_deliveries,
            bonus_amount: rule.bonus_amount,
            is_bonus_achieved: false,
            bonus_credited_at: None,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.target_deliveries.saturating_sub(self.daily_delivery_count)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BonusOutcome {
    /// Count went up; target not reached (or already reached earlier).
    Counted(BonusProgress),
    /// This increment crossed the target and credited the bonus.
    Achieved(BonusProgress),
    /// The order was already counted; nothing changed.
    Duplicate(BonusProgress),
}

impl BonusOutcome {
    pub fn progress(&self) -> &BonusProgress {
        match self {
            Self::Counted(p) | Self::Achieved(p) | Self::Duplicate(p) => p,
        }
    }

    pub fn credited(&self) -> Option<Money> {
        match self {
            Self::Achieved(p) => Some(p.bonus_amount),
            _ => None,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

/// Per-rider bonus state.
#[derive(Debug, Default)]
pub(crate) struct BonusBook {
    /// Every day the rider has deliveries on. Shared with published
    /// snapshots and copied on write.
    days: Arc<BTreeMap<NaiveDate, BonusProgress>>,
    /// Orders already counted, with the day they counted towards.
    counted: HashMap<OrderId, NaiveDate>,
}

impl BonusBook {
    /// Bonus that counting `order_id` towards `date` would credit, if any.
    /// Lets the caller check the credit fits before anything changes.
    pub(crate) fn pending_credit(&self, order_id: OrderId, date: NaiveDate, rule: &BonusRule) -> Option<Money> {
        if self.counted.contains_key(&order_id) {
            return None;
        }
        match self.days.get(&date) {
            Some(p) => (!p.is_bonus_achieved && p.daily_delivery_count.saturating_add(1) >= p.target_deliveries)
                .then_some(p.bonus_amount),
            None => (rule.target_deliveries <= 1).then_some(rule.bonus_amount),
        }
    }

    /// Counts `order_id` towards `date`. The caller credits the rider's
    /// earnings when this returns [`BonusOutcome::Achieved`], under the same
    /// lock.
    pub(crate) fn increment(
        &mut self,
        rider_id: RiderId,
        order_id: OrderId,
        date: NaiveDate,
        rule: &BonusRule,
        now: DateTime<Utc>,
    ) -> BonusOutcome {
        if let Some(counted_on) = self.counted.get(&order_id) {
            if let Some(progress) = self.days.get(counted_on) {
                return BonusOutcome::Duplicate(progress.clone());
            }
        }
        self.counted.insert(order_id, date);

        let progress = Arc::make_mut(&mut self.days)
            .entry(date)
            .or_insert_with(|| BonusProgress::open(rider_id, date, rule));
        progress.daily_delivery_count = progress.daily_delivery_count.saturating_add(1);

        if !progress.is_bonus_achieved && progress.daily_delivery_count >= progress.target_deliveries {
            progress.is_bonus_achieved = true;
            progress.bonus_credited_at = Some(now);
            return BonusOutcome::Achieved(progress.clone());
        }
        BonusOutcome::Counted(progress.clone())
    }

    pub(crate) fn days(&self) -> &Arc<BTreeMap<NaiveDate, BonusProgress>> {
        &self.days
    }

    /// Sum of all bonuses credited so far.
    pub(crate) fn credited_total(&self) -> Money {
        self.days
            .values()
            .filter(|p| p.bonus_credited_at.is_some())
            .map(|p| p.bonus_amount)
            .sum()
    }
}
