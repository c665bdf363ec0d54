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


//! Engine configuration.
//!
//! Loaded from TOML; every section and field falls back to its default, so an
//! empty file is a valid configuration.
//!
//! ```toml
//! [settlement]
//! overdue_threshold = 15000
//! grace_period_days = 7
//!
//! [bonus]
//! target_deliveries = 10
//! bonus_amount = 300
//!
//! [fees]
//! base_fee = 40
//! per_order_rate = "0.02"
//! default_commission_rate = "0.10"
//! ```

use crate::bonus::BonusRule;
use crate::error::ConfigError;
use crate::ingestor::FeeSchedule;
use crate::notify::NotificationConfig;
use crate::settlement::SettlementPolicy;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    pub settlement: SettlementPolicy,
    pub bonus: BonusRule,
    pub fees: FeeSchedule,
    pub notifications: NotificationConfig,
}

impl EngineConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.settlement.overdue_threshold < 0 {
            return Err(invalid("settlement.overdue_threshold", "must not be negative"));
        }
        if self.settlement.grace_period_days < 0 {
            return Err(invalid("settlement.grace_period_days", "must not be negative"));
        }
        if self.bonus.target_deliveries == 0 {
            return Err(invalid("bonus.target_deliveries", "must be at least 1"));
        }
        if self.bonus.bonus_amount < 0 {
            return Err(invalid("bonus.bonus_amount", "must not be negative"));
        }
        if self.fees.base_fee < 0 {
            return Err(invalid("fees.base_fee", "must not be negative"));
        }
        check_rate("fees.per_order_rate", self.fees.per_order_rate)?;
        check_rate("fees.default_commission_rate", self.fees.default_commission_rate)?;
        if self.notifications.channel_capacity == 0 {
            return Err(invalid("notifications.channel_capacity", "must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

fn check_rate(field: &'static str, rate: Decimal) -> Result<(), ConfigError> {
    if rate < Decimal::ZERO || rate > Decimal::ONE {
        return Err(invalid(field, "must be between 0 and 1"));
    }
    Ok(())
}
