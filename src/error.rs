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


//! Error types for ledger operations and configuration loading.

use crate::base::Money;
use thiserror::Error;

/// Ledger operation errors.
///
/// Every variant is fatal to the operation that produced it: the account is
/// left exactly as it was before the call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Delivery figures don't add up (`cod != earning + net`) or are negative
    #[error("invalid split: cod {cod_collected} != earning {rider_earning} + net {admin_net}")]
    InvalidSplit {
        cod_collected: Money,
        rider_earning: Money,
        admin_net: Money,
    },

    /// Settlement would take more than the rider holds or is owed
    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: Money, available: Money },

    /// Negative settlement figure
    #[error("invalid amount (must not be negative)")]
    InvalidAmount,

    /// Rider is blocked and may not take new deliveries
    #[error("rider is blocked")]
    RiderBlocked,

    /// Completion event for an order that was already recorded
    #[error("duplicate event for order")]
    DuplicateEvent,

    /// Account version moved on between read and write
    #[error("concurrent modification: expected version {expected}, found {actual}")]
    ConcurrentMutationConflict { expected: u64, actual: u64 },

    /// No ledger account exists for the rider
    #[error("rider not found")]
    RiderNotFound,
}

impl LedgerError {
    /// Transient errors clear on their own when the caller re-reads and retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::ConcurrentMutationConflict { .. })
    }
}

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}
