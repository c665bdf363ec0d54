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


//! Append-only log whose history is shared between copies.
//!
//! Entries are stored in fixed-size chunks. Full chunks are frozen behind an
//! `Arc` and never copied again; only the open tail chunk is copied when a
//! writer appends while a published view still holds it. Taking a view is
//! two reference-count bumps, so publishing a snapshot costs the same for a
//! rider with ten transactions as for one with a million.

use serde::{Serialize, Serializer};
use std::sync::Arc;

/// Entries per frozen chunk.
const CHUNK: usize = 64;

#[derive(Debug, Clone)]
pub(crate) struct SharedLog<T> {
    sealed: Arc<Vec<Arc<[T]>>>,
    tail: Arc<Vec<T>>,
}

impl<T> Default for SharedLog<T> {
    fn default() -> Self {
        Self {
            sealed: Arc::new(Vec::new()),
            tail: Arc::new(Vec::with_capacity(CHUNK)),
        }
    }
}

impl<T> SharedLog<T> {
    pub(crate) fn len(&self) -> usize {
        self.sealed.len() * CHUNK + self.tail.len()
    }

    pub(crate) fn get(&self, index: usize) -> Option<&T> {
        let (chunk, offset) = (index / CHUNK, index % CHUNK);
        match self.sealed.get(chunk) {
            Some(sealed) => sealed.get(offset),
            None if chunk == self.sealed.len() => self.tail.get(offset),
            None => None,
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &T> {
        self.iter_from(0)
    }

    /// Entries from `start` to the end, in append order.
    pub(crate) fn iter_from(&self, start: usize) -> impl Iterator<Item = &T> {
        self.sealed
            .iter()
            .map(|chunk| &chunk[..])
            .chain(std::iter::once(&self.tail[..]))
            .skip(start / CHUNK)
            .flatten()
            .skip(start % CHUNK)
    }

    /// Read-only view of the entries from `start` on, sharing storage.
    pub(crate) fn view(&self, start: usize) -> LogView<T> {
        LogView {
            log: SharedLog {
                sealed: Arc::clone(&self.sealed),
                tail: Arc::clone(&self.tail),
            },
            start: start.min(self.len()),
        }
    }
}

impl<T: Clone> SharedLog<T> {
    pub(crate) fn push(&mut self, entry: T) {
        Arc::make_mut(&mut self.tail).push(entry);
        if self.tail.len() == CHUNK {
            let full = std::mem::replace(&mut self.tail, Arc::new(Vec::with_capacity(CHUNK)));
            let full = Arc::try_unwrap(full).unwrap_or_else(|shared| shared.as_ref().clone());
            Arc::make_mut(&mut self.sealed).push(Arc::from(full));
        }
    }
}

/// A published, immutable run of log entries.
///
/// Serializes as a plain sequence.
#[derive(Debug, Clone)]
pub struct LogView<T> {
    log: SharedLog<T>,
    start: usize,
}

impl<T> LogView<T> {
    pub fn len(&self) -> usize {
        self.log.len() - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.log.get(self.start.checked_add(index)?)
    }

    pub fn first(&self) -> Option<&T> {
        self.get(0)
    }

    pub fn last(&self) -> Option<&T> {
        self.len().checked_sub(1).and_then(|i| self.get(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.log.iter_from(self.start)
    }

    /// Whether both views read the same frozen history.
    pub fn shares_storage(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.log.sealed, &other.log.sealed) && Arc::ptr_eq(&self.log.tail, &other.log.tail)
    }
}

impl<T: Clone> LogView<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

impl<T: Serialize> Serialize for LogView<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}
