// Copyright (C) 2024 Quickwit, Inc.
//
// Quickwit is offered under the AGPL v3.0 and as commercial software.
// For commercial licensing, contact us at hello@quickwit.io.
//
// AGPL:
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <http://www.gnu.org/licenses/>.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::id::Id;
use crate::role::CaptureEnvironment;

/// The Stage's membership table, shared through every [`crate::Scene`].
///
/// Identifiers are allocated from a monotonic counter and never reused, so
/// no two actors of one stage can ever collide, live or dead. `0` is
/// reserved for the Stage itself.
pub(crate) struct Registry {
    next_ident: AtomicU64,
    children: Mutex<HashMap<u64, Id>>,
    capture: CaptureEnvironment,
}

impl Registry {
    pub fn new(capture: CaptureEnvironment) -> Self {
        Registry {
            next_ident: AtomicU64::new(1),
            children: Mutex::new(HashMap::new()),
            capture,
        }
    }

    pub fn allocate(&self) -> u64 {
        self.next_ident.fetch_add(1, Ordering::Relaxed)
    }

    pub fn insert(&self, id: Id) {
        self.children.lock().unwrap().insert(id.ident(), id);
    }

    pub fn remove(&self, ident: u64) -> Option<Id> {
        self.children.lock().unwrap().remove(&ident)
    }

    pub fn is_empty(&self) -> bool {
        self.children.lock().unwrap().is_empty()
    }

    /// Live children, ordered by identifier so that shutdown fan-out is
    /// deterministic.
    pub fn live(&self) -> Vec<Id> {
        let mut children: Vec<Id> = self.children.lock().unwrap().values().cloned().collect();
        children.sort_by_key(Id::ident);
        children
    }

    pub fn capture(&self) -> &CaptureEnvironment {
        &self.capture
    }
}
