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

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::cell::Cell;

/// Handle to an actor.
///
/// An `Id` is a plain value: a numeric identifier, unique within a stage
/// (`0` is the Stage itself), plus an optional binding to the local actor
/// record. An `Id` without a binding denotes a remote actor; it can be
/// compared and stored, but `say` to it fails and directs the caller to
/// broadcast instead.
///
/// Two `Id`s are equal iff their numeric identifiers are equal. Holding an
/// `Id` never extends an actor's life: closing the inbox terminates the
/// actor even if `Id`s outlive it.
#[derive(Clone)]
pub struct Id {
    ident: u64,
    local: Option<Arc<Cell>>,
}

impl Id {
    pub(crate) fn local(ident: u64, cell: Arc<Cell>) -> Id {
        Id {
            ident,
            local: Some(cell),
        }
    }

    /// An identifier-only handle for an actor living elsewhere.
    pub fn remote(ident: u64) -> Id {
        Id { ident, local: None }
    }

    pub fn ident(&self) -> u64 {
        self.ident
    }

    pub fn is_remote(&self) -> bool {
        self.local.is_none()
    }

    pub(crate) fn cell(&self) -> Option<&Arc<Cell>> {
        self.local.as_ref()
    }

    /// The cell of an `Id` the runtime created itself (a scene subject or
    /// stage handle). Those are local by construction.
    pub(crate) fn local_cell(&self) -> &Arc<Cell> {
        self.local
            .as_ref()
            .expect("runtime-issued Id carries a local binding")
    }

    pub(crate) fn close_inbox(&self) {
        if let Some(cell) = &self.local {
            cell.close();
        }
    }
}

impl PartialEq for Id {
    fn eq(&self, other: &Self) -> bool {
        self.ident == other.ident
    }
}

impl Eq for Id {}

impl Hash for Id {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ident.hash(state);
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_remote() {
            write!(f, "Id(#{} remote)", self.ident)
        } else {
            write!(f, "Id(#{})", self.ident)
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.ident)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::create_mailbox;

    fn local_id(ident: u64) -> Id {
        let (sender, inbox) = create_mailbox(ident, 8);
        Id::local(ident, Arc::new(Cell::new(ident, "Probe".to_string(), sender, inbox)))
    }

    #[test]
    fn test_equality_is_by_identifier_only() {
        let local = local_id(3);
        let remote = Id::remote(3);
        assert_eq!(local, remote);
        assert_ne!(local, Id::remote(4));
    }

    #[test]
    fn test_remote_flag() {
        assert!(Id::remote(9).is_remote());
        assert!(!local_id(9).is_remote());
    }

    #[test]
    fn test_display() {
        assert_eq!(local_id(5).to_string(), "#5");
        assert_eq!(format!("{:?}", Id::remote(5)), "Id(#5 remote)");
    }
}
