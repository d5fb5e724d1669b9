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

//! The runtime's own message universe.
//!
//! These travel through the same mailboxes as user messages; roles that
//! care about one of them downcast for it in `hear`. Anything the Stage
//! does not recognize is forwarded to the play.

use std::fmt;

use crate::id::Id;
use crate::role::{AnyMessage, Corpse, DupMessage, Role};

/// Seeded into the Stage's inbox at creation; carries the play.
pub struct PreGenesis {
    pub play: Box<dyn Role>,
}

impl fmt::Debug for PreGenesis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreGenesis").finish_non_exhaustive()
    }
}

/// First message the play receives once the production is bootstrapped.
#[derive(Clone, Copy, Debug)]
pub struct Genesis;

/// Request to the Stage to spawn a new actor.
pub struct Enter {
    pub role: Box<dyn Role>,
    /// Recipient of the [`Entered`] acknowledgment. When absent, the
    /// newborn actor itself is told; this is how a stooge learns it may
    /// run.
    pub reply_to: Option<Id>,
}

impl fmt::Debug for Enter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Enter")
            .field("reply_to", &self.reply_to)
            .finish_non_exhaustive()
    }
}

/// Acknowledgment that an actor entered the stage.
#[derive(Clone, Debug)]
pub struct Entered(pub Id);

/// Reported to an actor's minder after a normal exit.
#[derive(Clone, Debug)]
pub struct Left(pub Id);

/// Reported to an actor's minder after a crash; forwarded by the default
/// minder to the Stage, which tears the production down.
#[derive(Clone, Debug)]
pub struct Died {
    pub who: Id,
    pub corpse: Corpse,
}

/// Cooperative exit request. The dispatcher routes it to
/// [`Role::on_leave`]; the default closes the subject's own inbox, and the
/// Stage's override shuts the whole production down.
#[derive(Clone, Copy, Debug)]
pub struct Leave;

/// Broadcast envelope understood by [`crate::Troupe`]: the payload is
/// re-materialized once per member.
pub struct Shout(Box<dyn DupMessage>);

impl Shout {
    pub fn new<M: Clone + Send + 'static>(msg: M) -> Self {
        Shout(Box::new(msg))
    }

    pub(crate) fn dup(&self) -> AnyMessage {
        self.0.dup()
    }
}

impl fmt::Debug for Shout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shout").finish_non_exhaustive()
    }
}

/// Crash report formatted by a minder, for the Logger to print.
#[derive(Clone, Debug)]
pub struct LogDied(pub String);
