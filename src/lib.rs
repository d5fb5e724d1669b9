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

#![deny(clippy::disallowed_methods)]

//! greenroom is a lightweight local actor runtime.
//!
//! It solves the following problem:
//! - build concurrent systems out of isolated units that only exchange
//!   asynchronous messages.
//! - keep each unit's state owned by exactly one task, checked at runtime.
//! - supervise crashes through a minder hierarchy instead of in-line error
//!   handling.
//! - shut the whole system down deterministically, leaving no task or
//!   mailbox behind.
//!
//! The vocabulary is theatrical: actors enter a [`Stage`](crate::play),
//! every handler runs inside a [`Scene`], the top-level user actor is the
//! play, and broadcast goes through a [`Troupe`].

use std::time::Duration;

use thiserror::Error;

mod cell;
mod id;
mod mailbox;
mod minder;
mod registry;
mod role;
mod scene;
mod signals;
mod spawn;
mod stage;
mod troupe;

#[cfg(test)]
pub(crate) mod tests;

pub use id::Id;
pub use mailbox::SendError;
pub use minder::{Logger, PassiveMinder};
pub use role::{AnyMessage, CaptureEnvironment, Corpse, DupMessage, Env, ExitStatus, Role};
pub use scene::Scene;
pub use signals::{Died, Enter, Entered, Genesis, Leave, Left, LogDied, PreGenesis, Shout};
pub use stage::{capture_environment, genesis, play, play_with};
pub use troupe::{delegate, Stooge, Troupe};

/// Capacity of every actor's inbox.
///
/// This is the runtime's backpressure policy: a sender to a full inbox
/// blocks until the recipient drains a message or the inbox closes. It is
/// not a buffering convenience.
pub const INBOX_CAPACITY: usize = 420;

/// How long a stage waits, after asking its children to leave, before it
/// abandons whoever has not drained and closes its own inbox.
///
/// The timer bounds shutdown latency; it does not forcibly kill children.
pub const SHUTDOWN_GRACE: Duration = if cfg!(test) {
    // Unit tests exercise the abandonment path; no need to idle a full
    // second for it.
    Duration::from_millis(250)
} else {
    Duration::from_secs(1)
};

/// Error returned by `Scene::ask` and `Scene::ask_within`.
#[derive(Error, Debug)]
pub enum AskError {
    /// The subject asked itself. Its own dispatcher is the only thing that
    /// could answer, and it is busy asking.
    #[error("subject cannot ask itself: the reply could never be produced")]
    SelfAsk,
    #[error("request was not delivered: {0}")]
    NotDelivered(#[from] SendError),
    #[error("inbox closed before a reply arrived")]
    InboxClosed,
    #[error("no reply within {0:?}")]
    DeadlineExpired(Duration),
}
