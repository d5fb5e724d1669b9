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

use std::sync::Mutex;

use tokio::task::JoinHandle;

use crate::id::Id;
use crate::mailbox::{Inbox, Mailbox, SendError};
use crate::role::{AnyMessage, ExitStatus};

tokio::task_local! {
    /// Token of the dispatcher task currently executing, compared against
    /// each cell's bound token on every owner-only operation.
    pub(crate) static CURRENT_TASK: u64;
}

/// The runtime record of one actor: its mailbox halves, its minder link,
/// the token of the task bound to it, and the handle of that task.
///
/// The actor's state itself lives inside the dispatcher loop; the cell only
/// carries what other tasks may legitimately reach (the sender half) and
/// what the owner task reaches through its [`crate::Scene`].
pub(crate) struct Cell {
    ident: u64,
    name: String,
    sender: Mailbox,
    inbox: tokio::sync::Mutex<Option<Inbox>>,
    // None for the Stage until PreGenesis installs the PassiveMinder: the
    // Stage is its own minder, and a literal self-Id here would be a cycle.
    minder: Mutex<Option<Id>>,
    bound: Mutex<Option<u64>>,
    // The record owns its task handle; nothing joins it, dropping a tokio
    // handle detaches.
    #[allow(dead_code)]
    task: Mutex<Option<JoinHandle<ExitStatus>>>,
}

impl Cell {
    pub fn new(ident: u64, name: String, sender: Mailbox, inbox: Inbox) -> Self {
        Cell {
            ident,
            name,
            sender,
            inbox: tokio::sync::Mutex::new(Some(inbox)),
            minder: Mutex::new(None),
            bound: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn ident(&self) -> u64 {
        self.ident
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sender(&self) -> Mailbox {
        self.sender.clone()
    }

    pub async fn put(&self, msg: AnyMessage) -> Result<(), SendError> {
        self.sender.put(msg).await
    }

    pub fn try_put(&self, msg: AnyMessage) -> Result<(), SendError> {
        self.sender.try_put(msg)
    }

    pub fn close(&self) {
        self.sender.close();
    }

    pub fn minder(&self) -> Option<Id> {
        self.minder.lock().unwrap().clone()
    }

    pub fn set_minder(&self, minder: Id) {
        *self.minder.lock().unwrap() = Some(minder);
    }

    /// Binds the calling dispatcher task to this actor. Exactly one task may
    /// ever be bound between entry and the close of the inbox.
    pub fn bind(&self, token: u64) {
        let mut bound = self.bound.lock().unwrap();
        if let Some(prior) = *bound {
            panic!(
                "actor #{} ({}) is already bound to task {prior}; a second dispatcher is a \
                 runtime bug",
                self.ident, self.name
            );
        }
        *bound = Some(token);
    }

    /// Panics unless the calling task is the one bound to this actor.
    ///
    /// This is a contract assertion, not a debug aid: an actor's cell may
    /// only be touched from its own task.
    pub fn assert_owner(&self, op: &str) {
        let current = CURRENT_TASK.try_with(|token| *token).ok();
        let bound = *self.bound.lock().unwrap();
        if current.is_none() || current != bound {
            panic!(
                "`{op}` on actor #{} ({}) from a task that does not own it",
                self.ident, self.name
            );
        }
    }

    pub fn set_task(&self, handle: JoinHandle<ExitStatus>) {
        *self.task.lock().unwrap() = Some(handle);
    }

    /// Next message for the owner task, or `None` once closed and drained.
    pub async fn take_next(&self) -> Option<AnyMessage> {
        let mut slot = self.inbox.lock().await;
        match slot.as_mut() {
            Some(inbox) => inbox.take().await,
            None => None,
        }
    }

    /// Restores extracted messages to the front of the inbox, in order.
    pub async fn replay(&self, msgs: Vec<AnyMessage>) {
        let mut slot = self.inbox.lock().await;
        if let Some(inbox) = slot.as_mut() {
            inbox.replay(msgs);
        }
    }

    /// Drops the receiver half on dispatcher exit, waking any putter still
    /// blocked on a full channel.
    pub async fn retire_inbox(&self) {
        *self.inbox.lock().await = None;
    }
}
