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

use std::any::{Any, TypeId};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::id::Id;
use crate::mailbox::SendError;
use crate::registry::Registry;
use crate::role::{AnyMessage, Corpse, Env, Role};
use crate::signals::{Died, Enter, Entered, Left, Shout};
use crate::AskError;

/// Execution context handed to every handler invocation: which actor is
/// running ("the subject"), and on which stage.
///
/// Cloning is cheap and handlers may move a clone into work they schedule,
/// but operations touching the subject's cell assert that the calling task
/// is the one bound to the subject, and panic otherwise.
#[derive(Clone)]
pub struct Scene {
    inner: Arc<SceneInner>,
}

struct SceneInner {
    me: Id,
    stage: Id,
    registry: Arc<Registry>,
    env: Env,
}

impl Scene {
    pub(crate) fn new(me: Id, stage: Id, registry: Arc<Registry>, env: Env) -> Scene {
        Scene {
            inner: Arc::new(SceneInner {
                me,
                stage,
                registry,
                env,
            }),
        }
    }

    /// The subject: the actor currently running.
    pub fn me(&self) -> &Id {
        &self.inner.me
    }

    /// The stage this actor entered.
    pub fn stage(&self) -> &Id {
        &self.inner.stage
    }

    /// The environment captured for the subject when it was spawned.
    pub fn env(&self) -> &Env {
        &self.inner.env
    }

    pub fn is_stage(&self) -> bool {
        self.inner.me.ident() == self.inner.stage.ident()
    }

    pub(crate) fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    /// The subject's minder. The Stage before bootstrap is its own minder.
    pub fn minder(&self) -> Id {
        let cell = self.inner.me.local_cell();
        cell.assert_owner("minder");
        cell.minder().unwrap_or_else(|| self.inner.me.clone())
    }

    pub fn set_minder(&self, minder: Id) {
        let cell = self.inner.me.local_cell();
        cell.assert_owner("set_minder");
        cell.set_minder(minder);
    }

    /// Sends a message, waiting when the recipient's inbox is full.
    pub async fn say<M: Any + Send>(&self, to: &Id, msg: M) -> Result<(), SendError> {
        self.forward(to, Box::new(msg)).await
    }

    /// `say` for a message that is already boxed.
    pub async fn forward(&self, to: &Id, msg: AnyMessage) -> Result<(), SendError> {
        let Some(cell) = to.cell() else {
            return Err(SendError::Remote(to.ident()));
        };
        debug!(from = %self.inner.me.ident(), to = %to.ident(), "say");
        cell.put(msg).await
    }

    /// Broadcasts through a troupe: each member receives its own copy of
    /// `msg`, in member order.
    pub async fn shout<M: Clone + Send + 'static>(
        &self,
        troupe: &Id,
        msg: M,
    ) -> Result<(), SendError> {
        self.say(troupe, Shout::new(msg)).await
    }

    /// Synchronous request over asynchronous messaging.
    ///
    /// Sends `request` to `target`, then takes from the subject's own inbox
    /// until a message of shape `R` arrives; that message is the reply.
    /// Everything taken before the match is restored to the front of the
    /// inbox in its original order, so to the subject's handler the ask is
    /// invisible: the mailbox reads as if only the reply was removed.
    ///
    /// Never times out; see [`Scene::ask_within`] for a deadline.
    pub async fn ask<M, R>(&self, target: &Id, request: M) -> Result<R, AskError>
    where
        M: Any + Send,
        R: Any + Send,
    {
        let reply = self
            .correlate(target, Box::new(request), TypeId::of::<R>(), None)
            .await?;
        Ok(*reply.downcast::<R>().expect("reply matched the asked shape"))
    }

    /// [`Scene::ask`] with a deadline on the reply.
    pub async fn ask_within<M, R>(
        &self,
        target: &Id,
        request: M,
        deadline: Duration,
    ) -> Result<R, AskError>
    where
        M: Any + Send,
        R: Any + Send,
    {
        let reply = self
            .correlate(target, Box::new(request), TypeId::of::<R>(), Some(deadline))
            .await?;
        Ok(*reply.downcast::<R>().expect("reply matched the asked shape"))
    }

    async fn correlate(
        &self,
        target: &Id,
        request: AnyMessage,
        shape: TypeId,
        deadline: Option<Duration>,
    ) -> Result<AnyMessage, AskError> {
        if *target == self.inner.me {
            return Err(AskError::SelfAsk);
        }
        let cell = self.inner.me.local_cell();
        cell.assert_owner("ask");
        self.forward(target, request).await?;
        let expires = deadline.map(|after| tokio::time::Instant::now() + after);
        let mut deferred = Vec::new();
        let outcome = loop {
            let taken = match expires {
                Some(at) => match tokio::time::timeout_at(at, cell.take_next()).await {
                    Ok(taken) => taken,
                    Err(_elapsed) => {
                        break Err(AskError::DeadlineExpired(
                            deadline.expect("deadline set when expiry armed"),
                        ))
                    }
                },
                None => cell.take_next().await,
            };
            match taken {
                None => break Err(AskError::InboxClosed),
                Some(msg) if (*msg).type_id() == shape => break Ok(msg),
                Some(msg) => deferred.push(msg),
            }
        };
        if !deferred.is_empty() {
            cell.replay(deferred).await;
        }
        outcome
    }

    /// Spawns a child actor and returns its [`Id`].
    ///
    /// On an ordinary scene this asks the Stage with [`Enter`] and awaits
    /// [`Entered`]. On the Stage's own scene it is the primitive: register,
    /// fork a dispatcher task, done.
    pub async fn enter(&self, role: impl Role) -> Result<Id, AskError> {
        self.enter_boxed(Box::new(role)).await
    }

    pub(crate) async fn enter_boxed(&self, role: Box<dyn Role>) -> Result<Id, AskError> {
        if self.is_stage() {
            let minder = self.minder();
            return Ok(crate::spawn::enlist(self, role, minder));
        }
        let request = Enter {
            role,
            reply_to: Some(self.inner.me.clone()),
        };
        let stage = self.inner.stage.clone();
        let entered: Entered = self.ask(&stage, request).await?;
        Ok(entered.0)
    }

    /// Requests the subject's own graceful exit: closes its inbox. The
    /// dispatcher drains the backlog, then runs the epilogue.
    pub fn leave(&self) {
        let cell = self.inner.me.local_cell();
        cell.assert_owner("leave");
        debug!(actor_id = %cell.ident(), "leave");
        cell.close();
    }

    /// Reports a normal exit: [`Left`] to the minder, and to the Stage as
    /// well so the membership table shrinks. The minder decides policy;
    /// the Stage keeps the books. A recipient that is already gone during
    /// shutdown is not an error.
    pub async fn report_left(&self) -> anyhow::Result<()> {
        let minder = self.minder();
        self.say_unless_closed(&minder, Left(self.inner.me.clone()))
            .await?;
        if minder != self.inner.stage {
            let stage = self.inner.stage.clone();
            self.say_unless_closed(&stage, Left(self.inner.me.clone()))
                .await?;
        }
        Ok(())
    }

    async fn say_unless_closed<M: Any + Send>(&self, to: &Id, msg: M) -> anyhow::Result<()> {
        match self.say(to, msg).await {
            Ok(()) => Ok(()),
            Err(SendError::Closed(_)) => {
                debug!(from = %self.inner.me.ident(), to = %to.ident(), "recipient gone");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Reports a crash to the minder, and only to the minder: a crashed
    /// actor never reports [`Left`], so it stays on the Stage's books until
    /// the production ends. Same shutdown tolerance as
    /// [`Scene::report_left`].
    pub async fn report_died(&self, corpse: &Corpse) -> anyhow::Result<()> {
        let minder = self.minder();
        let notice = Died {
            who: self.inner.me.clone(),
            corpse: corpse.clone(),
        };
        self.say_unless_closed(&minder, notice).await
    }

    /// Next message for the dispatcher, or `None` once the inbox is closed
    /// and drained.
    pub(crate) async fn take_next(&self) -> Option<AnyMessage> {
        let cell = self.inner.me.local_cell();
        cell.assert_owner("take");
        cell.take_next().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;
    use crate::mailbox::create_mailbox;

    fn scene_for_test() -> Scene {
        let capture: crate::CaptureEnvironment = Arc::new(|_| None);
        let registry = Arc::new(Registry::new(capture));
        let (sender, inbox) = create_mailbox(0, 8);
        let stage = Id::local(0, Arc::new(Cell::new(0, "Stage".to_string(), sender, inbox)));
        let (sender, inbox) = create_mailbox(1, 8);
        let me = Id::local(1, Arc::new(Cell::new(1, "Probe".to_string(), sender, inbox)));
        Scene::new(me, stage, registry, None)
    }

    #[tokio::test]
    async fn test_say_to_remote_id_is_rejected() {
        let scene = scene_for_test();
        let err = scene.say(&Id::remote(99), "hello").await.unwrap_err();
        assert!(matches!(err, SendError::Remote(99)));
        assert!(err.to_string().contains("shout through a troupe"));
    }

    #[tokio::test]
    async fn test_self_ask_is_rejected_without_sending() {
        let scene = scene_for_test();
        let me = scene.me().clone();
        let err = scene.ask::<_, String>(&me, "request").await.unwrap_err();
        assert!(matches!(err, AskError::SelfAsk));
    }
}
