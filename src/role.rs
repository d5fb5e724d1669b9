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

use std::any::{type_name, Any};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::scene::Scene;

/// A message once it is in flight.
///
/// Mailboxes are untyped: any `Send + 'static` value can be said to any
/// actor, and each role decides in `hear` which shapes it understands.
pub type AnyMessage = Box<dyn Any + Send>;

/// A message that can be re-materialized, one copy per recipient.
///
/// This is what a [`crate::Shout`] carries so that a troupe can forward the
/// same payload to every member.
pub trait DupMessage: Send + 'static {
    fn dup(&self) -> AnyMessage;
}

impl<M: Clone + Send + 'static> DupMessage for M {
    fn dup(&self) -> AnyMessage {
        Box::new(self.clone())
    }
}

/// Opaque value captured once per actor at spawn time and handed to the
/// lifecycle hooks (`prologue`, `epilogue`, `dieing_breath`) for that actor's
/// whole life. The default capture hook returns `None`.
pub type Env = Option<Arc<dyn Any + Send + Sync>>;

/// Hook producing the [`Env`] for each newly spawned actor.
pub type CaptureEnvironment = Arc<dyn Fn(&crate::Id) -> Env + Send + Sync>;

/// What is left of an actor after it crashed.
///
/// Travels inside [`crate::Died`] up the minder chain.
#[derive(Clone, Debug)]
pub struct Corpse {
    /// Name of the role, as reported by [`Role::name`].
    pub name: String,
    /// The failure that killed the actor. For a panic, the payload is
    /// rendered into the error message.
    pub cause: Arc<anyhow::Error>,
    /// True if the actor panicked rather than returning an error.
    pub panicked: bool,
}

/// The outcome of an actor's execution, reported through its join handle
/// after the dispatcher loop ends.
#[derive(Clone, Debug, Error)]
pub enum ExitStatus {
    /// The actor drained its inbox after it was closed, and its epilogue
    /// completed. This is the normal exit.
    #[error("success")]
    Success,
    /// A lifecycle hook or a message handler returned an error.
    #[error("failure(cause={0:?})")]
    Failure(Arc<anyhow::Error>),
    /// A lifecycle hook or a message handler panicked.
    #[error("panicked")]
    Panicked,
}

impl ExitStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ExitStatus::Success)
    }
}

impl From<anyhow::Error> for ExitStatus {
    fn from(err: anyhow::Error) -> Self {
        ExitStatus::Failure(Arc::new(err))
    }
}

/// An actor's state and behavior.
///
/// The implementor *is* the actor's state: it is owned by the dispatcher
/// task bound to the actor, and every hook receives `&mut self`, so there is
/// exactly one writer for the actor's whole life.
///
/// Messages are delivered strictly in order, one at a time; a handler runs
/// to completion before the next message is taken.
#[async_trait]
pub trait Role: Send + 'static {
    /// A name identifying the type of actor, used in logs and crash reports.
    fn name(&self) -> String {
        let full_name = type_name::<Self>();
        full_name
            .rsplit("::")
            .next()
            .unwrap_or(full_name)
            .to_string()
    }

    /// Called once, before the first message is taken.
    async fn prologue(&mut self, _scene: &Scene, _env: &Env) -> anyhow::Result<()> {
        Ok(())
    }

    /// Processes one message.
    ///
    /// Returning an error kills the actor: `dieing_breath` runs, the minder
    /// receives [`crate::Died`], and the dispatcher task ends with a failed
    /// [`ExitStatus`].
    async fn hear(&mut self, scene: &Scene, msg: AnyMessage) -> anyhow::Result<()>;

    /// Called when a [`crate::Leave`] request reaches the actor, instead of
    /// `hear`. The default closes the subject's own inbox; the remaining
    /// backlog is drained and the actor exits through `epilogue`.
    async fn on_leave(&mut self, scene: &Scene) -> anyhow::Result<()> {
        scene.leave();
        Ok(())
    }

    /// Called once, after the inbox closed and the backlog drained.
    ///
    /// The default reports [`crate::Left`] to the minder.
    async fn epilogue(&mut self, scene: &Scene, _env: &Env) -> anyhow::Result<()> {
        scene.report_left().await
    }

    /// Called once if any other hook failed, right before the failure is
    /// re-raised through the join handle.
    ///
    /// The default reports [`crate::Died`] to the minder.
    async fn dieing_breath(
        &mut self,
        scene: &Scene,
        corpse: &Corpse,
        _env: &Env,
    ) -> anyhow::Result<()> {
        scene.report_died(corpse).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status_success_predicate() {
        assert!(ExitStatus::Success.is_success());
        assert!(!ExitStatus::Panicked.is_success());
        assert!(!ExitStatus::from(anyhow::anyhow!("boom")).is_success());
    }

    #[test]
    fn test_dup_message_rematerializes_payload() {
        let original = "encore".to_string();
        let copy = original.dup();
        assert_eq!(copy.downcast_ref::<String>().unwrap(), "encore");
    }
}
