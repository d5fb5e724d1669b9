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

use std::future::Future;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::debug;

use crate::id::Id;
use crate::mailbox::SendError;
use crate::role::{AnyMessage, Role};
use crate::scene::Scene;
use crate::signals::{Enter, Entered, Shout};

/// Fans a [`Shout`] out to an ordered list of members, one copy each, in
/// list order. Broadcast is also the extension point for remote delivery:
/// a troupe may hold remote `Id`s once a transport backs them.
pub struct Troupe {
    members: Vec<Id>,
}

impl Troupe {
    pub fn new(members: Vec<Id>) -> Self {
        Troupe { members }
    }
}

#[async_trait]
impl Role for Troupe {
    async fn hear(&mut self, scene: &Scene, msg: AnyMessage) -> anyhow::Result<()> {
        match msg.downcast::<Shout>() {
            Ok(shout) => {
                for member in &self.members {
                    scene.forward(member, shout.dup()).await?;
                }
                Ok(())
            }
            Err(msg) => {
                debug!(msg = ?(*msg).type_id(), "troupe ignores message");
                Ok(())
            }
        }
    }
}

type Turn = Box<dyn FnOnce(Scene) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// An ephemeral actor that runs one closure and exits.
///
/// The stooge enters the stage with no `reply_to`, so the [`Entered`]
/// acknowledgment lands in its own inbox. That is its cue to act.
pub struct Stooge {
    turn: Option<Turn>,
}

impl Stooge {
    pub fn new<F, Fut>(turn: F) -> Self
    where
        F: FnOnce(Scene) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Stooge {
            turn: Some(Box::new(move |scene| turn(scene).boxed())),
        }
    }
}

#[async_trait]
impl Role for Stooge {
    async fn hear(&mut self, scene: &Scene, msg: AnyMessage) -> anyhow::Result<()> {
        match msg.downcast::<Entered>() {
            Ok(entered) if entered.0 == *scene.me() => {
                if let Some(turn) = self.turn.take() {
                    turn(scene.clone()).await?;
                }
                scene.leave();
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Spawns a [`Stooge`] to run `turn` once, fire-and-forget. The caller does
/// no further work; the stooge acts as soon as the Stage admits it.
pub async fn delegate<F, Fut>(scene: &Scene, turn: F) -> Result<(), SendError>
where
    F: FnOnce(Scene) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let request = Enter {
        role: Box::new(Stooge::new(turn)),
        reply_to: None,
    };
    let stage = scene.stage().clone();
    scene.say(&stage, request).await
}
