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

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cell::Cell;
use crate::id::Id;
use crate::mailbox::{create_mailbox, SendError};
use crate::minder::{Logger, PassiveMinder};
use crate::registry::Registry;
use crate::role::{AnyMessage, CaptureEnvironment, Env, ExitStatus, Role};
use crate::scene::Scene;
use crate::signals::{Died, Enter, Entered, Genesis, Leave, Left, PreGenesis};
use crate::spawn::{actor_loop, enlist};
use crate::{INBOX_CAPACITY, SHUTDOWN_GRACE};

/// The default environment-capture hook: no environment.
///
/// Install a different hook with [`play_with`]; whatever it returns for an
/// actor is handed unchanged to that actor's `prologue`, `epilogue`, and
/// `dieing_breath` for its whole life.
pub fn capture_environment(_stage: &Id) -> Env {
    None
}

/// The root actor: registry of everything on stage, and the one that takes
/// the production down.
///
/// Identifier `0`. Before bootstrap it is its own minder; `PreGenesis`
/// installs the [`PassiveMinder`] in that slot.
struct StageRole {
    play: Option<Id>,
    shutdown: Option<JoinHandle<()>>,
}

impl StageRole {
    fn new() -> Self {
        StageRole {
            play: None,
            shutdown: None,
        }
    }

    async fn pre_genesis(&mut self, scene: &Scene, play: Box<dyn Role>) -> anyhow::Result<()> {
        let logger = enlist(scene, Box::new(Logger), scene.me().clone());
        let minder = enlist(
            scene,
            Box::new(PassiveMinder::new(logger.clone())),
            scene.me().clone(),
        );
        scene.set_minder(minder.clone());
        let play_id = enlist(scene, play, minder);
        scene.say(&play_id, Genesis).await?;
        info!(play = %play_id.ident(), logger = %logger.ident(), "genesis");
        self.play = Some(play_id);
        Ok(())
    }

    async fn admit(&mut self, scene: &Scene, enter: Enter) -> anyhow::Result<()> {
        let newcomer = enlist(scene, enter.role, scene.minder());
        let recipient = enter.reply_to.unwrap_or_else(|| newcomer.clone());
        match scene.say(&recipient, Entered(newcomer.clone())).await {
            Ok(()) | Err(SendError::Closed(_)) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn farewell(&mut self, scene: &Scene, left: Left) {
        scene.registry().remove(left.0.ident());
        debug!(who = %left.0.ident(), "left");
        // The child set only empties on a farewell, so checking here covers
        // the whole shutdown fast path.
        if self.shutdown.is_some() && scene.registry().is_empty() {
            if let Some(timer) = self.shutdown.take() {
                timer.abort();
            }
            scene.leave();
        }
    }

    fn bring_down(&mut self, scene: &Scene, died: &Died) {
        warn!(who = %died.who.ident(), "died notice reached the stage, closing");
        scene.leave();
    }
}

#[async_trait]
impl Role for StageRole {
    fn name(&self) -> String {
        "Stage".to_string()
    }

    async fn hear(&mut self, scene: &Scene, msg: AnyMessage) -> anyhow::Result<()> {
        let msg = match msg.downcast::<PreGenesis>() {
            Ok(pre) => return self.pre_genesis(scene, pre.play).await,
            Err(msg) => msg,
        };
        let msg = match msg.downcast::<Enter>() {
            Ok(enter) => return self.admit(scene, *enter).await,
            Err(msg) => msg,
        };
        let msg = match msg.downcast::<Left>() {
            Ok(left) => {
                self.farewell(scene, *left);
                return Ok(());
            }
            Err(msg) => msg,
        };
        let msg = match msg.downcast::<Died>() {
            Ok(died) => {
                self.bring_down(scene, &died);
                return Ok(());
            }
            Err(msg) => msg,
        };
        // Anything the stage does not understand belongs to the play.
        match &self.play {
            Some(play) => match scene.forward(play, msg).await {
                Ok(()) | Err(SendError::Closed(_)) => Ok(()),
                Err(err) => Err(err.into()),
            },
            None => {
                warn!("message for the play arrived before genesis, dropped");
                Ok(())
            }
        }
    }

    /// Graceful shutdown: ask every child to leave, close their inboxes,
    /// and bound the wait with the grace timer. `Left` reports keep being
    /// serviced; once the child set empties the timer is cancelled and the
    /// stage closes immediately.
    async fn on_leave(&mut self, scene: &Scene) -> anyhow::Result<()> {
        if self.shutdown.is_some() {
            return Ok(());
        }
        let children = scene.registry().live();
        info!(children = children.len(), "stage-shutting-down");
        for child in &children {
            match scene.say(child, Leave).await {
                Ok(()) | Err(SendError::Closed(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }
        for child in &children {
            child.close_inbox();
        }
        if scene.registry().is_empty() {
            scene.leave();
            return Ok(());
        }
        let stage_sender = scene.me().local_cell().sender();
        self.shutdown = Some(tokio::spawn(async move {
            tokio::time::sleep(SHUTDOWN_GRACE).await;
            stage_sender.close();
        }));
        Ok(())
    }

    /// The stage reports `Left` to no one. Instead it abandons whatever did
    /// not drain in time: every surviving child inbox is closed, so the
    /// production ends with no open mailbox.
    async fn epilogue(&mut self, scene: &Scene, _env: &Env) -> anyhow::Result<()> {
        if let Some(timer) = self.shutdown.take() {
            timer.abort();
        }
        for child in scene.registry().live() {
            child.close_inbox();
        }
        info!("final-curtain");
        Ok(())
    }
}

/// One production: a Stage wired to its registry, seeded with the play,
/// ready to run.
struct Production {
    scene: Scene,
    role: StageRole,
}

impl Production {
    fn new(play: Box<dyn Role>, capture: CaptureEnvironment) -> Production {
        let registry = Arc::new(Registry::new(capture));
        let (sender, inbox) = create_mailbox(0, INBOX_CAPACITY);
        let cell = Arc::new(Cell::new(0, "Stage".to_string(), sender, inbox));
        let stage = Id::local(0, cell);
        let env = (registry.capture())(&stage);
        let scene = Scene::new(stage.clone(), stage, registry, env);
        scene
            .me()
            .local_cell()
            .try_put(Box::new(PreGenesis { play }))
            .expect("a fresh stage inbox accepts its seed");
        Production {
            scene,
            role: StageRole::new(),
        }
    }

    fn stage_id(&self) -> Id {
        self.scene.stage().clone()
    }

    async fn run(self) -> ExitStatus {
        actor_loop(self.scene, Box::new(self.role)).await
    }
}

/// Creates a Stage, bootstraps it with `play_role`, and drives its
/// dispatcher on the calling task until the production shuts down. Returns
/// once the Stage inbox has closed and every surviving child inbox was
/// closed behind it.
pub async fn play(play_role: impl Role) -> ExitStatus {
    play_with(play_role, Arc::new(capture_environment)).await
}

/// [`play`] with an environment-capture hook, invoked once per actor at
/// spawn time.
pub async fn play_with(play_role: impl Role, capture: CaptureEnvironment) -> ExitStatus {
    Production::new(Box::new(play_role), capture).run().await
}

/// Creates and bootstraps a Stage like [`play`], but forks its dispatcher
/// instead of driving it, and returns the Stage's [`Id`] immediately. Must
/// be called within a tokio runtime.
pub fn genesis(play_role: impl Role) -> Id {
    let production = Production::new(Box::new(play_role), Arc::new(capture_environment));
    let stage = production.stage_id();
    tokio::spawn(production.run());
    stage
}
