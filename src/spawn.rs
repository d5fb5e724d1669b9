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

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use futures::FutureExt;
use tracing::{debug, error, info};

use crate::cell::{Cell, CURRENT_TASK};
use crate::id::Id;
use crate::mailbox::create_mailbox;
use crate::role::{Corpse, Env, ExitStatus, Role};
use crate::scene::Scene;
use crate::signals::Leave;
use crate::INBOX_CAPACITY;

static NEXT_TASK_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Registers a new actor on the subject's stage and forks its dispatcher
/// task. This is the spawning primitive; only the Stage's own scene uses it
/// directly.
pub(crate) fn enlist(scene: &Scene, role: Box<dyn Role>, minder: Id) -> Id {
    let registry = scene.registry();
    let ident = registry.allocate();
    let name = role.name();
    let (sender, inbox) = create_mailbox(ident, INBOX_CAPACITY);
    let cell = Arc::new(Cell::new(ident, name, sender, inbox));
    cell.set_minder(minder);
    let id = Id::local(ident, cell);
    registry.insert(id.clone());
    let env = (registry.capture())(scene.stage());
    let child_scene = Scene::new(id.clone(), scene.stage().clone(), registry.clone(), env);
    fork(child_scene, role);
    id
}

/// Forks a dispatcher task for an actor that already has a cell and scene.
/// Ordinary actors are not pinned; they may migrate across worker threads.
pub(crate) fn fork(scene: Scene, role: Box<dyn Role>) {
    let cell = scene.me().local_cell().clone();
    debug!(actor_id = %cell.ident(), name = %cell.name(), "spawn-actor");
    let handle = tokio::spawn(actor_loop(scene, role));
    cell.set_task(handle);
}

/// The per-actor receive loop.
///
/// Binds the current task to the actor, runs
/// `prologue → (take, hear)* → epilogue`, reports a crash to the minder
/// exactly once through `dieing_breath`, and always closes and retires the
/// inbox on the way out. The returned status re-raises any failure to
/// whoever joins the task.
pub(crate) async fn actor_loop(scene: Scene, role: Box<dyn Role>) -> ExitStatus {
    let token = NEXT_TASK_TOKEN.fetch_add(1, Ordering::Relaxed);
    CURRENT_TASK
        .scope(token, async move {
            let cell = scene.me().local_cell().clone();
            cell.bind(token);
            let mut role = role;
            let status = run_role(&mut role, &scene).await;
            cell.close();
            cell.retire_inbox().await;
            if !status.is_success() {
                error!(actor_id = %cell.ident(), name = %cell.name(), exit_status = %status, "actor-failure");
            }
            info!(actor_id = %cell.ident(), exit_status = %status, "actor-exit");
            status
        })
        .await
}

async fn run_role(role: &mut Box<dyn Role>, scene: &Scene) -> ExitStatus {
    let env = scene.env().clone();
    if let Err(demise) = guarded(role.prologue(scene, &env)).await {
        return expire(role, scene, demise, &env).await;
    }
    loop {
        let Some(msg) = scene.take_next().await else {
            break;
        };
        let outcome = if msg.is::<Leave>() {
            guarded(role.on_leave(scene)).await
        } else {
            guarded(role.hear(scene, msg)).await
        };
        if let Err(demise) = outcome {
            return expire(role, scene, demise, &env).await;
        }
    }
    if let Err(demise) = guarded(role.epilogue(scene, &env)).await {
        return expire(role, scene, demise, &env).await;
    }
    ExitStatus::Success
}

enum Demise {
    Failure(anyhow::Error),
    Panic(anyhow::Error),
}

async fn guarded(hook: impl Future<Output = anyhow::Result<()>>) -> Result<(), Demise> {
    match AssertUnwindSafe(hook).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(Demise::Failure(err)),
        Err(payload) => Err(Demise::Panic(anyhow!("panic: {}", panic_message(&payload)))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// The one place a crash is caught: builds the corpse, gives the role its
/// dieing breath (default: report `Died` to the minder), and turns the
/// demise into a failed exit status.
async fn expire(
    role: &mut Box<dyn Role>,
    scene: &Scene,
    demise: Demise,
    env: &Env,
) -> ExitStatus {
    let (cause, panicked) = match demise {
        Demise::Failure(err) => (err, false),
        Demise::Panic(err) => (err, true),
    };
    let cause = Arc::new(cause);
    let corpse = Corpse {
        name: role.name(),
        cause: cause.clone(),
        panicked,
    };
    if let Err(breath) = guarded(role.dieing_breath(scene, &corpse, env)).await {
        let cause = match breath {
            Demise::Failure(err) | Demise::Panic(err) => err,
        };
        error!(actor_id = %scene.me().ident(), cause = ?cause, "dieing-breath-failed");
    }
    if panicked {
        ExitStatus::Panicked
    } else {
        ExitStatus::Failure(cause)
    }
}
