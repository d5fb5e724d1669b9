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

use async_trait::async_trait;
use tracing::{debug, error};

use crate::id::Id;
use crate::role::{AnyMessage, Role};
use crate::scene::Scene;
use crate::signals::{Died, Left, LogDied};

/// The default supervision policy: log and escalate.
///
/// `Left` is the normal course of things and is ignored. `Died` is
/// formatted for the [`Logger`], then forwarded to the Stage, which tears
/// the production down. A minder wanting to restart or absorb crashes is a
/// user-provided role installed with [`Scene::set_minder`].
pub struct PassiveMinder {
    logger: Id,
}

impl PassiveMinder {
    pub fn new(logger: Id) -> Self {
        PassiveMinder { logger }
    }
}

#[async_trait]
impl Role for PassiveMinder {
    async fn hear(&mut self, scene: &Scene, msg: AnyMessage) -> anyhow::Result<()> {
        let msg = match msg.downcast::<Left>() {
            Ok(left) => {
                debug!(who = %left.0.ident(), "ward-left");
                return Ok(());
            }
            Err(msg) => msg,
        };
        match msg.downcast::<Died>() {
            Ok(died) => {
                let report = format!(
                    "{} (#{}) died{}: {:?}",
                    died.corpse.name,
                    died.who.ident(),
                    if died.corpse.panicked { " of a panic" } else { "" },
                    died.corpse.cause,
                );
                scene.say(&self.logger, LogDied(report)).await?;
                // The Stage answers a Died by closing its own inbox.
                let stage = scene.stage().clone();
                scene.forward(&stage, died).await?;
                Ok(())
            }
            Err(msg) => {
                debug!(msg = ?(*msg).type_id(), "minder ignores message");
                Ok(())
            }
        }
    }
}

/// Prints crash reports. Unit state; a Logger crash reaches the Stage as a
/// `Died` and is fatal to the production.
#[derive(Default)]
pub struct Logger;

#[async_trait]
impl Role for Logger {
    async fn hear(&mut self, _scene: &Scene, msg: AnyMessage) -> anyhow::Result<()> {
        match msg.downcast::<LogDied>() {
            Ok(log) => {
                error!(report = %log.0, "actor-died");
                eprintln!("==================== an actor died ====================");
                eprintln!("{}", log.0);
                eprintln!("=======================================================");
                Ok(())
            }
            Err(msg) => {
                debug!(msg = ?(*msg).type_id(), "logger ignores message");
                Ok(())
            }
        }
    }
}
