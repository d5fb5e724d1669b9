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

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{
    delegate, play, AnyMessage, AskError, Genesis, Id, Leave, Role, Scene, Troupe,
};

pub(crate) fn setup_logging_for_tests() {
    let _ = env_logger::builder().format_timestamp(None).try_init();
}

async fn run_play(role: impl Role) -> crate::ExitStatus {
    tokio::time::timeout(Duration::from_secs(10), play(role))
        .await
        .expect("the production should shut down on its own")
}

#[derive(Debug)]
struct Poke;

#[derive(Debug)]
struct Greet {
    reply_to: Id,
    text: String,
}

/// Replies to a [`Greet`] with its text, to whoever asked.
struct Echo;

#[async_trait]
impl Role for Echo {
    async fn hear(&mut self, scene: &Scene, msg: AnyMessage) -> anyhow::Result<()> {
        if let Ok(greet) = msg.downcast::<Greet>() {
            let Greet { reply_to, text } = *greet;
            scene.say(&reply_to, text).await?;
        }
        Ok(())
    }
}

/// Swallows everything. An ask at this actor never gets an answer.
struct Sink;

#[async_trait]
impl Role for Sink {
    async fn hear(&mut self, _scene: &Scene, _msg: AnyMessage) -> anyhow::Result<()> {
        Ok(())
    }
}

async fn curtain(scene: &Scene) -> anyhow::Result<()> {
    let stage = scene.stage().clone();
    scene.say(&stage, Leave).await?;
    Ok(())
}

#[tokio::test]
async fn test_hello_round_trip() {
    setup_logging_for_tests();

    struct HelloPlay {
        heard: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Role for HelloPlay {
        async fn hear(&mut self, scene: &Scene, msg: AnyMessage) -> anyhow::Result<()> {
            if msg.is::<Genesis>() {
                let child = scene.enter(Echo).await?;
                let reply: String = scene
                    .ask(
                        &child,
                        Greet {
                            reply_to: scene.me().clone(),
                            text: "hi".to_string(),
                        },
                    )
                    .await?;
                self.heard.lock().unwrap().push(reply);
                curtain(scene).await?;
            }
            Ok(())
        }
    }

    let heard = Arc::new(Mutex::new(Vec::new()));
    let status = run_play(HelloPlay {
        heard: heard.clone(),
    })
    .await;
    assert!(status.is_success());
    assert_eq!(*heard.lock().unwrap(), vec!["hi".to_string()]);
}

#[tokio::test]
async fn test_crash_bubbles_to_the_stage() {
    setup_logging_for_tests();

    struct Bomb;

    #[async_trait]
    impl Role for Bomb {
        async fn hear(&mut self, _scene: &Scene, msg: AnyMessage) -> anyhow::Result<()> {
            if msg.is::<Poke>() {
                return Err(anyhow!("the bomb went off"));
            }
            Ok(())
        }
    }

    struct BombPlay;

    #[async_trait]
    impl Role for BombPlay {
        async fn hear(&mut self, scene: &Scene, msg: AnyMessage) -> anyhow::Result<()> {
            if msg.is::<Genesis>() {
                let bomb = scene.enter(Bomb).await?;
                scene.say(&bomb, Poke).await?;
            }
            Ok(())
        }
    }

    // The crash travels Bomb -> PassiveMinder -> Stage, which closes the
    // whole production down without anyone calling Leave.
    let status = run_play(BombPlay).await;
    assert!(status.is_success());
}

#[tokio::test]
async fn test_panic_bubbles_like_an_error() {
    setup_logging_for_tests();

    struct Grenade;

    #[async_trait]
    impl Role for Grenade {
        async fn hear(&mut self, _scene: &Scene, msg: AnyMessage) -> anyhow::Result<()> {
            if msg.is::<Poke>() {
                panic!("the grenade went off");
            }
            Ok(())
        }
    }

    struct GrenadePlay;

    #[async_trait]
    impl Role for GrenadePlay {
        async fn hear(&mut self, scene: &Scene, msg: AnyMessage) -> anyhow::Result<()> {
            if msg.is::<Genesis>() {
                let grenade = scene.enter(Grenade).await?;
                scene.say(&grenade, Poke).await?;
            }
            Ok(())
        }
    }

    let status = run_play(GrenadePlay).await;
    assert!(status.is_success());
}

#[tokio::test]
async fn test_ask_restores_the_mailbox_in_order() {
    setup_logging_for_tests();

    #[derive(Debug)]
    struct M1;
    #[derive(Debug)]
    struct M3;
    #[derive(Debug)]
    struct Reply(String);

    struct Reorderer {
        observed: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Role for Reorderer {
        async fn hear(&mut self, scene: &Scene, msg: AnyMessage) -> anyhow::Result<()> {
            if msg.is::<Genesis>() {
                let sink = scene.enter(Sink).await?;
                let me = scene.me().clone();
                scene.say(&me, M1).await?;
                scene.say(&me, Reply("two".to_string())).await?;
                scene.say(&me, M3).await?;
                // The reply is already sitting behind M1 in our own inbox;
                // the correlator must skip M1, match, and put M1 back first.
                let reply: Reply = scene.ask(&sink, Poke).await?;
                self.observed.lock().unwrap().push(format!("reply:{}", reply.0));
                return Ok(());
            }
            if msg.is::<M1>() {
                self.observed.lock().unwrap().push("m1".to_string());
                return Ok(());
            }
            if msg.is::<M3>() {
                self.observed.lock().unwrap().push("m3".to_string());
                curtain(scene).await?;
            }
            Ok(())
        }
    }

    let observed = Arc::new(Mutex::new(Vec::new()));
    let status = run_play(Reorderer {
        observed: observed.clone(),
    })
    .await;
    assert!(status.is_success());
    assert_eq!(
        *observed.lock().unwrap(),
        vec!["reply:two".to_string(), "m1".to_string(), "m3".to_string()]
    );
}

#[tokio::test]
async fn test_ask_within_gives_up_on_a_mute_target() {
    setup_logging_for_tests();

    struct ImpatientPlay {
        timed_out: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Role for ImpatientPlay {
        async fn hear(&mut self, scene: &Scene, msg: AnyMessage) -> anyhow::Result<()> {
            if msg.is::<Genesis>() {
                let sink = scene.enter(Sink).await?;
                let outcome: Result<String, AskError> = scene
                    .ask_within(&sink, Poke, Duration::from_millis(50))
                    .await;
                if matches!(outcome, Err(AskError::DeadlineExpired(_))) {
                    self.timed_out.store(true, Ordering::Release);
                }
                curtain(scene).await?;
            }
            Ok(())
        }
    }

    let timed_out = Arc::new(AtomicBool::new(false));
    let status = run_play(ImpatientPlay {
        timed_out: timed_out.clone(),
    })
    .await;
    assert!(status.is_success());
    assert!(timed_out.load(Ordering::Acquire));
}

#[tokio::test]
async fn test_shout_reaches_every_member_once() {
    setup_logging_for_tests();

    struct Listener {
        tally: Arc<Mutex<Vec<(u64, String)>>>,
    }

    #[async_trait]
    impl Role for Listener {
        async fn hear(&mut self, scene: &Scene, msg: AnyMessage) -> anyhow::Result<()> {
            if let Ok(text) = msg.downcast::<String>() {
                let heard = {
                    let mut tally = self.tally.lock().unwrap();
                    tally.push((scene.me().ident(), *text));
                    tally.len()
                };
                if heard == 3 {
                    curtain(scene).await?;
                }
            }
            Ok(())
        }
    }

    struct BroadcastPlay {
        tally: Arc<Mutex<Vec<(u64, String)>>>,
    }

    #[async_trait]
    impl Role for BroadcastPlay {
        async fn hear(&mut self, scene: &Scene, msg: AnyMessage) -> anyhow::Result<()> {
            if msg.is::<Genesis>() {
                let mut members = Vec::new();
                for _ in 0..3 {
                    members.push(
                        scene
                            .enter(Listener {
                                tally: self.tally.clone(),
                            })
                            .await?,
                    );
                }
                let troupe = scene.enter(Troupe::new(members)).await?;
                scene.shout(&troupe, "x".to_string()).await?;
            }
            Ok(())
        }
    }

    let tally = Arc::new(Mutex::new(Vec::new()));
    let status = run_play(BroadcastPlay {
        tally: tally.clone(),
    })
    .await;
    assert!(status.is_success());
    let tally = tally.lock().unwrap();
    assert_eq!(tally.len(), 3);
    let members: HashSet<u64> = tally.iter().map(|(ident, _)| *ident).collect();
    assert_eq!(members.len(), 3);
    assert!(tally.iter().all(|(_, text)| text == "x"));
}

#[tokio::test]
async fn test_delegate_shuts_the_system_down() {
    setup_logging_for_tests();

    struct LazyPlay;

    #[async_trait]
    impl Role for LazyPlay {
        async fn hear(&mut self, scene: &Scene, msg: AnyMessage) -> anyhow::Result<()> {
            if msg.is::<Genesis>() {
                delegate(scene, |scene| async move {
                    curtain(&scene).await
                })
                .await?;
            }
            Ok(())
        }
    }

    let status = run_play(LazyPlay).await;
    assert!(status.is_success());
}

#[tokio::test]
async fn test_minder_receives_exactly_one_died() {
    setup_logging_for_tests();

    struct Recorder {
        died: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Role for Recorder {
        async fn hear(&mut self, _scene: &Scene, msg: AnyMessage) -> anyhow::Result<()> {
            if msg.is::<crate::Died>() {
                self.died.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    struct Victim {
        minder: Id,
    }

    #[async_trait]
    impl Role for Victim {
        async fn prologue(&mut self, scene: &Scene, _env: &crate::Env) -> anyhow::Result<()> {
            scene.set_minder(self.minder.clone());
            Ok(())
        }

        async fn hear(&mut self, _scene: &Scene, msg: AnyMessage) -> anyhow::Result<()> {
            if msg.is::<Poke>() {
                return Err(anyhow!("scripted death"));
            }
            Ok(())
        }
    }

    struct MinderPlay {
        died: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Role for MinderPlay {
        async fn hear(&mut self, scene: &Scene, msg: AnyMessage) -> anyhow::Result<()> {
            if msg.is::<Genesis>() {
                let recorder = scene
                    .enter(Recorder {
                        died: self.died.clone(),
                    })
                    .await?;
                let victim = scene.enter(Victim { minder: recorder }).await?;
                scene.say(&victim, Poke).await?;
                // The recorder absorbs the crash, so the production stays
                // up; give the report time to land, then end it ourselves.
                tokio::time::sleep(Duration::from_millis(300)).await;
                curtain(scene).await?;
            }
            Ok(())
        }
    }

    let died = Arc::new(AtomicUsize::new(0));
    let status = run_play(MinderPlay { died: died.clone() }).await;
    assert!(status.is_success());
    assert_eq!(died.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_identifiers_stay_unique_across_departures() {
    setup_logging_for_tests();

    struct Transient;

    #[async_trait]
    impl Role for Transient {
        async fn hear(&mut self, scene: &Scene, msg: AnyMessage) -> anyhow::Result<()> {
            if msg.is::<Poke>() {
                scene.leave();
            }
            Ok(())
        }
    }

    struct UniquePlay {
        idents: Arc<Mutex<HashSet<u64>>>,
    }

    #[async_trait]
    impl Role for UniquePlay {
        async fn hear(&mut self, scene: &Scene, msg: AnyMessage) -> anyhow::Result<()> {
            if msg.is::<Genesis>() {
                let mut spawned = Vec::new();
                for _ in 0..3 {
                    spawned.push(scene.enter(Transient).await?);
                }
                scene.say(&spawned[0], Poke).await?;
                tokio::time::sleep(Duration::from_millis(100)).await;
                spawned.push(scene.enter(Transient).await?);
                {
                    let mut idents = self.idents.lock().unwrap();
                    for id in &spawned {
                        idents.insert(id.ident());
                    }
                }
                curtain(scene).await?;
            }
            Ok(())
        }
    }

    let idents = Arc::new(Mutex::new(HashSet::new()));
    let status = run_play(UniquePlay {
        idents: idents.clone(),
    })
    .await;
    assert!(status.is_success());
    assert_eq!(idents.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn test_scene_smuggled_to_another_task_fails_loudly() {
    setup_logging_for_tests();

    struct Smuggler {
        caught: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Role for Smuggler {
        async fn hear(&mut self, scene: &Scene, msg: AnyMessage) -> anyhow::Result<()> {
            if msg.is::<Genesis>() {
                let smuggled = scene.clone();
                let intruder = tokio::spawn(async move { smuggled.leave() });
                let outcome = intruder.await;
                if outcome.is_err_and(|err| err.is_panic()) {
                    self.caught.store(true, Ordering::Release);
                }
                curtain(scene).await?;
            }
            Ok(())
        }
    }

    let caught = Arc::new(AtomicBool::new(false));
    let status = run_play(Smuggler {
        caught: caught.clone(),
    })
    .await;
    assert!(status.is_success());
    assert!(caught.load(Ordering::Acquire));
}

#[tokio::test]
async fn test_fifo_holds_under_jittered_sends() {
    setup_logging_for_tests();

    const TOTAL: u32 = 200;

    struct Counter {
        seen: Arc<Mutex<Vec<u32>>>,
    }

    #[async_trait]
    impl Role for Counter {
        async fn hear(&mut self, scene: &Scene, msg: AnyMessage) -> anyhow::Result<()> {
            if let Ok(n) = msg.downcast::<u32>() {
                let heard = {
                    let mut seen = self.seen.lock().unwrap();
                    seen.push(*n);
                    seen.len() as u32
                };
                if heard == TOTAL {
                    curtain(scene).await?;
                }
            }
            Ok(())
        }
    }

    struct FifoPlay {
        seen: Arc<Mutex<Vec<u32>>>,
    }

    #[async_trait]
    impl Role for FifoPlay {
        async fn hear(&mut self, scene: &Scene, msg: AnyMessage) -> anyhow::Result<()> {
            if msg.is::<Genesis>() {
                let counter = scene
                    .enter(Counter {
                        seen: self.seen.clone(),
                    })
                    .await?;
                let mut rng = StdRng::seed_from_u64(420);
                for n in 0..TOTAL {
                    scene.say(&counter, n).await?;
                    if rng.gen_bool(0.2) {
                        tokio::time::sleep(Duration::from_micros(rng.gen_range(0..500))).await;
                    }
                }
            }
            Ok(())
        }
    }

    let seen = Arc::new(Mutex::new(Vec::new()));
    let status = run_play(FifoPlay { seen: seen.clone() }).await;
    assert!(status.is_success());
    assert_eq!(*seen.lock().unwrap(), (0..TOTAL).collect::<Vec<u32>>());
}
