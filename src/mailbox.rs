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

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::role::AnyMessage;

#[derive(Debug, Error)]
pub enum SendError {
    /// The recipient has no local binding. Local delivery is impossible;
    /// broadcast through a troupe is the extension point for remote actors.
    #[error("actor #{0} is remote; shout through a troupe instead")]
    Remote(u64),
    #[error("inbox of actor #{0} is closed")]
    Closed(u64),
    #[error("inbox of actor #{0} is full")]
    Full(u64),
}

#[derive(Debug)]
enum Control {
    Close,
}

/// Creates the two halves of an actor's mailbox.
///
/// The message channel is bounded: `put` blocks when `capacity` messages are
/// pending, which is the runtime's backpressure policy, not a buffering
/// convenience. The control channel is unbounded so that `close` can never
/// block.
pub(crate) fn create_mailbox(ident: u64, capacity: usize) -> (Mailbox, Inbox) {
    let (msg_tx, msg_rx) = flume::bounded(capacity);
    let (ctrl_tx, ctrl_rx) = flume::unbounded();
    let mailbox = Mailbox {
        ident,
        msg_tx,
        ctrl_tx,
        closed: Arc::new(AtomicBool::new(false)),
    };
    let inbox = Inbox {
        msg_rx,
        ctrl_rx,
        draining: false,
        stash: VecDeque::new(),
    };
    (mailbox, inbox)
}

/// The sender half. Cheap to clone; every [`crate::Id`] with a local binding
/// reaches the actor through one of these.
#[derive(Clone)]
pub(crate) struct Mailbox {
    ident: u64,
    msg_tx: flume::Sender<AnyMessage>,
    ctrl_tx: flume::Sender<Control>,
    closed: Arc<AtomicBool>,
}

impl Mailbox {
    /// Enqueues a message, waiting for room when the inbox is full.
    pub async fn put(&self, msg: AnyMessage) -> Result<(), SendError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SendError::Closed(self.ident));
        }
        self.msg_tx
            .send_async(msg)
            .await
            .map_err(|_| SendError::Closed(self.ident))
    }

    /// Non-blocking variant, used to seed a fresh inbox.
    pub fn try_put(&self, msg: AnyMessage) -> Result<(), SendError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SendError::Closed(self.ident));
        }
        self.msg_tx.try_send(msg).map_err(|err| match err {
            flume::TrySendError::Full(_) => SendError::Full(self.ident),
            flume::TrySendError::Disconnected(_) => SendError::Closed(self.ident),
        })
    }

    /// Closes the inbox. Idempotent.
    ///
    /// Puts fail from this point on. The taker drains whatever was already
    /// accepted, then observes end-of-stream.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _ = self.ctrl_tx.send(Control::Close);
    }
}

/// The receiver half, owned by the actor's cell and taken from exclusively
/// by the task bound to the actor.
pub(crate) struct Inbox {
    msg_rx: flume::Receiver<AnyMessage>,
    ctrl_rx: flume::Receiver<Control>,
    draining: bool,
    stash: VecDeque<AnyMessage>,
}

impl Inbox {
    /// Takes the next message in FIFO order.
    ///
    /// Replayed messages (see [`Inbox::replay`]) come first, then the
    /// channel. Returns `None` once the inbox is closed and drained.
    pub async fn take(&mut self) -> Option<AnyMessage> {
        loop {
            if let Some(msg) = self.stash.pop_front() {
                return Some(msg);
            }
            if self.draining {
                return self.msg_rx.try_recv().ok();
            }
            if self.ctrl_rx.try_recv().is_ok() {
                self.draining = true;
                continue;
            }
            tokio::select! {
                ctrl = self.ctrl_rx.recv_async() => {
                    if ctrl.is_ok() {
                        self.draining = true;
                    }
                }
                msg = self.msg_rx.recv_async() => {
                    match msg {
                        Ok(msg) => return Some(msg),
                        Err(_) => return None,
                    }
                }
            }
        }
    }

    /// Puts messages back at the front of the inbox, preserving their
    /// relative order. The ask correlator uses this to restore everything it
    /// extracted while waiting for its reply.
    pub fn replay(&mut self, msgs: Vec<AnyMessage>) {
        for msg in msgs.into_iter().rev() {
            self.stash.push_front(msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::INBOX_CAPACITY;

    fn msg(n: usize) -> AnyMessage {
        Box::new(n)
    }

    fn open(msg: AnyMessage) -> usize {
        *msg.downcast::<usize>().unwrap()
    }

    #[tokio::test]
    async fn test_put_take_fifo() {
        let (mailbox, mut inbox) = create_mailbox(1, 16);
        for n in 0..8 {
            mailbox.put(msg(n)).await.unwrap();
        }
        for n in 0..8 {
            assert_eq!(open(inbox.take().await.unwrap()), n);
        }
    }

    #[tokio::test]
    async fn test_take_blocks_until_put() {
        let (mailbox, mut inbox) = create_mailbox(1, 16);
        assert!(
            tokio::time::timeout(Duration::from_millis(50), inbox.take())
                .await
                .is_err()
        );
        mailbox.put(msg(7)).await.unwrap();
        assert_eq!(open(inbox.take().await.unwrap()), 7);
    }

    #[tokio::test]
    async fn test_close_drains_then_end_of_stream() {
        let (mailbox, mut inbox) = create_mailbox(1, 16);
        mailbox.put(msg(1)).await.unwrap();
        mailbox.put(msg(2)).await.unwrap();
        mailbox.close();
        assert_eq!(open(inbox.take().await.unwrap()), 1);
        assert_eq!(open(inbox.take().await.unwrap()), 2);
        assert!(inbox.take().await.is_none());
        assert!(inbox.take().await.is_none());
    }

    #[tokio::test]
    async fn test_put_after_close_fails() {
        let (mailbox, _inbox) = create_mailbox(3, 16);
        mailbox.close();
        mailbox.close();
        assert!(matches!(
            mailbox.put(msg(1)).await,
            Err(SendError::Closed(3))
        ));
    }

    #[tokio::test]
    async fn test_close_wakes_pending_taker() {
        let (mailbox, mut inbox) = create_mailbox(1, 16);
        let taker = tokio::spawn(async move { inbox.take().await.is_none() });
        tokio::time::sleep(Duration::from_millis(20)).await;
        mailbox.close();
        assert!(taker.await.unwrap());
    }

    #[tokio::test]
    async fn test_replay_preserves_order_ahead_of_channel() {
        let (mailbox, mut inbox) = create_mailbox(1, 16);
        mailbox.put(msg(30)).await.unwrap();
        inbox.replay(vec![msg(10), msg(20)]);
        assert_eq!(open(inbox.take().await.unwrap()), 10);
        assert_eq!(open(inbox.take().await.unwrap()), 20);
        assert_eq!(open(inbox.take().await.unwrap()), 30);
    }

    #[tokio::test]
    async fn test_backpressure_at_capacity() {
        let (mailbox, mut inbox) = create_mailbox(1, INBOX_CAPACITY);
        for n in 0..INBOX_CAPACITY {
            mailbox.try_put(msg(n)).unwrap();
        }
        assert!(matches!(
            mailbox.try_put(msg(INBOX_CAPACITY)),
            Err(SendError::Full(1))
        ));
        let blocked = {
            let mailbox = mailbox.clone();
            tokio::spawn(async move { mailbox.put(msg(INBOX_CAPACITY)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());
        assert_eq!(open(inbox.take().await.unwrap()), 0);
        blocked.await.unwrap().unwrap();
    }
}
