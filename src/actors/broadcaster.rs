//! BroadcasterActor - pushes live snapshots to subscribers
//!
//! ## Message Flow
//!
//! ```text
//! Subscribe ──▶ build snapshot ──▶ new subscriber only
//! Timer tick ──▶ build snapshot ──▶ serialize once ──▶ try_send to every subscriber
//!     ↑
//!     └─── created on the first subscription, dropped with the last one
//! ```
//!
//! The actor owns the subscriber set; nothing else mutates it. Subscribers
//! whose receiver is gone are pruned at the start of every tick, before any
//! snapshot is built. A full one just misses that frame.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tracing::{debug, instrument, trace, warn};

use super::messages::{BroadcasterCommand, Frame, SubscriberId, SubscriberWriteError, Subscription};
use crate::metrics::SnapshotBuilder;
use crate::util::now_ms;

/// Frames buffered per subscriber before ticks start being skipped
pub const SUBSCRIBER_QUEUE: usize = 8;

pub struct BroadcasterActor {
    builder: SnapshotBuilder,
    command_rx: mpsc::Receiver<BroadcasterCommand>,
    subscribers: HashMap<SubscriberId, mpsc::Sender<Frame>>,
    next_id: SubscriberId,
    push_interval: Duration,

    /// Only present while there is at least one subscriber
    ticker: Option<Interval>,
}

impl BroadcasterActor {
    pub fn new(
        builder: SnapshotBuilder,
        push_interval: Duration,
        command_rx: mpsc::Receiver<BroadcasterCommand>,
    ) -> Self {
        Self {
            builder,
            command_rx,
            subscribers: HashMap::new(),
            next_id: 1,
            push_interval,
            ticker: None,
        }
    }

    #[instrument(skip(self), fields(push_interval = ?self.push_interval))]
    pub async fn run(mut self) {
        debug!("starting broadcaster");

        loop {
            tokio::select! {
                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        BroadcasterCommand::Subscribe { respond_to } => {
                            let subscription = self.subscribe().await;
                            let _ = respond_to.send(subscription);
                        }

                        BroadcasterCommand::Unsubscribe { id } => {
                            self.remove(id);
                        }

                        BroadcasterCommand::SubscriberCount { respond_to } => {
                            let _ = respond_to.send(self.subscribers.len());
                        }

                        BroadcasterCommand::Close { respond_to } => {
                            debug!("closing broadcaster, releasing {} subscribers", self.subscribers.len());
                            self.subscribers.clear();
                            let _ = respond_to.send(());
                            break;
                        }
                    }
                }

                _ = next_tick(&mut self.ticker), if self.ticker.is_some() => {
                    self.tick().await;
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("broadcaster stopped");
    }

    async fn subscribe(&mut self) -> Subscription {
        let id = self.next_id;
        self.next_id += 1;

        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);

        if let Some(frame) = self.render().await {
            // a fresh queue cannot be full or closed
            let _ = tx.try_send(frame);
        }

        self.subscribers.insert(id, tx);
        if self.ticker.is_none() {
            trace!("first subscriber, starting timer");
            let mut ticker = interval_at(Instant::now() + self.push_interval, self.push_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            self.ticker = Some(ticker);
        }

        debug!("subscriber {id} added ({} total)", self.subscribers.len());
        Subscription { id, frames: rx }
    }

    fn remove(&mut self, id: SubscriberId) {
        if self.subscribers.remove(&id).is_some() {
            debug!("subscriber {id} removed ({} left)", self.subscribers.len());
        }
        if self.subscribers.is_empty() && self.ticker.take().is_some() {
            trace!("no subscribers left, stopping timer");
        }
    }

    async fn tick(&mut self) {
        self.subscribers.retain(|id, tx| {
            let open = !tx.is_closed();
            if !open {
                debug!("subscriber {id} went away");
            }
            open
        });

        if self.subscribers.is_empty() {
            trace!("no live subscribers, stopping timer");
            self.ticker = None;
            return;
        }

        let Some(frame) = self.render().await else {
            return;
        };

        let mut closed = Vec::new();
        for (id, tx) in &self.subscribers {
            match deliver(tx, frame.clone()) {
                Ok(()) => {}
                Err(SubscriberWriteError::Closed) => closed.push(*id),
                Err(SubscriberWriteError::Full) => trace!("subscriber {id} is behind, skipping frame"),
            }
        }

        for id in closed {
            self.remove(id);
        }
    }

    /// Build and serialize one snapshot
    async fn render(&self) -> Option<Frame> {
        let snapshot = self.builder.build_or_empty(now_ms()).await;
        match serde_json::to_string(&snapshot) {
            Ok(json) => Some(Frame::from(json)),
            Err(e) => {
                warn!("failed to serialize snapshot: {e}");
                None
            }
        }
    }
}

fn deliver(tx: &mpsc::Sender<Frame>, frame: Frame) -> Result<(), SubscriberWriteError> {
    tx.try_send(frame).map_err(SubscriberWriteError::from)
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Handle for talking to the BroadcasterActor
#[derive(Clone)]
pub struct BroadcasterHandle {
    sender: mpsc::Sender<BroadcasterCommand>,
}

impl BroadcasterHandle {
    /// Spawn the actor and return a handle to it
    pub fn spawn(builder: SnapshotBuilder, push_interval: Duration) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let actor = BroadcasterActor::new(builder, push_interval, cmd_rx);

        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Register a subscriber; its first frame is already queued
    pub async fn subscribe(&self) -> Result<Subscription> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(BroadcasterCommand::Subscribe { respond_to: tx })
            .await
            .context("failed to send Subscribe command")?;

        rx.await.context("failed to receive subscription")
    }

    pub async fn unsubscribe(&self, id: SubscriberId) -> Result<()> {
        self.sender
            .send(BroadcasterCommand::Unsubscribe { id })
            .await
            .context("failed to send Unsubscribe command")?;
        Ok(())
    }

    pub async fn subscriber_count(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(BroadcasterCommand::SubscriberCount { respond_to: tx })
            .await
            .context("failed to send SubscriberCount command")?;

        rx.await.context("failed to receive subscriber count")
    }

    /// Stop the timer and release every subscriber
    ///
    /// Succeeds if the actor is already gone.
    pub async fn close(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(BroadcasterCommand::Close { respond_to: tx })
            .await
            .is_err()
        {
            return Ok(());
        }

        let _ = rx.await;
        Ok(())
    }
}
