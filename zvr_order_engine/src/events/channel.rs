//! The engine's event bus.
//!
//! Every event travels over one bounded channel as an [`EngineEvent`]. A single dispatcher task owns the receiving
//! end and hands each event to the hook registered for its kind, on a task of its own, so a slow hook never holds up
//! the transaction that produced the event. Events whose kind has no hook are dropped. Events are published strictly
//! after the owning transaction has committed.
use log::*;
use tokio::{
    sync::mpsc,
    task::{JoinError, JoinSet},
};

use super::{EngineEvent, EventHooks};

/// The sending half of the bus.
#[derive(Clone)]
pub struct EventPublisher {
    sender: mpsc::Sender<EngineEvent>,
}

impl EventPublisher {
    /// A failed publish is logged and swallowed. The database is the source of truth; events are a courtesy.
    pub async fn publish(&self, event: EngineEvent) {
        let (kind, order_id) = (event.event_type(), event.order_id());
        if let Err(e) = self.sender.send(event).await {
            error!("📬️ Could not publish {kind:?} for order #{order_id}. {e}");
        }
    }
}

pub struct EventDispatcher {
    receiver: mpsc::Receiver<EngineEvent>,
    sender: mpsc::Sender<EngineEvent>,
    hooks: EventHooks,
}

impl EventDispatcher {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size);
        Self { receiver, sender, hooks }
    }

    pub fn publisher(&self) -> EventPublisher {
        EventPublisher { sender: self.sender.clone() }
    }

    /// Runs until every publisher has been dropped, then waits for the hooks that are still running.
    pub async fn run(self) {
        let Self { mut receiver, sender, hooks } = self;
        // Our own sender must go, otherwise the channel never closes
        drop(sender);
        debug!("📬️ Event dispatcher started");
        let mut running = JoinSet::new();
        loop {
            tokio::select! {
                event = receiver.recv() => {
                    let Some(event) = event else { break };
                    let (kind, order_id) = (event.event_type(), event.order_id());
                    match hooks.job_for(event) {
                        Some(job) => {
                            trace!("📬️ Dispatching {kind:?} for order #{order_id}");
                            running.spawn(job);
                        },
                        None => trace!("📬️ Nobody listens for {kind:?}. Dropped"),
                    }
                },
                Some(done) = running.join_next(), if !running.is_empty() => report(done),
            }
        }
        if !running.is_empty() {
            debug!("📬️ Waiting for {} event hooks to finish", running.len());
        }
        while let Some(done) = running.join_next().await {
            report(done);
        }
        debug!("📬️ Event dispatcher has shut down");
    }
}

fn report(done: Result<(), JoinError>) {
    if let Err(e) = done {
        error!("📬️ An event hook did not finish. {e}");
    }
}
