//! Console multiplexer state
//!
//! One multiplexer per node owns the single read of that node's console and
//! the set of viewers subscribed to it:
//!
//! ```text
//! Unattached ──first attach──> Attached ──node deleted / shutdown──> TornDown
//!      ^                           │
//!      └──── backend stream ended ─┘
//! ```
//!
//! Subscribing and fan-out happen under the owning node's lock, so a viewer
//! receives exactly the units produced after it subscribed, each once and in
//! order. Each viewer has a bounded queue; a viewer whose queue is full when
//! a unit arrives is disconnected and the read carries on.

use bytes::Bytes;
use protocol::ConsoleToken;
use std::collections::HashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Identifier of one attached viewer, unique within a node
pub type SessionId = u64;

/// Why a viewer's stream was ended by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachReason {
    /// The viewer's token was revoked
    Revoked,
    /// The node was deleted
    NodeDeleted,
    /// The node was replaced with a different connection descriptor
    NodeReplaced,
    /// The viewer's queue overflowed
    Lagged,
    /// The backend console stream ended
    BackendClosed,
    /// The gateway is shutting down
    Shutdown,
}

impl std::fmt::Display for DetachReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Revoked => "token revoked",
            Self::NodeDeleted => "node deleted",
            Self::NodeReplaced => "node replaced",
            Self::Lagged => "viewer too slow",
            Self::BackendClosed => "backend closed",
            Self::Shutdown => "gateway shutdown",
        };
        f.write_str(s)
    }
}

/// Multiplexer side of one viewer
struct Subscriber {
    token: ConsoleToken,
    queue: async_channel::Sender<Bytes>,
    detach: oneshot::Sender<DetachReason>,
}

/// Viewer side handed out by [`Multiplexer::subscribe`]
pub struct Subscription {
    pub id: SessionId,
    pub token: ConsoleToken,
    pub queue: async_channel::Receiver<Bytes>,
    pub detached: oneshot::Receiver<DetachReason>,
}

enum Phase {
    Unattached,
    Attached {
        generation: u64,
        producer: JoinHandle<()>,
    },
    TornDown,
}

pub struct Multiplexer {
    phase: Phase,
    subscribers: HashMap<SessionId, Subscriber>,
    next_session: SessionId,
    next_generation: u64,
    queue_capacity: usize,
    units_produced: u64,
}

impl Multiplexer {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            phase: Phase::Unattached,
            subscribers: HashMap::new(),
            next_session: 1,
            next_generation: 1,
            queue_capacity: queue_capacity.max(1),
            units_produced: 0,
        }
    }

    pub fn is_attached(&self) -> bool {
        matches!(self.phase, Phase::Attached { .. })
    }

    pub fn is_torn_down(&self) -> bool {
        matches!(self.phase, Phase::TornDown)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Units read from the backend since this multiplexer was created
    pub fn units_produced(&self) -> u64 {
        self.units_produced
    }

    /// Reserve the generation number for a producer about to be started
    pub fn next_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    /// Record that a producer task now owns the backend read
    pub fn set_attached(&mut self, generation: u64, producer: JoinHandle<()>) {
        debug_assert!(matches!(self.phase, Phase::Unattached));
        self.phase = Phase::Attached {
            generation,
            producer,
        };
    }

    /// Register a viewer; it receives every unit fanned out from now on
    pub fn subscribe(&mut self, token: ConsoleToken) -> Subscription {
        let id = self.next_session;
        self.next_session += 1;

        let (queue_tx, queue_rx) = async_channel::bounded(self.queue_capacity);
        let (detach_tx, detach_rx) = oneshot::channel();

        self.subscribers.insert(
            id,
            Subscriber {
                token,
                queue: queue_tx,
                detach: detach_tx,
            },
        );

        Subscription {
            id,
            token,
            queue: queue_rx,
            detached: detach_rx,
        }
    }

    /// Remove one viewer, signalling `reason` if given
    pub fn detach(&mut self, id: SessionId, reason: Option<DetachReason>) -> bool {
        match self.subscribers.remove(&id) {
            Some(subscriber) => {
                if let Some(reason) = reason {
                    let _ = subscriber.detach.send(reason);
                }
                true
            }
            None => false,
        }
    }

    /// Detach every viewer authenticated by one of `tokens`
    pub fn detach_token_holders(&mut self, tokens: &[ConsoleToken], reason: DetachReason) -> usize {
        let ids: Vec<SessionId> = self
            .subscribers
            .iter()
            .filter(|(_, s)| tokens.contains(&s.token))
            .map(|(id, _)| *id)
            .collect();

        for id in &ids {
            self.detach(*id, Some(reason));
        }
        ids.len()
    }

    pub fn detach_all(&mut self, reason: DetachReason) -> usize {
        let count = self.subscribers.len();
        for (_, subscriber) in self.subscribers.drain() {
            let _ = subscriber.detach.send(reason);
        }
        count
    }

    /// Deliver one unit to every viewer before the next unit is read
    ///
    /// Returns the number of viewers that received it.
    pub fn fan_out(&mut self, unit: Bytes) -> usize {
        self.units_produced += 1;

        let mut lagged = Vec::new();
        let mut gone = Vec::new();

        for (id, subscriber) in &self.subscribers {
            match subscriber.queue.try_send(unit.clone()) {
                Ok(()) => {}
                Err(async_channel::TrySendError::Full(_)) => lagged.push(*id),
                Err(async_channel::TrySendError::Closed(_)) => gone.push(*id),
            }
        }

        for id in lagged {
            warn!(
                "Console viewer {} fell {} units behind, disconnecting",
                id, self.queue_capacity
            );
            self.detach(id, Some(DetachReason::Lagged));
        }
        for id in gone {
            self.detach(id, None);
        }

        self.subscribers.len()
    }

    /// The producer of `generation` saw the backend stream end
    ///
    /// Ends every viewer and returns to `Unattached` so the next attach opens
    /// the backend again. Stale generations are ignored.
    pub fn backend_closed(&mut self, generation: u64) -> bool {
        let current = matches!(
            self.phase,
            Phase::Attached { generation: g, .. } if g == generation
        );
        if !current {
            return false;
        }

        self.phase = Phase::Unattached;
        let count = self.detach_all(DetachReason::BackendClosed);
        debug!(
            "Backend generation {} closed, ended {} viewers",
            generation, count
        );
        true
    }

    /// Stop the backend read and end every viewer; terminal
    pub fn tear_down(&mut self, reason: DetachReason) -> usize {
        if let Phase::Attached { producer, .. } =
            std::mem::replace(&mut self.phase, Phase::TornDown)
        {
            producer.abort();
        }
        self.detach_all(reason)
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        if let Phase::Attached { producer, .. } = &self.phase {
            producer.abort();
        }
    }
}
