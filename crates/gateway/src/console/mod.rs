//! Per-node console access
//!
//! A [`NodeConsole`] holds the node's token ledger and its multiplexer under
//! a single lock. Issuance, validation, revocation, attach and every fan-out
//! step take that lock, so a revoke racing an attach can never leave a viewer
//! attached on a revoked token, and a revoked viewer never sees a unit
//! produced after the revocation.

pub mod mux;
pub mod tokens;

pub use mux::{DetachReason, Multiplexer, SessionId};
pub use tokens::{NodeTokens, TokenState};

use crate::driver::{ConsoleDriver, ConsoleSource};
use crate::error::{GatewayError, Result};
use crate::nodes::Node;
use bytes::Bytes;
use protocol::{ConsoleToken, NodeId};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

struct ConsoleState {
    tokens: NodeTokens,
    mux: Multiplexer,
}

/// Console token ledger and live multiplexer of one node
pub struct NodeConsole {
    node: Node,
    driver: ConsoleDriver,
    state: Mutex<ConsoleState>,
}

impl NodeConsole {
    pub fn new(node: Node, driver: ConsoleDriver, queue_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            node,
            driver,
            state: Mutex::new(ConsoleState {
                tokens: NodeTokens::new(),
                mux: Multiplexer::new(queue_capacity),
            }),
        })
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    fn lock(&self) -> MutexGuard<'_, ConsoleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Issue a fresh active token bound to this node
    pub fn issue_token(&self) -> Result<ConsoleToken> {
        let mut state = self.lock();
        if state.mux.is_torn_down() {
            return Err(GatewayError::NotFound);
        }
        let token = state.tokens.issue();
        debug!("Issued console token {:?} for {}", token, self.node.id);
        Ok(token)
    }

    /// `Ok` only for an active token of this node
    pub fn check_token(&self, token: &ConsoleToken) -> Result<()> {
        let state = self.lock();
        if state.mux.is_torn_down() {
            return Err(GatewayError::NotFound);
        }
        state.tokens.check(token)
    }

    /// Revoke every active token and end every viewer using one of them
    ///
    /// Returns the number of tokens revoked. The backend read keeps running.
    pub fn revoke_all(&self) -> usize {
        let mut state = self.lock();
        let revoked = state.tokens.revoke_all();
        let detached = state
            .mux
            .detach_token_holders(&revoked, DetachReason::Revoked);
        info!(
            "Revoked {} console tokens for {}, ended {} viewers",
            revoked.len(),
            self.node.id,
            detached
        );
        revoked.len()
    }

    /// Attach a viewer authenticated by `token`
    ///
    /// The first attach opens the driver's console and starts the producer
    /// task; later attaches only subscribe to it.
    pub fn attach(self: &Arc<Self>, token: &ConsoleToken) -> Result<ConsoleSession> {
        let mut state = self.lock();
        if state.mux.is_torn_down() {
            return Err(GatewayError::NotFound);
        }
        state.tokens.check(token)?;

        if !state.mux.is_attached() {
            let source = self.driver.open_console(&self.node)?;
            let generation = state.mux.next_generation();
            let producer = tokio::spawn(run_producer(Arc::downgrade(self), source, generation));
            state.mux.set_attached(generation, producer);
            info!(
                "Attached {} console for {} (generation {})",
                self.driver.name(),
                self.node.id,
                generation
            );
        }

        let subscription = state.mux.subscribe(*token);
        debug!(
            "Viewer {} attached to {} ({} viewers)",
            subscription.id,
            self.node.id,
            state.mux.subscriber_count()
        );

        Ok(ConsoleSession {
            id: subscription.id,
            node_id: self.node.id.clone(),
            console: Arc::downgrade(self),
            queue: subscription.queue,
            detached: Some(subscription.detached),
            reason: None,
        })
    }

    /// Revoke all tokens, stop the backend read and end every viewer
    pub fn tear_down(&self, reason: DetachReason) {
        let mut state = self.lock();
        state.tokens.revoke_all();
        let ended = state.mux.tear_down(reason);
        info!(
            "Tore down console for {} ({}), ended {} viewers",
            self.node.id, reason, ended
        );
    }

    pub fn is_torn_down(&self) -> bool {
        self.lock().mux.is_torn_down()
    }

    pub fn is_attached(&self) -> bool {
        self.lock().mux.is_attached()
    }

    pub fn viewer_count(&self) -> usize {
        self.lock().mux.subscriber_count()
    }

    fn fan_out(&self, unit: Bytes) {
        self.lock().mux.fan_out(unit);
    }

    fn backend_closed(&self, generation: u64) {
        if self.lock().mux.backend_closed(generation) {
            warn!("Console backend for {} ended", self.node.id);
        }
    }

    fn detach(&self, id: SessionId) {
        if self.lock().mux.detach(id, None) {
            debug!("Viewer {} left {}", id, self.node.id);
        }
    }
}

/// Sole reader of a node's console source
async fn run_producer(console: Weak<NodeConsole>, source: ConsoleSource, generation: u64) {
    loop {
        let unit = source.next_unit().await;
        let Some(console) = console.upgrade() else {
            break;
        };
        match unit {
            Some(unit) => console.fan_out(unit),
            None => {
                console.backend_closed(generation);
                break;
            }
        }
    }
}

/// One attached viewer of a node's console
///
/// Dropping the session detaches it from the multiplexer.
pub struct ConsoleSession {
    id: SessionId,
    node_id: NodeId,
    console: Weak<NodeConsole>,
    queue: async_channel::Receiver<Bytes>,
    detached: Option<oneshot::Receiver<DetachReason>>,
    reason: Option<DetachReason>,
}

impl ConsoleSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Why the gateway ended this session, once it has
    pub fn detach_reason(&self) -> Option<DetachReason> {
        self.reason
    }

    /// Next unit of console output, or `None` once the session has ended
    ///
    /// A pending detach signal always wins over queued units, so nothing is
    /// delivered after the session has been cut off.
    pub async fn next_unit(&mut self) -> Option<Bytes> {
        let outcome = {
            let detached = self.detached.as_mut()?;
            tokio::select! {
                biased;
                reason = detached => Err(reason.ok()),
                unit = self.queue.recv() => Ok(unit.ok()),
            }
        };

        match outcome {
            Ok(Some(unit)) => Some(unit),
            Ok(None) => {
                self.detached = None;
                None
            }
            Err(reason) => {
                self.detached = None;
                self.reason = reason;
                debug!(
                    "Viewer {} of {} detached: {}",
                    self.id,
                    self.node_id,
                    reason.map_or_else(|| "console closed".to_string(), |r| r.to_string())
                );
                None
            }
        }
    }
}

impl Drop for ConsoleSession {
    fn drop(&mut self) {
        if self.detached.is_some() {
            if let Some(console) = self.console.upgrade() {
                console.detach(self.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DummyDriver;
    use protocol::{ConnectionDescriptor, IpmiInfo};
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn console(queue: usize) -> Arc<NodeConsole> {
        let node = Node::new(
            NodeId::from("n1"),
            ConnectionDescriptor::Ipmi(IpmiInfo {
                host: "10.0.0.3".to_string(),
                user: "ipmiuser".to_string(),
                pass: "secret".to_string(),
            }),
        );
        let driver = ConsoleDriver::Dummy(DummyDriver::new(Duration::from_millis(2)));
        NodeConsole::new(node, driver, queue)
    }

    fn line_index(unit: &Bytes) -> u64 {
        String::from_utf8_lossy(unit).trim().parse().unwrap()
    }

    #[tokio::test]
    async fn test_attach_requires_active_token() {
        let console = console(64);
        assert!(matches!(
            console.attach(&ConsoleToken::generate()),
            Err(GatewayError::NotFound)
        ));
        assert!(!console.is_attached());

        let token = console.issue_token().unwrap();
        let _session = console.attach(&token).unwrap();
        assert!(console.is_attached());
        assert_eq!(console.viewer_count(), 1);
    }

    #[tokio::test]
    async fn test_session_receives_contiguous_units() {
        let console = console(64);
        let token = console.issue_token().unwrap();
        let mut session = console.attach(&token).unwrap();

        let first = line_index(&timeout(WAIT, session.next_unit()).await.unwrap().unwrap());
        for expected in first + 1..first + 20 {
            let unit = timeout(WAIT, session.next_unit()).await.unwrap().unwrap();
            assert_eq!(line_index(&unit), expected);
        }
    }

    #[tokio::test]
    async fn test_revoke_ends_session_and_keeps_backend() {
        let console = console(64);
        let t1 = console.issue_token().unwrap();
        let mut s1 = console.attach(&t1).unwrap();

        let mut last = 0;
        for _ in 0..5 {
            last = line_index(&timeout(WAIT, s1.next_unit()).await.unwrap().unwrap());
        }

        assert_eq!(console.revoke_all(), 1);
        assert!(timeout(WAIT, s1.next_unit()).await.unwrap().is_none());
        assert_eq!(s1.detach_reason(), Some(DetachReason::Revoked));
        assert!(matches!(console.check_token(&t1), Err(GatewayError::Revoked)));
        assert!(matches!(console.attach(&t1), Err(GatewayError::Revoked)));

        // The backend read never stopped: a new viewer continues past `last`
        assert!(console.is_attached());
        let t2 = console.issue_token().unwrap();
        let mut s2 = console.attach(&t2).unwrap();
        let next = line_index(&timeout(WAIT, s2.next_unit()).await.unwrap().unwrap());
        assert!(next > last);
    }

    #[tokio::test]
    async fn test_dropped_session_detaches() {
        let console = console(64);
        let token = console.issue_token().unwrap();
        let session = console.attach(&token).unwrap();
        let again = console.attach(&token).unwrap();
        assert_eq!(console.viewer_count(), 2);

        drop(session);
        assert_eq!(console.viewer_count(), 1);
        drop(again);
        assert_eq!(console.viewer_count(), 0);
        assert!(console.is_attached());
    }

    #[tokio::test]
    async fn test_tear_down_is_final() {
        let console = console(64);
        let token = console.issue_token().unwrap();
        let mut session = console.attach(&token).unwrap();

        console.tear_down(DetachReason::NodeDeleted);
        assert!(timeout(WAIT, session.next_unit()).await.unwrap().is_none());
        assert_eq!(session.detach_reason(), Some(DetachReason::NodeDeleted));
        assert!(console.is_torn_down());
        assert!(matches!(console.issue_token(), Err(GatewayError::NotFound)));
        assert!(matches!(console.attach(&token), Err(GatewayError::NotFound)));
    }
}
