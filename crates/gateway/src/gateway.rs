//! Access gateway core
//!
//! [`Gateway`] ties the node store to the per-node console state. The map of
//! live [`NodeConsole`]s is guarded by one lock that is always taken before
//! any node's own lock. Deleting or replacing a node removes the store record
//! and tears down its console while holding that map lock, so no issuance or
//! attach can slip in between.

use crate::audit::{AuditResult, SharedAuditLogger};
use crate::console::{ConsoleSession, DetachReason, NodeConsole};
use crate::driver::ConsoleDriver;
use crate::error::{GatewayError, Result};
use crate::nodes::{Node, NodeStore};
use protocol::{ConnectionDescriptor, ConsoleToken, NodeId, PowerStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// What a create-or-replace did to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Created,
    /// Descriptor changed; the node's tokens and viewers were ended
    Replaced,
    /// Identical descriptor; nothing changed
    Unchanged,
}

impl PutOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Replaced => "replaced",
            Self::Unchanged => "unchanged",
        }
    }
}

pub struct Gateway {
    store: Arc<dyn NodeStore>,
    driver: ConsoleDriver,
    queue_capacity: usize,
    consoles: Mutex<HashMap<NodeId, Arc<NodeConsole>>>,
    audit: SharedAuditLogger,
}

impl Gateway {
    pub fn new(
        store: Arc<dyn NodeStore>,
        driver: ConsoleDriver,
        queue_capacity: usize,
        audit: SharedAuditLogger,
    ) -> Self {
        Self {
            store,
            driver,
            queue_capacity,
            consoles: Mutex::new(HashMap::new()),
            audit,
        }
    }

    pub fn driver(&self) -> &ConsoleDriver {
        &self.driver
    }

    fn consoles(&self) -> MutexGuard<'_, HashMap<NodeId, Arc<NodeConsole>>> {
        self.consoles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Console state of an existing node, created on first use
    fn console_for(
        &self,
        consoles: &mut HashMap<NodeId, Arc<NodeConsole>>,
        id: &NodeId,
    ) -> Result<Arc<NodeConsole>> {
        if let Some(console) = consoles.get(id) {
            return Ok(Arc::clone(console));
        }
        let node = self.store.get(id).ok_or(GatewayError::NotFound)?;
        let console = NodeConsole::new(node, self.driver.clone(), self.queue_capacity);
        consoles.insert(id.clone(), Arc::clone(&console));
        Ok(console)
    }

    /// Console state only if it has already been created
    fn existing_console(&self, id: &NodeId) -> Option<Arc<NodeConsole>> {
        self.consoles().get(id).cloned()
    }

    /// Create or replace a node
    pub fn put_node(&self, id: NodeId, descriptor: ConnectionDescriptor) -> Result<PutOutcome> {
        descriptor.validate()?;

        let mut consoles = self.consoles();
        let node = Node::new(id.clone(), descriptor);

        let outcome = match self.store.get(&id) {
            Some(existing) if existing == node => PutOutcome::Unchanged,
            Some(_) => {
                if let Some(console) = consoles.remove(&id) {
                    console.tear_down(DetachReason::NodeReplaced);
                }
                self.store.put(node);
                PutOutcome::Replaced
            }
            None => {
                self.store.put(node);
                PutOutcome::Created
            }
        };
        drop(consoles);

        info!("Node {} {}", id, outcome.as_str());
        if let Some(ref audit) = *self.audit {
            audit.log_node_put(&id, outcome.as_str());
        }
        Ok(outcome)
    }

    pub fn get_node(&self, id: &NodeId) -> Option<Node> {
        self.store.get(id)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.store.ids()
    }

    /// Delete a node, revoking its tokens and ending its viewers
    pub fn delete_node(&self, id: &NodeId) -> Result<()> {
        let mut consoles = self.consoles();
        self.store.delete(id).ok_or(GatewayError::NotFound)?;
        if let Some(console) = consoles.remove(id) {
            console.tear_down(DetachReason::NodeDeleted);
        }
        drop(consoles);

        info!("Deleted node {}", id);
        if let Some(ref audit) = *self.audit {
            audit.log_node_deleted(id);
        }
        Ok(())
    }

    /// Issue a console token bound to an existing node
    pub fn issue_token(&self, id: &NodeId) -> Result<ConsoleToken> {
        let token = {
            let mut consoles = self.consoles();
            self.console_for(&mut consoles, id)?.issue_token()?
        };

        if let Some(ref audit) = *self.audit {
            audit.log_token_issued(id);
        }
        Ok(token)
    }

    /// `Ok` only for an active token bound to `id`
    pub fn check_token(&self, id: &NodeId, token: &ConsoleToken) -> Result<()> {
        match self.existing_console(id) {
            Some(console) => console.check_token(token),
            None => Err(GatewayError::NotFound),
        }
    }

    pub fn validate_token(&self, id: &NodeId, token: &ConsoleToken) -> bool {
        self.check_token(id, token).is_ok()
    }

    /// Revoke every active token of an existing node
    ///
    /// Returns the number of tokens revoked.
    pub fn revoke_tokens(&self, id: &NodeId) -> Result<usize> {
        let revoked = match self.existing_console(id) {
            Some(console) => console.revoke_all(),
            None if self.store.get(id).is_some() => 0,
            None => return Err(GatewayError::NotFound),
        };

        if let Some(ref audit) = *self.audit {
            audit.log_tokens_revoked(id, revoked);
        }
        Ok(revoked)
    }

    /// Attach a viewer to the node's console
    pub fn attach(&self, id: &NodeId, token: &ConsoleToken) -> Result<ConsoleSession> {
        let console = self.existing_console(id).ok_or(GatewayError::NotFound)?;
        let session = console.attach(token)?;

        if let Some(ref audit) = *self.audit {
            audit.log_console_attached(id, session.id());
        }
        Ok(session)
    }

    /// Node record for a power action authorized by `token`
    fn authorized_node(&self, id: &NodeId, token: &ConsoleToken) -> Result<Node> {
        let console = self.existing_console(id).ok_or(GatewayError::NotFound)?;
        console.check_token(token)?;
        Ok(console.node().clone())
    }

    pub async fn power_off(&self, id: &NodeId, token: &ConsoleToken) -> Result<()> {
        let node = self.authorized_node(id, token)?;
        let result = self.driver.power_off(&node).await;
        self.audit_power(id, "power off", &result);
        result
    }

    pub async fn power_cycle(&self, id: &NodeId, token: &ConsoleToken, force: bool) -> Result<()> {
        let node = self.authorized_node(id, token)?;
        let result = self.driver.power_cycle(&node, force).await;
        self.audit_power(
            id,
            if force { "power reset" } else { "power cycle" },
            &result,
        );
        result
    }

    pub async fn power_status(&self, id: &NodeId, token: &ConsoleToken) -> Result<PowerStatus> {
        let node = self.authorized_node(id, token)?;
        self.driver.power_status(&node).await
    }

    fn audit_power<T>(&self, id: &NodeId, action: &str, result: &Result<T>) {
        if let Some(ref audit) = *self.audit {
            let outcome = if result.is_ok() {
                AuditResult::Success
            } else {
                AuditResult::Failure
            };
            audit.log_power_action(id, action, outcome);
        }
    }

    /// Tear down every console; used when the process is stopping
    pub fn shutdown(&self) {
        let consoles: Vec<_> = self.consoles().drain().collect();
        debug!("Shutting down {} consoles", consoles.len());
        for (_, console) in consoles {
            console.tear_down(DetachReason::Shutdown);
        }
    }
}
