//! Per-node console token ledger
//!
//! Active tokens move to a bounded revoked history when revoked. Once a
//! revoked token ages out of that history it is forgotten and simply no
//! longer validates. Issuance never collides with an active or remembered
//! token; past that, the 128-bit random value keeps reissue out of reach.

use crate::error::{GatewayError, Result};
use protocol::ConsoleToken;
use std::collections::{HashSet, VecDeque};

/// Revoked tokens remembered per node
pub const REVOKED_HISTORY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Active,
    Revoked,
}

/// Active tokens of one node plus its most recently revoked ones
#[derive(Debug, Default)]
pub struct NodeTokens {
    active: HashSet<ConsoleToken>,
    revoked: HashSet<ConsoleToken>,
    revoked_order: VecDeque<ConsoleToken>,
}

impl NodeTokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a new active token, distinct from every token still known
    pub fn issue(&mut self) -> ConsoleToken {
        loop {
            let token = ConsoleToken::generate();
            if !self.revoked.contains(&token) && self.active.insert(token) {
                return token;
            }
        }
    }

    /// `Ok` only for an active token of this node
    pub fn check(&self, token: &ConsoleToken) -> Result<()> {
        match self.state(token) {
            Some(TokenState::Active) => Ok(()),
            Some(TokenState::Revoked) => Err(GatewayError::Revoked),
            None => Err(GatewayError::NotFound),
        }
    }

    pub fn is_active(&self, token: &ConsoleToken) -> bool {
        self.active.contains(token)
    }

    pub fn state(&self, token: &ConsoleToken) -> Option<TokenState> {
        if self.active.contains(token) {
            Some(TokenState::Active)
        } else if self.revoked.contains(token) {
            Some(TokenState::Revoked)
        } else {
            None
        }
    }

    /// Revoke every active token, returning the ones that changed state
    pub fn revoke_all(&mut self) -> Vec<ConsoleToken> {
        let revoked: Vec<ConsoleToken> = self.active.drain().collect();
        for token in &revoked {
            self.remember_revoked(*token);
        }
        revoked
    }

    fn remember_revoked(&mut self, token: ConsoleToken) {
        if self.revoked_order.len() == REVOKED_HISTORY {
            if let Some(oldest) = self.revoked_order.pop_front() {
                self.revoked.remove(&oldest);
            }
        }
        self.revoked.insert(token);
        self.revoked_order.push_back(token);
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Tokens the ledger currently holds, active and revoked
    pub fn len(&self) -> usize {
        self.active.len() + self.revoked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
