//! Administrator gate
//!
//! Node management and token management require the admin secret, presented
//! either as HTTP Basic credentials for the user `admin` or as a bearer
//! token. The gate only answers pass/fail; callers turn a failure into the
//! same 404 a missing node produces.

use crate::error::{GatewayError, Result};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use subtle::ConstantTimeEq;
use tracing::debug;

/// User name expected in Basic credentials
pub const ADMIN_USER: &str = "admin";

#[derive(Clone)]
pub struct AdminGate {
    /// `None` when no admin secret is configured; every request then fails
    secret: Option<Vec<u8>>,
}

impl std::fmt::Debug for AdminGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminGate")
            .field("configured", &self.secret.is_some())
            .finish()
    }
}

impl AdminGate {
    pub fn new(secret: impl Into<String>) -> Self {
        let secret = secret.into();
        Self {
            secret: (!secret.is_empty()).then(|| secret.into_bytes()),
        }
    }

    /// Check the request's credentials against the admin secret
    pub fn authorize(&self, headers: &HeaderMap) -> bool {
        let Some(secret) = self.secret.as_deref() else {
            return false;
        };
        match presented_secret(headers) {
            Some(presented) => bool::from(secret.ct_eq(presented.as_slice())),
            None => false,
        }
    }

    /// Like [`AdminGate::authorize`], as a `Result` for handler use
    pub fn require(&self, headers: &HeaderMap) -> Result<()> {
        if self.authorize(headers) {
            Ok(())
        } else {
            debug!("Admin authorization failed");
            Err(GatewayError::NotAuthorized)
        }
    }
}

/// Extract the secret from `Authorization: Basic` or `Authorization: Bearer`
fn presented_secret(headers: &HeaderMap) -> Option<Vec<u8>> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, rest) = value.split_once(' ')?;

    if scheme.eq_ignore_ascii_case("basic") {
        let decoded = STANDARD.decode(rest.trim()).ok()?;
        let colon = decoded.iter().position(|&b| b == b':')?;
        let (user, pass) = decoded.split_at(colon);
        if user != ADMIN_USER.as_bytes() {
            return None;
        }
        Some(pass[1..].to_vec())
    } else if scheme.eq_ignore_ascii_case("bearer") {
        Some(rest.trim().as_bytes().to_vec())
    } else {
        None
    }
}
