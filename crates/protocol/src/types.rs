//! Node and connection type definitions
//!
//! A node is a bare-metal machine reachable through an out-of-band
//! management controller. Its connection descriptor tells the gateway how to
//! reach that controller; the descriptor is tagged by connection type so new
//! transports can be added without changing the node record itself.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Node identifier
///
/// Chosen by the operator in the `PUT /node/{id}` path. Unique within a
/// gateway and used as the key for tokens and console state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    /// Create a node id, rejecting empty ids and ids containing `/`
    pub fn parse(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() || id.contains('/') {
            return Err(ProtocolError::InvalidNodeId(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// How the gateway reaches a node's management controller
///
/// Serialized in adjacently tagged form:
///
/// ```json
/// {"type": "ipmi", "info": {"host": "10.0.0.3", "user": "ipmiuser", "pass": "secret"}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "info", rename_all = "lowercase")]
pub enum ConnectionDescriptor {
    /// IPMI over LAN (serial-over-LAN console, chassis power control)
    Ipmi(IpmiInfo),
}

impl ConnectionDescriptor {
    /// Short name of the connection type, as it appears in the `type` field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ipmi(_) => "ipmi",
        }
    }

    /// Parse and validate a descriptor from a JSON request body
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let descriptor: Self = serde_json::from_slice(body)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Check that all required connection fields are present
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Ipmi(info) => info.validate(),
        }
    }
}

/// IPMI controller address and credentials
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpmiInfo {
    /// Controller host name or address (`addr` is accepted as an alias)
    #[serde(alias = "addr")]
    pub host: String,
    /// IPMI user name
    pub user: String,
    /// IPMI password
    pub pass: String,
}

impl IpmiInfo {
    fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(ProtocolError::InvalidDescriptor(
                "ipmi host must not be empty".to_string(),
            ));
        }
        if self.user.is_empty() {
            return Err(ProtocolError::InvalidDescriptor(
                "ipmi user must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

// The password never reaches logs through Debug.
impl fmt::Debug for IpmiInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IpmiInfo")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("pass", &"<redacted>")
            .finish()
    }
}
