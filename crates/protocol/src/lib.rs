//! Wire types for the console gateway
//!
//! This crate defines the JSON-facing types exchanged with the gateway's HTTP
//! surface: node identifiers, connection descriptors, console tokens and the
//! request/response bodies of the admin and power endpoints.
//!
//! # Example
//!
//! ```
//! use protocol::{ConnectionDescriptor, ConsoleToken};
//!
//! let descriptor: ConnectionDescriptor = serde_json::from_str(
//!     r#"{"type": "ipmi", "info": {"host": "10.0.0.3", "user": "admin", "pass": "secret"}}"#,
//! )
//! .unwrap();
//! assert_eq!(descriptor.kind(), "ipmi");
//!
//! let token = ConsoleToken::generate();
//! let parsed: ConsoleToken = token.to_string().parse().unwrap();
//! assert_eq!(token, parsed);
//! ```

pub mod error;
pub mod messages;
pub mod token;
pub mod types;

pub use error::{ProtocolError, Result};
pub use messages::{PowerCycleRequest, PowerStatus, PowerStatusResponse, TokenResponse};
pub use token::{ConsoleToken, TOKEN_LEN};
pub use types::{ConnectionDescriptor, IpmiInfo, NodeId};
