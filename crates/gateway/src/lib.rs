//! Console access gateway
//!
//! Lets administrators register bare-metal nodes and hand out revocable
//! tokens for watching a node's live serial console. One backend read per
//! node is fanned out to every viewer; revoking a node's tokens cuts its
//! viewers off immediately while the read carries on for later viewers.
//!
//! The binary (`console-gateway`) wires these pieces to an axum server; the
//! library is what the integration tests drive in-process.

pub mod admin;
pub mod audit;
pub mod config;
pub mod console;
pub mod driver;
pub mod error;
pub mod gateway;
pub mod http;
pub mod nodes;

pub use admin::AdminGate;
pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use gateway::{Gateway, PutOutcome};
pub use http::{AppState, router, serve};
pub use nodes::{MemoryNodeStore, Node, NodeStore};
