//! Common utilities for the console gateway
//!
//! This crate provides functionality shared by the gateway and its console
//! drivers: error handling, logging setup, and the bounded feed channel that
//! carries console output from a driver task to the node's multiplexer.

pub mod error;
pub mod feed;
pub mod logging;

pub use error::{Error, Result};
pub use feed::{FeedReceiver, FeedSender, create_console_feed};
pub use logging::setup_logging;
