//! Console drivers
//!
//! A driver knows how to reach a node's management controller. It opens the
//! node's console as a [`ConsoleSource`], an append-only sequence of output
//! units produced on the driver's own task, and performs chassis power
//! actions.
//!
//! Drivers never decide who may read a console; that is the multiplexer's
//! job. The gateway opens a source at most once per attached multiplexer.

pub mod dummy;
pub mod ipmitool;

pub use dummy::DummyDriver;
pub use ipmitool::IpmitoolDriver;

use crate::config::{ConsoleSettings, DriverKind};
use crate::error::Result;
use crate::nodes::Node;
use bytes::Bytes;
use common::FeedReceiver;
use protocol::PowerStatus;
use tokio::task::JoinHandle;

/// An open console: the feed of output units plus the task producing them
///
/// Dropping the source closes the feed and stops the producing task, which
/// in turn releases the underlying connection.
pub struct ConsoleSource {
    feed: FeedReceiver,
    task: JoinHandle<()>,
}

impl ConsoleSource {
    pub fn new(feed: FeedReceiver, task: JoinHandle<()>) -> Self {
        Self { feed, task }
    }

    /// Next unit of console output, `None` once the backend has ended
    pub async fn next_unit(&self) -> Option<Bytes> {
        self.feed.recv().await
    }
}

impl Drop for ConsoleSource {
    fn drop(&mut self) {
        self.feed.close();
        self.task.abort();
    }
}

/// Driver selected by configuration
#[derive(Debug, Clone)]
pub enum ConsoleDriver {
    Ipmitool(IpmitoolDriver),
    Dummy(DummyDriver),
}

impl ConsoleDriver {
    pub fn from_settings(settings: &ConsoleSettings) -> Self {
        match settings.driver {
            DriverKind::Ipmitool => {
                Self::Ipmitool(IpmitoolDriver::new(settings.ipmitool_path.clone()))
            }
            DriverKind::Dummy => Self::Dummy(DummyDriver::new(settings.dummy_interval())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Ipmitool(_) => "ipmitool",
            Self::Dummy(_) => "dummy",
        }
    }

    /// Open the node's console output; must be called inside a Tokio runtime
    pub fn open_console(&self, node: &Node) -> Result<ConsoleSource> {
        match self {
            Self::Ipmitool(driver) => driver.open_console(node),
            Self::Dummy(driver) => driver.open_console(node),
        }
    }

    pub async fn power_off(&self, node: &Node) -> Result<()> {
        match self {
            Self::Ipmitool(driver) => driver.power_off(node).await,
            Self::Dummy(driver) => driver.power_off(node),
        }
    }

    pub async fn power_cycle(&self, node: &Node, force: bool) -> Result<()> {
        match self {
            Self::Ipmitool(driver) => driver.power_cycle(node, force).await,
            Self::Dummy(driver) => driver.power_cycle(node, force),
        }
    }

    pub async fn power_status(&self, node: &Node) -> Result<PowerStatus> {
        match self {
            Self::Ipmitool(driver) => driver.power_status(node).await,
            Self::Dummy(driver) => Ok(driver.power_status(node)),
        }
    }
}
