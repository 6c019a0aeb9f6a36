//! Simulated console driver
//!
//! Every opened console emits `"0\n"`, `"1\n"`, `"2\n"`, ... at a fixed
//! interval, so a reader can tell exactly which part of the stream it saw.
//! Power state is tracked in memory per node and starts out on.

use super::ConsoleSource;
use crate::error::Result;
use crate::nodes::Node;
use bytes::Bytes;
use common::create_console_feed;
use common::feed::DEFAULT_FEED_CAPACITY;
use protocol::{NodeId, PowerStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct DummyDriver {
    interval: Duration,
    power: Arc<Mutex<HashMap<NodeId, PowerStatus>>>,
}

impl DummyDriver {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            power: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn open_console(&self, node: &Node) -> Result<ConsoleSource> {
        let (tx, rx) = create_console_feed(DEFAULT_FEED_CAPACITY);
        let interval = self.interval;
        let node_id = node.id.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            for line in 0u64.. {
                ticker.tick().await;
                if tx.send(Bytes::from(format!("{}\n", line))).await.is_err() {
                    debug!("Dummy console for {} closed after {} lines", node_id, line);
                    break;
                }
            }
        });

        debug!("Opened dummy console for {}", node.id);
        Ok(ConsoleSource::new(rx, task))
    }

    pub fn power_off(&self, node: &Node) -> Result<()> {
        info!("Dummy power off for {}", node.id);
        self.set_power(&node.id, PowerStatus::Off);
        Ok(())
    }

    pub fn power_cycle(&self, node: &Node, force: bool) -> Result<()> {
        info!("Dummy power cycle for {} (force: {})", node.id, force);
        self.set_power(&node.id, PowerStatus::On);
        Ok(())
    }

    pub fn power_status(&self, node: &Node) -> PowerStatus {
        self.power
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&node.id)
            .copied()
            .unwrap_or(PowerStatus::On)
    }

    fn set_power(&self, id: &NodeId, status: PowerStatus) {
        self.power
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), status);
    }
}
