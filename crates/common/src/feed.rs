//! Console feed channel between a driver task and a multiplexer
//!
//! A driver produces console output on its own task and hands each unit of
//! output to the multiplexer through a bounded feed. When the multiplexer stops
//! reading, the driver's sends block, so a stalled consumer never causes
//! unbounded buffering inside the gateway.

use async_channel::{Receiver, Sender, bounded};
use bytes::Bytes;

/// Default number of console units buffered between driver and multiplexer
pub const DEFAULT_FEED_CAPACITY: usize = 64;

/// Driver side of a console feed
#[derive(Clone)]
pub struct FeedSender {
    tx: Sender<Bytes>,
}

impl FeedSender {
    /// Send one unit of console output, waiting for space in the feed
    pub async fn send(&self, unit: Bytes) -> crate::Result<()> {
        self.tx
            .send(unit)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// True once the multiplexer side has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Multiplexer side of a console feed
pub struct FeedReceiver {
    rx: Receiver<Bytes>,
}

impl FeedReceiver {
    /// Receive the next unit, or `None` once every sender is gone
    pub async fn recv(&self) -> Option<Bytes> {
        self.rx.recv().await.ok()
    }

    /// Close the feed so pending and future driver sends fail
    pub fn close(&self) {
        self.rx.close();
    }
}

/// Create a bounded console feed
///
/// Returns (FeedSender for the driver, FeedReceiver for the multiplexer)
pub fn create_console_feed(capacity: usize) -> (FeedSender, FeedReceiver) {
    let (tx, rx) = bounded(capacity.max(1));
    (FeedSender { tx }, FeedReceiver { rx })
}
