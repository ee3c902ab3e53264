//! Debounced refresh scheduling
//!
//! Sensor change notifications only ever *request* an update. Requests land
//! in a single-slot queue; the [`Debouncer`] waits for the cooldown after the
//! first request of a burst and then drains the slot, so a burst of changes
//! yields exactly one update tick.

use std::time::Duration;
use tokio::sync::mpsc;

/// Cloneable handle used by backends to ask for an update tick
#[derive(Debug, Clone)]
pub struct RefreshRequester {
    tx: mpsc::Sender<()>,
}

impl RefreshRequester {
    /// Request a tick. Returns false when one is already pending or the
    /// receiving side is gone.
    pub fn request_refresh(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }

    /// A requester whose requests go nowhere
    pub fn detached() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { tx }
    }
}

/// Receiving side of the refresh queue
#[derive(Debug)]
pub struct Debouncer {
    rx: mpsc::Receiver<()>,
    cooldown: Duration,
}

impl Debouncer {
    /// Wait for the next debounced tick. Returns `None` once every
    /// requester has been dropped.
    pub async fn next(&mut self) -> Option<()> {
        self.rx.recv().await?;
        if !self.cooldown.is_zero() {
            tokio::time::sleep(self.cooldown).await;
        }
        while self.rx.try_recv().is_ok() {}
        Some(())
    }
}

/// Create a linked requester/debouncer pair
pub fn refresh_channel(cooldown: Duration) -> (RefreshRequester, Debouncer) {
    let (tx, rx) = mpsc::channel(1);
    (RefreshRequester { tx }, Debouncer { rx, cooldown })
}
