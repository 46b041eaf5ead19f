//! Latest-value slot for selected config names.
//!
//! A producer (for example a label watcher) publishes the name of the config
//! that should be applied. The consumer only ever sees the most recent name:
//! values published while it is busy applying are coalesced, never queued.

use tokio::sync::watch;
use tracing::debug;

/// Create a connected publisher/subscriber pair with no value yet.
pub fn config_slot() -> (ConfigPublisher, ConfigSubscriber) {
    let (tx, rx) = watch::channel(None);
    (ConfigPublisher { tx }, ConfigSubscriber { rx })
}

/// Write side of the slot.
#[derive(Debug, Clone)]
pub struct ConfigPublisher {
    tx: watch::Sender<Option<String>>,
}

impl ConfigPublisher {
    /// Replace the slot's value and wake the subscriber.
    ///
    /// Empty names are ignored. Returns whether the value was stored.
    pub fn publish(&self, name: impl Into<String>) -> bool {
        let name = name.into();
        if name.is_empty() {
            debug!("Ignoring empty config name");
            return false;
        }
        self.tx.send_replace(Some(name));
        true
    }

    /// The most recently published name.
    pub fn latest(&self) -> Option<String> {
        self.tx.borrow().clone()
    }
}

/// Read side of the slot.
#[derive(Debug)]
pub struct ConfigSubscriber {
    rx: watch::Receiver<Option<String>>,
}

impl ConfigSubscriber {
    /// Wait for a value newer than the last one returned.
    ///
    /// Returns `None` once every publisher has been dropped.
    pub async fn next(&mut self) -> Option<String> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(name) = self.rx.borrow_and_update().clone() {
                return Some(name);
            }
        }
    }

    pub fn latest(&self) -> Option<String> {
        self.rx.borrow().clone()
    }
}
