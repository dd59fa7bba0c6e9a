//! Change observers that enqueue native events for the coordinator.

use std::sync::{Arc, Mutex, PoisonError};
use tether_glue::{ChangeObserver, NativeEvent};
use tokio::sync::mpsc;
use tracing::debug;

/// In-memory queue, drained by the caller of [`crate::SyncEngine`]
#[derive(Default)]
pub struct EventQueue {
    events: Mutex<Vec<NativeEvent>>,
}

impl EventQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Take every event queued so far, oldest first
    pub fn drain(&self) -> Vec<NativeEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ChangeObserver for EventQueue {
    fn notify(&self, event: NativeEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Forwards native events into the sync task's inbound queue
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<NativeEvent>,
}

impl ChannelObserver {
    pub fn new(sender: mpsc::UnboundedSender<NativeEvent>) -> Self {
        Self { sender }
    }
}

impl ChangeObserver for ChannelObserver {
    fn notify(&self, event: NativeEvent) {
        if self.sender.send(event).is_err() {
            debug!("sync task stopped, native event dropped");
        }
    }
}
