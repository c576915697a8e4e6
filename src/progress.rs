//! Progress and error events surfaced to the embedding application
//!
//! Long-running flows (time sync in particular) report coarse progress on
//! a broadcast channel so a UI can follow along without polling. Dropping
//! all receivers is fine; emission is fire-and-forget.

use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    TimeSyncStarted,
    TimeSyncCompleted,
    /// A recoverable error the caller also receives as an `Err`; carried
    /// here too so passive observers see it
    ApiError(String),
}

#[derive(Debug, Clone)]
pub struct ProgressEvents {
    sender: broadcast::Sender<ProgressEvent>,
}

impl ProgressEvents {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    pub(crate) fn emit(&self, event: ProgressEvent) {
        // send fails only when nobody is listening
        let _ = self.sender.send(event);
    }
}

impl Default for ProgressEvents {
    fn default() -> Self {
        Self::new()
    }
}
