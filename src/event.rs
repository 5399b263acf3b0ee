use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{AppError, Result};
use crate::tree::{Node, ProgressSink};

/// Progress update from a background load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// Human-readable status line.
    pub status: String,
    /// Entries processed so far.
    pub current: usize,
    /// Total number of entries.
    pub total: usize,
}

/// Application events.
#[derive(Debug)]
pub enum Event {
    /// Progress update from a background load.
    Progress(ProgressUpdate),
    /// Background load finished.
    Loaded(Result<Arc<Node>>),
}

/// Channel that background tasks report into and the main task drains.
pub struct EventHandler {
    rx: mpsc::UnboundedReceiver<Event>,
    tx: mpsc::UnboundedSender<Event>,
}

impl Default for EventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { rx, tx }
    }

    /// Get a sender clone for background tasks.
    pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
        self.tx.clone()
    }

    /// A progress sink that forwards into this channel.
    pub fn progress(&self) -> ChannelProgress {
        ChannelProgress(self.sender())
    }

    /// Receive the next event (waits until one is available).
    pub async fn next(&mut self) -> Result<Event> {
        self.rx.recv().await.ok_or(AppError::ChannelClosed)
    }
}

/// [`ProgressSink`] over the event channel.
///
/// Reports after the receiver has gone away are dropped.
#[derive(Clone)]
pub struct ChannelProgress(mpsc::UnboundedSender<Event>);

impl ProgressSink for ChannelProgress {
    fn report(&self, current: usize, total: usize, status: &str) {
        let _ = self.0.send(Event::Progress(ProgressUpdate {
            status: status.to_string(),
            current,
            total,
        }));
    }
}
