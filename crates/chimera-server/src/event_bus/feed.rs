use std::sync::Arc;

use chimera_protocol::Event;
use tokio::sync::watch;
use tracing::warn;

use super::publisher::EventBus;

/// Cursor-based reader over the event log
///
/// Each feed keeps its own position, so any number of transports can stream
/// the log independently. Events evicted before a feed reads them are skipped
/// and reported with a warning.
pub struct EventFeed {
    bus: Arc<EventBus>,
    cursor: u64,
    latest: watch::Receiver<u64>,
}

impl EventFeed {
    pub(crate) fn new(bus: Arc<EventBus>, latest: watch::Receiver<u64>) -> Self {
        let cursor = *latest.borrow();
        Self { bus, cursor, latest }
    }

    pub(crate) fn starting_at(bus: Arc<EventBus>, latest: watch::Receiver<u64>, cursor: u64) -> Self {
        Self { bus, cursor, latest }
    }

    /// Cursor of the last event this feed has consumed
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Events published after the cursor, up to `limit`. Never waits.
    pub fn poll(&mut self, limit: usize) -> Vec<Arc<Event>> {
        let batch = self.bus.events_since(self.cursor, limit);
        if batch.missed > 0 {
            warn!(
                from_cursor = self.cursor,
                missed = batch.missed,
                "feed fell behind the event log, events skipped"
            );
        }
        self.cursor = batch.next_cursor;
        batch.events
    }

    /// Wait until at least one new event is available, then return up to
    /// `limit` of them.
    ///
    /// Cancel-safe: dropping the future leaves the cursor untouched.
    /// The feed keeps the bus alive, so this only returns with events.
    pub async fn recv(&mut self, limit: usize) -> Vec<Arc<Event>> {
        loop {
            let events = self.poll(limit);
            if !events.is_empty() {
                return events;
            }

            let cursor = self.cursor;
            // The sender lives in the bus this feed holds, so the wait cannot fail
            let _ = self.latest.wait_for(|latest| *latest > cursor).await;
        }
    }
}
