use std::collections::VecDeque;
use std::sync::Arc;

use chimera_protocol::Event;

/// Bounded, in-memory event log
///
/// Every appended event is assigned a monotonic cursor (starting at 1).
/// Cursors are never reused, so a consumer can resume from the last cursor it
/// saw even after eviction or `clear`.
pub struct EventLog {
    entries: VecDeque<(u64, Arc<Event>)>,
    capacity: usize,
    latest_cursor: u64,
}

/// Result of a cursor query against the log
#[derive(Debug, Default)]
pub struct Since {
    pub events: Vec<Arc<Event>>,
    /// Cursor the consumer should resume from
    pub next_cursor: u64,
    /// Events after the requested cursor that are no longer retained
    pub missed: u64,
}

impl EventLog {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            latest_cursor: 0,
        }
    }

    /// Append an event, evicting the oldest one once capacity is reached.
    /// Returns the assigned cursor.
    pub fn append(&mut self, event: Arc<Event>) -> u64 {
        self.latest_cursor += 1;
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((self.latest_cursor, event));
        self.latest_cursor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest_cursor(&self) -> u64 {
        self.latest_cursor
    }

    /// All retained events, oldest first
    pub fn snapshot(&self) -> Vec<Arc<Event>> {
        self.entries.iter().map(|(_, event)| event.clone()).collect()
    }

    /// The last `min(limit, len)` events, oldest first
    pub fn recent(&self, limit: usize) -> Vec<Arc<Event>> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries
            .iter()
            .skip(skip)
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Events with a cursor greater than `from_cursor`, up to `limit`
    pub fn since(&self, from_cursor: u64, limit: usize) -> Since {
        let Some((oldest, _)) = self.entries.front() else {
            let next_cursor = from_cursor.max(self.latest_cursor);
            return Since {
                events: Vec::new(),
                next_cursor,
                missed: next_cursor - from_cursor,
            };
        };

        // Everything between the requested cursor and the oldest retained
        // entry has been evicted or cleared.
        let resume_after = from_cursor.max(oldest - 1);
        let start = (resume_after + 1 - oldest) as usize;

        let events: Vec<(u64, Arc<Event>)> = self
            .entries
            .iter()
            .skip(start)
            .take(limit)
            .cloned()
            .collect();

        let next_cursor = events.last().map_or(resume_after, |(cursor, _)| *cursor);

        Since {
            events: events.into_iter().map(|(_, event)| event).collect(),
            next_cursor,
            missed: resume_after - from_cursor,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
