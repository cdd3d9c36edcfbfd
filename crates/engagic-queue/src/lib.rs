// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-process priority ordering for work pulled from the persistent queue
//! ([`engagic-db`](https://docs.rs/engagic-db)) and vendor grouping for the
//! sync scheduler.
//!
//! The database is the source of truth for queue state; this crate holds
//! the short-lived, in-memory structures the scheduler and worker build from
//! a batch of rows before dispatching them — ordering claims by priority and
//! keeping same-vendor sync targets together so they can be fetched
//! serially (§4.8: one vendor's rate limit must not starve another's sweep).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Anything that can be placed in a [`PriorityQueue`]: has an identity and a
/// scheduling priority where higher runs first.
pub trait Prioritized {
    /// Stable identifier, used to detect and reject duplicates.
    fn queue_id(&self) -> &str;
    /// Scheduling priority; items with a higher value are dequeued first.
    fn priority(&self) -> i64;
}

/// Errors returned by [`PriorityQueue`] operations.
#[derive(Debug)]
pub enum QueueError {
    /// The queue has reached its maximum capacity.
    Full {
        /// Maximum number of items the queue can hold.
        max: usize,
    },
    /// An item with the given ID is already enqueued.
    DuplicateId(String),
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Full { max } => write!(f, "queue is full (max {max})"),
            QueueError::DuplicateId(id) => write!(f, "duplicate queue entry: {id}"),
        }
    }
}

impl std::error::Error for QueueError {}

/// Snapshot statistics for a [`PriorityQueue`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueStats {
    /// Number of items currently queued.
    pub total: usize,
    /// Maximum queue capacity.
    pub max: usize,
}

/// A bounded, priority-aware in-memory queue.
///
/// [`dequeue`](PriorityQueue::dequeue) returns the highest-priority item
/// first; among items of equal priority the oldest (FIFO) item is returned.
pub struct PriorityQueue<T: Prioritized> {
    entries: Vec<T>,
    max_size: usize,
}

impl<T: Prioritized> PriorityQueue<T> {
    /// Create a new queue with the given maximum capacity.
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_size,
        }
    }

    /// Add an item to the queue. Returns an error if the queue is full or an
    /// item with the same ID is already present.
    pub fn enqueue(&mut self, item: T) -> Result<(), QueueError> {
        if self.entries.len() >= self.max_size {
            return Err(QueueError::Full { max: self.max_size });
        }
        if self.entries.iter().any(|e| e.queue_id() == item.queue_id()) {
            return Err(QueueError::DuplicateId(item.queue_id().to_string()));
        }
        self.entries.push(item);
        Ok(())
    }

    /// Remove and return the highest-priority item (FIFO within the same
    /// priority level, since items are pushed in discovery order).
    pub fn dequeue(&mut self) -> Option<T> {
        if self.entries.is_empty() {
            return None;
        }
        let max_pri = self.entries.iter().map(|e| e.priority()).max().unwrap();
        let idx = self.entries.iter().position(|e| e.priority() == max_pri).unwrap();
        Some(self.entries.remove(idx))
    }

    /// Peek at the next item that would be dequeued without removing it.
    pub fn peek(&self) -> Option<&T> {
        let max_pri = self.entries.iter().map(|e| e.priority()).max()?;
        self.entries.iter().find(|e| e.priority() == max_pri)
    }

    /// Return the number of queued items.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Return `true` if the queue contains no items.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return `true` if the queue has reached its maximum capacity.
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.max_size
    }

    /// Remove a specific item by ID, returning it if found.
    pub fn remove(&mut self, id: &str) -> Option<T> {
        let pos = self.entries.iter().position(|e| e.queue_id() == id)?;
        Some(self.entries.remove(pos))
    }

    /// Remove all entries from the queue.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Return a snapshot of queue statistics.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            total: self.entries.len(),
            max: self.max_size,
        }
    }
}

/// A city (or other sync target) awaiting its turn in a sync sweep,
/// grouped by vendor for serialized fetching.
pub trait VendorScoped {
    /// Vendor this target is fetched through.
    fn vendor(&self) -> &str;
}

/// Group targets by vendor, preserving each group's internal order.
///
/// Keys are returned in first-seen order so the caller can round-robin
/// across vendors without starving whichever vendor happened to sort last
/// alphabetically.
pub fn group_by_vendor<T: VendorScoped>(targets: Vec<T>) -> Vec<(String, Vec<T>)> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: BTreeMap<String, Vec<T>> = BTreeMap::new();
    for target in targets {
        let vendor = target.vendor().to_string();
        if !groups.contains_key(&vendor) {
            order.push(vendor.clone());
        }
        groups.entry(vendor).or_default().push(target);
    }
    order
        .into_iter()
        .map(|vendor| {
            let items = groups.remove(&vendor).unwrap_or_default();
            (vendor, items)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: String,
        priority: i64,
        vendor: String,
    }

    impl Prioritized for Item {
        fn queue_id(&self) -> &str {
            &self.id
        }
        fn priority(&self) -> i64 {
            self.priority
        }
    }

    impl VendorScoped for Item {
        fn vendor(&self) -> &str {
            &self.vendor
        }
    }

    fn item(id: &str, priority: i64, vendor: &str) -> Item {
        Item {
            id: id.to_string(),
            priority,
            vendor: vendor.to_string(),
        }
    }

    #[test]
    fn dequeue_returns_highest_priority_first() {
        let mut q = PriorityQueue::new(10);
        q.enqueue(item("a", 10, "granicus")).unwrap();
        q.enqueue(item("b", 50, "granicus")).unwrap();
        q.enqueue(item("c", 30, "granicus")).unwrap();
        assert_eq!(q.dequeue().unwrap().id, "b");
        assert_eq!(q.dequeue().unwrap().id, "c");
        assert_eq!(q.dequeue().unwrap().id, "a");
    }

    #[test]
    fn dequeue_is_fifo_within_same_priority() {
        let mut q = PriorityQueue::new(10);
        q.enqueue(item("first", 10, "v")).unwrap();
        q.enqueue(item("second", 10, "v")).unwrap();
        assert_eq!(q.dequeue().unwrap().id, "first");
        assert_eq!(q.dequeue().unwrap().id, "second");
    }

    #[test]
    fn enqueue_rejects_duplicate_id() {
        let mut q = PriorityQueue::new(10);
        q.enqueue(item("a", 1, "v")).unwrap();
        let err = q.enqueue(item("a", 2, "v")).unwrap_err();
        assert!(matches!(err, QueueError::DuplicateId(id) if id == "a"));
    }

    #[test]
    fn enqueue_rejects_when_full() {
        let mut q = PriorityQueue::new(1);
        q.enqueue(item("a", 1, "v")).unwrap();
        let err = q.enqueue(item("b", 1, "v")).unwrap_err();
        assert!(matches!(err, QueueError::Full { max: 1 }));
    }

    #[test]
    fn peek_does_not_remove() {
        let mut q = PriorityQueue::new(10);
        q.enqueue(item("a", 5, "v")).unwrap();
        assert_eq!(q.peek().unwrap().id, "a");
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn remove_by_id() {
        let mut q = PriorityQueue::new(10);
        q.enqueue(item("a", 1, "v")).unwrap();
        q.enqueue(item("b", 2, "v")).unwrap();
        let removed = q.remove("a").unwrap();
        assert_eq!(removed.id, "a");
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn stats_reports_total_and_max() {
        let mut q = PriorityQueue::new(5);
        q.enqueue(item("a", 1, "v")).unwrap();
        let stats = q.stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.max, 5);
    }

    #[test]
    fn group_by_vendor_preserves_first_seen_order() {
        let targets = vec![
            item("a", 1, "novusagenda"),
            item("b", 1, "granicus"),
            item("c", 1, "novusagenda"),
            item("d", 1, "granicus"),
        ];
        let grouped = group_by_vendor(targets);
        let vendor_order: Vec<&str> = grouped.iter().map(|(v, _)| v.as_str()).collect();
        assert_eq!(vendor_order, vec!["novusagenda", "granicus"]);
        assert_eq!(grouped[0].1.len(), 2);
        assert_eq!(grouped[1].1.len(), 2);
    }

    #[test]
    fn group_by_vendor_empty_input() {
        let grouped: Vec<(String, Vec<Item>)> = group_by_vendor(Vec::new());
        assert!(grouped.is_empty());
    }
}
