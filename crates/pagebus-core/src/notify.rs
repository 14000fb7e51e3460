//! Bounded device-to-consumer notification queue.
//!
//! Devices post notifications while handling accesses; a consumer (renderer,
//! debugger) drains them once per frame. Ordering is strict FIFO. When the
//! queue is full the oldest entry is discarded and counted.

use std::collections::VecDeque;

/// Default number of pending notifications retained by a bus.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 64;

/// What changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum NotificationKind {
    /// Device-visible data changed at `offset` within the device.
    DataChanged {
        /// Offset within the device range.
        offset: u32,
    },
    /// A device mode or soft-switch state flipped.
    ModeChanged {
        /// Device-defined mode code.
        mode: u8,
    },
}

/// One posted notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct DeviceNotification {
    /// Hot-path id of the posting device.
    pub device_id: u32,
    /// Machine cycle at posting time.
    pub cycle: u64,
    /// What changed.
    pub kind: NotificationKind,
}

/// Bounded FIFO of [`DeviceNotification`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationQueue {
    pending: VecDeque<DeviceNotification>,
    capacity: usize,
    dropped: u64,
}

impl Default for NotificationQueue {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_NOTIFICATION_CAPACITY)
    }
}

impl NotificationQueue {
    /// Creates a queue retaining at most `capacity` entries (minimum 1).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            pending: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Appends a notification, discarding the oldest when full.
    pub fn push(&mut self, device_id: u32, cycle: u64, kind: NotificationKind) {
        if self.pending.len() == self.capacity {
            self.pending.pop_front();
            self.dropped = self.dropped.saturating_add(1);
            tracing::warn!(
                device_id,
                dropped = self.dropped,
                "notification queue full, dropping oldest entry"
            );
        }
        self.pending.push_back(DeviceNotification {
            device_id,
            cycle,
            kind,
        });
    }

    /// Removes and yields every pending notification in posting order.
    pub fn drain(&mut self) -> impl Iterator<Item = DeviceNotification> + '_ {
        self.pending.drain(..)
    }

    /// Number of pending notifications.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` when nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Maximum retained entries.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total entries discarded because the queue was full.
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::{NotificationKind, NotificationQueue};

    #[test]
    fn drain_preserves_posting_order() {
        let mut queue = NotificationQueue::with_capacity(4);
        queue.push(1, 10, NotificationKind::ModeChanged { mode: 0 });
        queue.push(2, 11, NotificationKind::DataChanged { offset: 5 });

        let cycles: Vec<u64> = queue.drain().map(|n| n.cycle).collect();
        assert_eq!(cycles, vec![10, 11]);
        assert!(queue.is_empty());
    }

    #[test]
    fn overflow_discards_oldest_and_counts() {
        let mut queue = NotificationQueue::with_capacity(2);
        for cycle in 0..5 {
            queue.push(1, cycle, NotificationKind::DataChanged { offset: 0 });
        }
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 3);
        let cycles: Vec<u64> = queue.drain().map(|n| n.cycle).collect();
        assert_eq!(cycles, vec![3, 4]);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        assert_eq!(NotificationQueue::with_capacity(0).capacity(), 1);
    }
}
