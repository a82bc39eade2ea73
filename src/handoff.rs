//! Single-slot, latest-wins exchange between the processing worker and the
//! presentation loop.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Holds at most one finished frame. Publishing overwrites, taking empties.
#[derive(Debug)]
pub struct HandoffSlot<T> {
    latest: Mutex<Option<T>>,
    superseded: AtomicU64,
}

impl<T> HandoffSlot<T> {
    pub fn new() -> Self {
        Self {
            latest: Mutex::new(None),
            superseded: AtomicU64::new(0),
        }
    }

    /// Store `frame`, discarding any frame nobody has taken yet.
    pub fn publish(&self, frame: T) {
        let previous = self.latest.lock().replace(frame);
        // Release the stale frame outside the lock.
        if previous.is_some() {
            self.superseded.fetch_add(1, Ordering::Relaxed);
            drop(previous);
        }
    }

    /// Remove and return the latest frame, if any.
    pub fn take_latest(&self) -> Option<T> {
        self.latest.lock().take()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.lock().is_none()
    }

    /// Number of frames that were overwritten before anyone took them.
    pub fn superseded(&self) -> u64 {
        self.superseded.load(Ordering::Relaxed)
    }
}

impl<T> Default for HandoffSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_second_publish_wins() {
        let slot = HandoffSlot::new();
        slot.publish("first");
        slot.publish("second");
        assert_eq!(slot.take_latest(), Some("second"));
        assert_eq!(slot.take_latest(), None);
        assert_eq!(slot.superseded(), 1);
    }

    #[test]
    fn test_take_twice_empties() {
        let slot = HandoffSlot::new();
        slot.publish(7u32);
        assert!(!slot.is_empty());
        assert_eq!(slot.take_latest(), Some(7));
        assert_eq!(slot.take_latest(), None);
        assert!(slot.is_empty());
    }

    #[test]
    fn test_overwritten_frame_is_released() {
        let slot = HandoffSlot::new();
        let first = Arc::new(());
        slot.publish(first.clone());
        assert_eq!(Arc::strong_count(&first), 2);
        slot.publish(Arc::new(()));
        assert_eq!(Arc::strong_count(&first), 1);
    }
}
