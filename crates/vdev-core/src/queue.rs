// ── Pending event queue ──
//
// Shared between one producer (the event stream) and one consumer (the
// reconciliation loop) of a single device. The lock is held only to push
// or take records; waiting happens on the `Notify`.

use std::sync::{Mutex, PoisonError};

use tokio::sync::Notify;
use vdev_api::{EventRecord, EventSink};

#[derive(Debug, Default)]
pub struct EventQueue {
    records: Mutex<Vec<EventRecord>>,
    notify: Notify,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every pending record, smallest timestamp first. Ties keep
    /// arrival order.
    pub fn drain_oldest_first(&self) -> Vec<EventRecord> {
        let mut taken = std::mem::take(&mut *self.records.lock().unwrap_or_else(PoisonError::into_inner));
        taken.sort_by_key(|r| r.timestamp);
        taken
    }

    /// Put records back for a later pass. Does not wake the consumer.
    pub fn requeue(&self, records: Vec<EventRecord>) {
        if records.is_empty() {
            return;
        }
        let mut pending = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        pending.extend(records);
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves after the next push, or immediately if a push happened
    /// since the last wait.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    /// Wake the consumer without adding a record.
    pub fn wake(&self) {
        self.notify.notify_one();
    }
}

impl EventSink for EventQueue {
    fn push(&self, record: EventRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        self.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use vdev_api::{EventKind, EventPayload};

    use super::*;

    fn at(secs: i64) -> EventRecord {
        EventRecord::new(
            EventKind::Ping,
            EventPayload::Raw(secs.to_string()),
            Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap_or_default(),
        )
    }

    #[test]
    fn drains_by_timestamp_not_arrival() {
        let queue = EventQueue::new();
        queue.push(at(2));
        queue.push(at(0));
        queue.push(at(1));
        assert_eq!(queue.len(), 3);

        let order: Vec<String> = queue
            .drain_oldest_first()
            .iter()
            .map(|r| r.payload.text())
            .collect();
        assert_eq!(order, ["0", "1", "2"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn keeps_working_after_a_holder_panics() {
        let queue = std::sync::Arc::new(EventQueue::new());
        let holder = std::sync::Arc::clone(&queue);
        let _ = std::thread::spawn(move || {
            let _guard = holder.records.lock();
            panic!("holder died");
        })
        .join();
        assert!(queue.records.is_poisoned());

        queue.push(at(1));
        queue.requeue(vec![at(0)]);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.drain_oldest_first()[0].payload.text(), "0");
    }

    #[tokio::test]
    async fn push_wakes_a_later_waiter() {
        let queue = EventQueue::new();
        queue.push(at(0));
        tokio::time::timeout(std::time::Duration::from_secs(1), queue.notified())
            .await
            .unwrap_or_else(|_| panic!("stored permit should resolve the wait"));
    }
}
