// ── Event reconciliation loop ──
//
// Single consumer of a device's event queue. Each pass takes every
// pending record, oldest timestamp first: control records are logged and
// dropped, state records go through the entity setters, and records no
// handler matches wait for a later pass until they go stale.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vdev_api::{Entity, EntityStatus, EventKind, EventRecord};

use crate::fields::FieldValues;
use crate::queue::EventQueue;
use crate::setters::apply_status;

const REBOOT_MARKER: &str = "Rebooting...";

/// What one pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub handled: usize,
    pub discarded: usize,
    pub deferred: usize,
    /// The controller announced a reboot.
    pub reboot_seen: bool,
}

enum Disposition {
    Handled,
    Discarded,
    Deferred(EventRecord),
}

pub struct Reconciler {
    device: Arc<str>,
    queue: Arc<EventQueue>,
    state: Arc<Mutex<FieldValues>>,
    stale_after: chrono::Duration,
    reevaluate_every: Duration,
}

impl Reconciler {
    pub fn new(
        device: Arc<str>,
        queue: Arc<EventQueue>,
        state: Arc<Mutex<FieldValues>>,
        stale_after: Duration,
        reevaluate_every: Duration,
    ) -> Self {
        Self {
            device,
            queue,
            state,
            stale_after: chrono::Duration::from_std(stale_after).unwrap_or(chrono::Duration::MAX),
            reevaluate_every,
        }
    }

    /// Run one pass over everything pending.
    pub fn process_pending(&self, now: DateTime<Utc>) -> PassSummary {
        let mut summary = PassSummary::default();
        let mut deferred = Vec::new();

        for record in self.queue.drain_oldest_first() {
            if record.kind == EventKind::Log && record.payload.text().contains(REBOOT_MARKER) {
                warn!(device = %self.device, "door controller rebooting");
                summary.reboot_seen = true;
            }
            match self.dispatch(record, now) {
                Disposition::Handled => summary.handled += 1,
                Disposition::Discarded => summary.discarded += 1,
                Disposition::Deferred(record) => deferred.push(record),
            }
        }

        summary.deferred = deferred.len();
        self.queue.requeue(deferred);
        if summary != PassSummary::default() {
            debug!(device = %self.device, ?summary, "reconciliation pass");
        }
        summary
    }

    fn dispatch(&self, record: EventRecord, now: DateTime<Utc>) -> Disposition {
        match record.kind {
            EventKind::State => self.dispatch_state(record, now),
            EventKind::Id | EventKind::Retry => {
                debug!(device = %self.device, kind = %record.kind, data = %record.payload.text(), "stream control");
                Disposition::Handled
            }
            EventKind::Ping | EventKind::Log | EventKind::Error | EventKind::Unknown => {
                info!(device = %self.device, kind = %record.kind, data = %record.payload.text(), "event");
                Disposition::Handled
            }
        }
    }

    fn dispatch_state(&self, record: EventRecord, now: DateTime<Utc>) -> Disposition {
        let Some(entity) = record.entity_id().and_then(Entity::from_id) else {
            let age = record.age(now);
            if age > self.stale_after {
                warn!(
                    device = %self.device,
                    id = record.entity_id().unwrap_or("<none>"),
                    age_secs = age.num_seconds(),
                    "discarding stale unmatched state event"
                );
                return Disposition::Discarded;
            }
            return Disposition::Deferred(record);
        };

        let Some(payload) = record.payload.as_structured() else {
            return Disposition::Discarded;
        };
        let status: EntityStatus = match serde_json::from_value(payload.clone()) {
            Ok(status) => status,
            Err(e) => {
                warn!(device = %self.device, %entity, error = %e, "bad state event payload");
                return Disposition::Discarded;
            }
        };

        let mut values = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if apply_status(&mut values, entity, &status) {
            debug!(device = %self.device, %entity, "state updated from event");
        }
        Disposition::Handled
    }

    /// Wait for records and process them until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        info!(device = %self.device, "reconciliation loop started");
        loop {
            let summary = self.process_pending(Utc::now());
            let reevaluate = summary.deferred > 0;

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = self.queue.notified() => {}
                () = tokio::time::sleep(self.reevaluate_every), if reevaluate => {}
            }
        }
        info!(device = %self.device, "reconciliation loop stopped");
    }
}
