// ── Direct poll ──
//
// Fetch every entity over plain request/response, as a cross-check of
// stream-derived state. Polls never overlap: a trigger that finds one
// running is skipped, not queued.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};
use vdev_api::{DoorClient, Entity};

use crate::fields::FieldValues;
use crate::setters::apply_status;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Another poll held the lock.
    Skipped,
    Completed,
    /// Aborted at `entity`; earlier updates were kept.
    Failed { entity: Entity },
}

pub struct DirectPoller {
    device: Arc<str>,
    client: DoorClient,
    state: Arc<Mutex<FieldValues>>,
    spacing: Duration,
    running: tokio::sync::Mutex<()>,
}

impl DirectPoller {
    pub fn new(
        device: Arc<str>,
        client: DoorClient,
        state: Arc<Mutex<FieldValues>>,
        spacing: Duration,
    ) -> Self {
        Self {
            device,
            client,
            state,
            spacing,
            running: tokio::sync::Mutex::new(()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    /// Poll all six entities in order, stopping at the first failure.
    pub async fn poll(&self) -> PollOutcome {
        let Ok(_guard) = self.running.try_lock() else {
            info!(device = %self.device, "direct poll already running, skipped");
            return PollOutcome::Skipped;
        };

        for (i, entity) in Entity::POLL_ORDER.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.spacing).await;
            }
            match self.client.status(entity).await {
                Ok(status) => {
                    let mut values = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                    apply_status(&mut values, entity, &status);
                }
                Err(e) => {
                    warn!(device = %self.device, %entity, error = %e, "direct poll aborted");
                    return PollOutcome::Failed { entity };
                }
            }
        }

        debug!(device = %self.device, "direct poll complete");
        PollOutcome::Completed
    }
}
