// ── Garage device ──
//
// One virtual garage door. In variable mode its state mirrors gateway
// variables; in controller mode it follows a networked door controller
// through the event stream, cross-checked by periodic direct polls.
// Either way a fast tick publishes changed fields and a heartbeat, and
// commands are forwarded to whatever backs the device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vdev_api::{DoorClient, DoorCommand, EventStream, GatewayClient, TransportConfig};

use crate::channels::ChannelBoard;
use crate::config::{ControllerAddress, GarageConfig, TimingConfig};
use crate::error::CoreError;
use crate::fields::garage::{self as field, VARIABLE_FIELDS};
use crate::fields::{Channel, FieldValue, FieldValues, GARAGE_FIELDS};
use crate::notices::{CONTROLLER_TOPIC, Notices};
use crate::poll::{DirectPoller, PollOutcome};
use crate::queue::EventQueue;
use crate::reconcile::Reconciler;
use crate::store::FieldStore;

/// Cap on the minutes-since-update channel.
const MAX_MINUTES_SINCE_UPDATE: f64 = 9999.0;

// ── Commands ─────────────────────────────────────────────────────

/// Commands a garage accepts from the host side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum GarageCommand {
    LightOn,
    LightOff,
    DoorOpen,
    DoorClose,
    DoorTrigger,
    DoorStop,
    Lock,
    Unlock,
    ResetStatistics,
    Query,
}

/// Last-command codes exposed on the `dcommand` channel.
fn door_command_code(cmd: DoorCommand) -> i64 {
    match cmd {
        DoorCommand::DoorOpen => 1,
        DoorCommand::DoorClose => 2,
        DoorCommand::DoorTrigger => 3,
        DoorCommand::DoorStop => 4,
        _ => 0,
    }
}

// ── Shared services ──────────────────────────────────────────────

/// Services a device needs, shared across devices.
#[derive(Clone)]
pub struct GarageDeps {
    pub gateway: Arc<GatewayClient>,
    pub store: Arc<FieldStore>,
    pub channels: Arc<ChannelBoard>,
    pub notices: Arc<Notices>,
    pub timing: TimingConfig,
}

/// Controller-mode plumbing, built once at initialization.
struct DoorLink {
    client: DoorClient,
    stream: EventStream,
    poller: Arc<DirectPoller>,
}

struct Clock {
    last_update: Instant,
    open_since: Option<Instant>,
}

// ── GarageDevice ─────────────────────────────────────────────────

/// Cheaply cloneable handle to one garage.
#[derive(Clone)]
pub struct GarageDevice {
    inner: Arc<GarageInner>,
}

struct GarageInner {
    config: GarageConfig,
    name: Arc<str>,
    deps: GarageDeps,
    state: Arc<Mutex<FieldValues>>,
    queue: Arc<EventQueue>,
    link: OnceLock<DoorLink>,
    validated: AtomicBool,
    first_pass: AtomicBool,
    heartbeat: AtomicBool,
    initialized: AtomicBool,
    clock: Mutex<Clock>,
    cancel: CancellationToken,
    reconciler: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    var_sync: tokio::sync::Mutex<()>,
    task_handles: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl GarageDevice {
    /// Create a device. Does nothing until [`start`](Self::start).
    pub fn new(config: GarageConfig, deps: GarageDeps) -> Self {
        let name: Arc<str> = Arc::from(config.name.as_str());
        Self {
            inner: Arc::new(GarageInner {
                name,
                state: Arc::new(Mutex::new(GARAGE_FIELDS.defaults())),
                queue: Arc::new(EventQueue::new()),
                link: OnceLock::new(),
                validated: AtomicBool::new(false),
                first_pass: AtomicBool::new(true),
                heartbeat: AtomicBool::new(false),
                initialized: AtomicBool::new(false),
                clock: Mutex::new(Clock {
                    last_update: Instant::now(),
                    open_since: None,
                }),
                cancel: CancellationToken::new(),
                reconciler: tokio::sync::Mutex::new(None),
                var_sync: tokio::sync::Mutex::new(()),
                task_handles: tokio::sync::Mutex::new(Vec::new()),
                config,
                deps,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Snapshot of the current field values.
    pub fn values(&self) -> FieldValues {
        self.lock_state().clone()
    }

    /// `true` when a door controller is configured and addressable.
    pub fn controller_mode(&self) -> bool {
        self.inner.link.get().is_some()
    }

    /// `true` once the controller answered the identity probe.
    pub fn is_validated(&self) -> bool {
        self.inner.validated.load(Ordering::SeqCst)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, FieldValues> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_clock(&self) -> std::sync::MutexGuard<'_, Clock> {
        self.inner.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Initialize and spawn the per-device timer.
    pub async fn start(&self) -> Result<(), CoreError> {
        self.initialize().await?;
        let timer = tokio::spawn(timer_task(self.clone(), self.inner.cancel.child_token()));
        self.inner.task_handles.lock().await.push(timer);
        Ok(())
    }

    /// Load fields, apply configuration, resolve the controller and
    /// probe it. Does not spawn the timer.
    pub async fn initialize(&self) -> Result<(), CoreError> {
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            return Err(CoreError::Config {
                field: "device".into(),
                reason: format!("{} already started", self.inner.name),
            });
        }

        let deps = &self.inner.deps;
        let name = &*self.inner.name;
        let mut values = deps
            .store
            .load(name, &self.inner.config.address, &GARAGE_FIELDS, &deps.channels);
        self.inner.config.apply_to(&mut values, &GARAGE_FIELDS);
        if let Err(e) = deps.store.store(name, &values) {
            warn!(device = name, error = %e, "storing configured fields failed");
        }
        let controller = values
            .get(field::CONTROLLER)
            .cloned()
            .unwrap_or(FieldValue::Bool(false));
        *self.lock_state() = values;

        match ControllerAddress::parse(&controller) {
            Ok(ControllerAddress::Disabled) => {
                deps.notices.clear(name, CONTROLLER_TOPIC);
                info!(device = name, "variable mode");
            }
            Ok(ControllerAddress::Host(host)) => {
                deps.notices.clear(name, CONTROLLER_TOPIC);
                let link = self.build_link(&host)?;
                let _ = self.inner.link.set(link);
                info!(device = name, %host, "controller mode");
                self.validate().await;
            }
            Err(e) => {
                deps.notices.set(name, CONTROLLER_TOPIC, e.to_string());
                info!(device = name, "controller disabled, variable mode");
            }
        }

        self.inner.first_pass.store(true, Ordering::SeqCst);
        self.reset_time();
        Ok(())
    }

    fn build_link(&self, host: &str) -> Result<DoorLink, CoreError> {
        let timing = &self.inner.deps.timing;
        let transport = TransportConfig::short(timing.poll_timeout);
        let client = DoorClient::for_host(host, &transport)?;
        let stream = EventStream::new(
            transport.build_streaming_client()?,
            client.events_url()?,
            timing.reconnect.clone(),
        );
        let poller = Arc::new(DirectPoller::new(
            Arc::clone(&self.inner.name),
            client.clone(),
            Arc::clone(&self.inner.state),
            timing.poll_spacing,
        ));
        Ok(DoorLink {
            client,
            stream,
            poller,
        })
    }

    /// Identity probe. Sets the validated flag only on a positive answer.
    pub async fn validate(&self) -> bool {
        let Some(link) = self.inner.link.get() else {
            return false;
        };
        let name = &*self.inner.name;
        match link.client.identify().await {
            Ok(true) => {
                if !self.inner.validated.swap(true, Ordering::SeqCst) {
                    info!(device = name, "door controller validated");
                }
                self.inner.deps.notices.clear(name, CONTROLLER_TOPIC);
                true
            }
            Ok(false) => {
                self.inner.validated.store(false, Ordering::SeqCst);
                self.inner.deps.notices.set(
                    name,
                    CONTROLLER_TOPIC,
                    format!("{} is not a door controller", link.client.base_url()),
                );
                false
            }
            Err(e) => {
                self.inner.validated.store(false, Ordering::SeqCst);
                warn!(device = name, error = %e, "door controller probe failed");
                false
            }
        }
    }

    /// Cancel every task, wait for them, and store the final state.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.queue.wake();

        let mut handles: Vec<JoinHandle<()>> = self.inner.task_handles.lock().await.drain(..).collect();
        if let Some(reconciler) = self.inner.reconciler.lock().await.take() {
            handles.push(reconciler);
        }
        for handle in handles {
            let _ = handle.await;
        }

        let values = self.values();
        if let Err(e) = self.inner.deps.store.store(&self.inner.name, &values) {
            warn!(device = %self.inner.name, error = %e, "final store failed");
        }
        info!(device = %self.inner.name, "stopped");
    }

    async fn track(&self, handle: JoinHandle<()>) {
        let mut handles = self.inner.task_handles.lock().await;
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    // ── Ticks ────────────────────────────────────────────────────

    /// Controller upkeep: validate if needed, keep the stream and the
    /// reconciler running, kick off a direct poll. Never awaits I/O.
    pub async fn slow_tick(&self) {
        if self.inner.link.get().is_none() || self.inner.cancel.is_cancelled() {
            return;
        }

        if !self.is_validated() {
            let device = self.clone();
            let handle = tokio::spawn(async move {
                if device.validate().await {
                    device.ensure_event_tasks().await;
                }
            });
            self.track(handle).await;
            return;
        }

        self.ensure_event_tasks().await;

        if let Some(link) = self.inner.link.get() {
            let poller = Arc::clone(&link.poller);
            let name = Arc::clone(&self.inner.name);
            let handle = tokio::spawn(async move {
                match poller.poll().await {
                    PollOutcome::Completed => debug!(device = %name, "direct poll ok"),
                    PollOutcome::Skipped => {}
                    PollOutcome::Failed { entity } => {
                        debug!(device = %name, %entity, "direct poll incomplete");
                    }
                }
            });
            self.track(handle).await;
        }
    }

    /// Start the event stream and the reconciliation loop unless running.
    async fn ensure_event_tasks(&self) {
        let Some(link) = self.inner.link.get() else {
            return;
        };
        let cancel = &self.inner.cancel;

        {
            let mut reconciler = self.inner.reconciler.lock().await;
            if reconciler.as_ref().is_none_or(JoinHandle::is_finished) {
                let timing = &self.inner.deps.timing;
                let task = Reconciler::new(
                    Arc::clone(&self.inner.name),
                    Arc::clone(&self.inner.queue),
                    Arc::clone(&self.inner.state),
                    timing.stale_after,
                    timing.reevaluate_every,
                );
                *reconciler = Some(tokio::spawn(task.run(cancel.child_token())));
            }
        }

        if let Some(handle) = link
            .stream
            .spawn(Arc::clone(&self.inner.queue), cancel.child_token())
        {
            info!(device = %self.inner.name, "event stream started");
            self.track(handle).await;
        }
    }

    /// Kick off a variable sync (variable mode only), flip the heartbeat,
    /// and publish changed state fields plus the two timer channels.
    /// Never awaits gateway I/O.
    pub async fn fast_tick(&self) {
        if !self.controller_mode() && !self.inner.cancel.is_cancelled() {
            let device = self.clone();
            let cancel = self.inner.cancel.child_token();
            let handle = tokio::spawn(async move {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {}
                    _ = device.sync_variables() => {}
                }
            });
            self.track(handle).await;
        }
        let on = !self.inner.heartbeat.fetch_xor(true, Ordering::SeqCst);
        self.inner.deps.channels.heartbeat(&self.inner.name, on);
        self.publish_changes(Instant::now());
    }

    /// Pull every bound gateway variable and merge the results, then
    /// publish if anything changed. Returns `false` without I/O when a
    /// sync is already in flight.
    pub async fn sync_variables(&self) -> bool {
        let Ok(_guard) = self.inner.var_sync.try_lock() else {
            debug!(device = %self.inner.name, "variable sync already running");
            return false;
        };
        if self.pull_variables().await {
            self.publish_changes(Instant::now());
        }
        true
    }

    /// Returns `true` when a pulled value changed a field.
    async fn pull_variables(&self) -> bool {
        let bindings: Vec<(&'static str, i64, i64)> = {
            let values = self.lock_state();
            VARIABLE_FIELDS
                .iter()
                .map(|(f, t, id)| (*f, values.int(t), values.int(id)))
                .filter(|(_, t, id)| *t > 0 && *id > 0)
                .collect()
        };
        if bindings.is_empty() {
            return false;
        }

        let mut pulled = Vec::with_capacity(bindings.len());
        for (name, var_type, var_id) in bindings {
            if let Some(value) = self.inner.deps.gateway.pull(var_type, var_id, true).await {
                pulled.push((name, value));
            }
        }
        if pulled.is_empty() {
            return false;
        }

        let mut changed = false;
        let snapshot = {
            let mut values = self.lock_state();
            for (name, value) in pulled {
                if values.set(name, FieldValue::from_number(value)) {
                    info!(device = %self.inner.name, field = name, value, "variable changed");
                    changed = true;
                }
            }
            values.clone()
        };
        if let Err(e) = self.inner.deps.store.store(&self.inner.name, &snapshot) {
            warn!(device = %self.inner.name, error = %e, "store failed");
        }
        changed
    }

    /// Publish state fields. On the first pass after start (or a
    /// statistics reset) every field is forced out.
    pub fn publish_changes(&self, now: Instant) {
        let name = &*self.inner.name;
        let channels = &self.inner.deps.channels;
        let first = self.inner.first_pass.swap(false, Ordering::SeqCst);

        let (changed, door) = {
            let mut values = self.lock_state();
            let door = values.int(field::DOOR);
            #[allow(clippy::as_conversions, clippy::cast_precision_loss, clippy::float_cmp)]
            let door_moved = channels.get(name, Channel::Gv1) != Some(door as f64);
            if door_moved {
                values.set(field::DCOMMAND, 0);
            }

            let mut changed = false;
            for (field_name, channel) in GARAGE_FIELDS.channel_fields() {
                let value = values.get(field_name).and_then(FieldValue::as_f64).unwrap_or(0.0);
                changed |= channels.publish(name, channel, value, first);
            }
            (changed, door)
        };

        if first || changed {
            self.reset_time();
        }

        let (minutes, open_secs) = {
            let mut clock = self.lock_clock();
            let minutes = round1(now.duration_since(clock.last_update).as_secs_f64() / 60.0)
                .min(MAX_MINUTES_SINCE_UPDATE);
            let open_secs = if door == 0 {
                clock.open_since = None;
                0.0
            } else {
                let since = *clock.open_since.get_or_insert(now);
                round1(now.duration_since(since).as_secs_f64())
            };
            (minutes, open_secs)
        };
        channels.publish(name, Channel::Gv6, minutes, false);
        channels.publish(name, Channel::Gv7, open_secs, false);
    }

    fn reset_time(&self) {
        self.lock_clock().last_update = Instant::now();
        self.inner
            .deps
            .channels
            .publish(&self.inner.name, Channel::Gv6, 0.0, false);
    }

    // ── Commands ─────────────────────────────────────────────────

    pub async fn command(&self, cmd: GarageCommand) {
        info!(device = %self.inner.name, command = %cmd, "command");
        match cmd {
            GarageCommand::LightOn => self.set_and_forward(field::LIGHT, 1, DoorCommand::LightOn).await,
            GarageCommand::LightOff => self.set_and_forward(field::LIGHT, 0, DoorCommand::LightOff).await,
            GarageCommand::DoorOpen => self.door_command(DoorCommand::DoorOpen).await,
            GarageCommand::DoorClose => self.door_command(DoorCommand::DoorClose).await,
            GarageCommand::DoorTrigger => self.door_command(DoorCommand::DoorTrigger).await,
            GarageCommand::DoorStop => self.door_command(DoorCommand::DoorStop).await,
            GarageCommand::Lock => self.set_and_forward(field::LOCK, 1, DoorCommand::Lock).await,
            GarageCommand::Unlock => self.set_and_forward(field::LOCK, 0, DoorCommand::Unlock).await,
            GarageCommand::ResetStatistics => self.reset_statistics(),
            GarageCommand::Query => self.query(),
        }
    }

    async fn door_command(&self, cmd: DoorCommand) {
        self.set_and_forward(field::DCOMMAND, door_command_code(cmd), cmd).await;
    }

    /// Set a field locally, publish it, mirror it to its gateway variable
    /// when bound, forward it to a validated controller, then persist.
    #[allow(clippy::as_conversions, clippy::cast_precision_loss)]
    async fn set_and_forward(&self, field_name: &'static str, value: i64, cmd: DoorCommand) {
        let name = &*self.inner.name;
        let deps = &self.inner.deps;

        let (binding, snapshot) = {
            let mut values = self.lock_state();
            values.set(field_name, value);
            let binding = field::variable_of(field_name).map(|(t, id)| (values.int(t), values.int(id)));
            (binding, values.clone())
        };

        if let Some(channel) = GARAGE_FIELDS.get(field_name).and_then(|s| s.channel) {
            deps.channels.publish(name, channel, value as f64, false);
        }

        if let Some((var_type, var_id)) = binding.filter(|(_, id)| *id > 0) {
            let outcome = deps.gateway.push(var_type, var_id, value as f64).await;
            debug!(device = name, field = field_name, ?outcome, "variable push");
        }

        if self.is_validated() {
            if let Some(link) = self.inner.link.get() {
                if let Err(e) = link.client.send(cmd).await {
                    warn!(device = name, command = %cmd, error = %e, "door controller command failed");
                }
            }
        }

        if let Err(e) = deps.store.store(name, &snapshot) {
            warn!(device = name, error = %e, "store failed");
        }
        self.reset_time();
    }

    fn reset_statistics(&self) {
        info!(device = %self.inner.name, "resetting statistics");
        self.inner.first_pass.store(true, Ordering::SeqCst);
        self.reset_time();
        let values = self.values();
        if let Err(e) = self.inner.deps.store.store(&self.inner.name, &values) {
            warn!(device = %self.inner.name, error = %e, "store failed");
        }
    }

    fn query(&self) {
        let values = self.values();
        FieldStore::push_channels(
            &self.inner.name,
            &values,
            &GARAGE_FIELDS,
            &self.inner.deps.channels,
        );
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Per-device timer. Fast and slow ticks run on this one task, so they
/// never overlap each other.
async fn timer_task(device: GarageDevice, cancel: CancellationToken) {
    let timing = device.inner.deps.timing.clone();
    let mut fast = tokio::time::interval(timing.fast_tick);
    let mut slow = tokio::time::interval(timing.slow_tick);
    fast.set_missed_tick_behavior(MissedTickBehavior::Skip);
    slow.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = slow.tick() => device.slow_tick().await,
            _ = fast.tick() => device.fast_tick().await,
        }
    }
    debug!(device = %device.inner.name, "timer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_names_parse() {
        assert_eq!("door-open".parse::<GarageCommand>().ok(), Some(GarageCommand::DoorOpen));
        assert_eq!("reset-statistics".parse::<GarageCommand>().ok(), Some(GarageCommand::ResetStatistics));
        assert_eq!(GarageCommand::LightOff.to_string(), "light-off");
        assert!("explode".parse::<GarageCommand>().is_err());
    }

    #[test]
    fn dcommand_codes() {
        assert_eq!(door_command_code(DoorCommand::DoorOpen), 1);
        assert_eq!(door_command_code(DoorCommand::DoorClose), 2);
        assert_eq!(door_command_code(DoorCommand::DoorTrigger), 3);
        assert_eq!(door_command_code(DoorCommand::DoorStop), 4);
        assert_eq!(door_command_code(DoorCommand::LightOn), 0);
    }
}
