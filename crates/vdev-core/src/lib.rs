//! Virtual device engine between `vdev-api` and the runner binary.
//!
//! - **[`GarageDevice`]**: one virtual garage door. [`start()`](GarageDevice::start)
//!   loads its fields, resolves variable mode vs. controller mode, probes the
//!   controller, then runs fast/slow ticks on its own timer task.
//!
//! - **[`FieldStore`]**: per-device field persistence behind the
//!   [`Persistence`] trait, with one-time migration of deprecated on-disk
//!   artifacts.
//!
//! - **[`Reconciler`]** and **[`DirectPoller`]**: the two paths by which
//!   controller state reaches a device, sharing one set of entity setters.
//!
//! - **[`ChannelBoard`]** and **[`Notices`]**: what the host side observes,
//!   channel reports and sticky per-device problems.

pub mod channels;
pub mod config;
pub mod error;
pub mod fields;
pub mod garage;
pub mod notices;
pub mod poll;
pub mod queue;
pub mod reconcile;
pub mod setters;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use channels::{ChannelBoard, Report};
pub use config::{ControllerAddress, GarageConfig, GatewayConfig, TimingConfig};
pub use error::CoreError;
pub use fields::{Channel, FieldRegistry, FieldSpec, FieldValue, FieldValues, GARAGE_FIELDS};
pub use garage::{GarageCommand, GarageDeps, GarageDevice};
pub use notices::Notices;
pub use poll::{DirectPoller, PollOutcome};
pub use queue::EventQueue;
pub use reconcile::{PassSummary, Reconciler};
pub use setters::DoorStatus;
pub use store::{FieldStore, FilePersistence, MemoryPersistence, Persistence};
