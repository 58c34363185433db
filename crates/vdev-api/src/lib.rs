//! Async clients for the two remote surfaces a virtual garage talks to.
//!
//! - [`gateway`]: the home-automation gateway's `/rest/vars` variable API,
//!   including the type table, precision scaling and idempotent push.
//! - [`door`]: the door controller's per-entity REST endpoints and actions.
//! - [`events`]: the door controller's server-sent event stream with
//!   reconnect and backoff.

pub mod door;
pub mod error;
pub mod events;
pub mod gateway;
pub mod transport;

pub use door::{DoorClient, DoorCommand, Entity, EntityStatus};
pub use error::Error;
pub use events::{
    EventKind, EventPayload, EventRecord, EventSink, EventStream, ReconnectConfig, SseParser,
    StreamState,
};
pub use gateway::{GatewayClient, PushOutcome, VarAddress, VarId, VarType};
pub use transport::TransportConfig;
