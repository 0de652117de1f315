//! Typed publish/subscribe for tether dev sessions.
//!
//! This crate holds the pieces shared by the dev server and its remote
//! clients:
//!
//! - [`EventBus`] - in-process fan-out with per-subscriber bounded queues
//! - [`Event`] - the stable kind name every bus event declares
//! - [`Envelope`] / [`LineDecoder`] - the ndjson framing used on the wire
//! - [`TypeRegistry`] - kind name to concrete type reconstruction on clients

pub mod bus;
pub mod error;
pub mod event;
pub mod registry;
pub mod wire;

pub use bus::{DEFAULT_CAPACITY, EventBus, Subscription, TypedSubscription};
pub use error::{BusError, Result};
pub use event::{BusEvent, Event};
pub use registry::TypeRegistry;
pub use wire::{Envelope, LineDecoder, NDJSON_CONTENT_TYPE};
