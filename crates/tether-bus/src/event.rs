//! Event identity and the in-process delivery unit.

use crate::error::{BusError, Result};
use crate::wire::Envelope;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A domain fact that can travel over the bus and the stream protocol.
///
/// `KIND` is the stable wire tag for the type. It doubles as the key in a
/// client-side [`TypeRegistry`](crate::TypeRegistry), so it must never change
/// once clients depend on it.
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use tether_bus::Event;
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct BuildStarted {
///     function_id: String,
/// }
///
/// impl Event for BuildStarted {
///     const KIND: &'static str = "runtime.BuildStarted";
/// }
/// ```
pub trait Event: Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: &'static str;
}

/// A published event as seen by subscribers.
///
/// The payload is serialized exactly once when the event is published, so the
/// stream server can forward it without touching the concrete type, while
/// in-process subscribers can still downcast to the value itself.
#[derive(Clone)]
pub struct BusEvent {
    kind: &'static str,
    value: Arc<dyn Any + Send + Sync>,
    payload: Arc<serde_json::Value>,
}

impl BusEvent {
    /// Wrap a typed event, serializing its payload.
    pub fn new<E: Event>(event: E) -> Result<Self> {
        let payload = serde_json::to_value(&event).map_err(|source| BusError::Serialize {
            kind: E::KIND,
            source,
        })?;
        Ok(Self {
            kind: E::KIND,
            value: Arc::new(event),
            payload: Arc::new(payload),
        })
    }

    /// The event's kind name.
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// The JSON payload captured at publish time.
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Whether this event is of type `E`.
    pub fn is<E: Event>(&self) -> bool {
        self.kind == E::KIND && self.value.is::<E>()
    }

    /// Borrow the typed value if this event is of type `E`.
    pub fn downcast<E: Event>(&self) -> Option<Arc<E>> {
        if self.kind != E::KIND {
            return None;
        }
        Arc::clone(&self.value).downcast::<E>().ok()
    }

    /// Pair the kind name with the payload for the wire.
    pub fn to_envelope(&self) -> Envelope {
        Envelope {
            kind: self.kind.to_string(),
            event: (*self.payload).clone(),
        }
    }
}

impl fmt::Debug for BusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusEvent")
            .field("kind", &self.kind)
            .field("payload", &self.payload)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Ping {
        seq: u32,
    }

    impl Event for Ping {
        const KIND: &'static str = "test.Ping";
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Pong;

    impl Event for Pong {
        const KIND: &'static str = "test.Pong";
    }

    #[test]
    fn test_bus_event_downcast() {
        let event = BusEvent::new(Ping { seq: 7 }).unwrap();

        assert_eq!(event.kind(), "test.Ping");
        assert!(event.is::<Ping>());
        assert!(!event.is::<Pong>());
        assert_eq!(*event.downcast::<Ping>().unwrap(), Ping { seq: 7 });
        assert!(event.downcast::<Pong>().is_none());
    }

    #[test]
    fn test_bus_event_envelope_uses_kind_and_payload() {
        let envelope = BusEvent::new(Ping { seq: 1 }).unwrap().to_envelope();

        assert_eq!(envelope.kind, "test.Ping");
        assert_eq!(envelope.event, serde_json::json!({ "seq": 1 }));
    }
}
