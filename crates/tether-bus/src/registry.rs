//! Client-side reconstruction of typed events from envelopes.

use crate::error::{BusError, Result};
use crate::event::Event;
use crate::wire::Envelope;
use std::collections::HashMap;

type Decoder<T> = Box<dyn Fn(serde_json::Value) -> std::result::Result<T, serde_json::Error> + Send + Sync>;

/// Kind-name keyed table of decoders producing the caller's type `T`.
///
/// `T` is usually an enum with one variant per event the caller cares about.
/// Kinds that were never registered are reported as unknown so old clients
/// keep working when a newer server emits new event kinds.
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use tether_bus::{Envelope, Event, TypeRegistry};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct Started { id: u32 }
/// impl Event for Started { const KIND: &'static str = "demo.Started"; }
///
/// enum Update { Started(Started) }
///
/// let registry = TypeRegistry::new().register(Update::Started);
/// let envelope = Envelope { kind: "demo.Started".into(), event: serde_json::json!({"id": 3}) };
/// assert!(matches!(registry.decode(envelope), Some(Ok(Update::Started(Started { id: 3 })))));
/// ```
pub struct TypeRegistry<T> {
    decoders: HashMap<&'static str, Decoder<T>>,
}

impl<T> TypeRegistry<T> {
    /// Empty registry; every kind is skipped until registered.
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Registers `E`, mapping decoded values into `T` with `wrap`.
    ///
    /// Registering the same kind twice keeps the latest decoder.
    pub fn register<E, F>(mut self, wrap: F) -> Self
    where
        E: Event,
        F: Fn(E) -> T + Send + Sync + 'static,
    {
        self.decoders.insert(
            E::KIND,
            Box::new(move |payload| serde_json::from_value::<E>(payload).map(&wrap)),
        );
        self
    }

    /// Whether `kind` has a decoder.
    pub fn contains(&self, kind: &str) -> bool {
        self.decoders.contains_key(kind)
    }

    /// Registered kind names.
    pub fn kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.decoders.keys().copied()
    }

    /// Number of registered kinds.
    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    /// True when no kind is registered.
    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Reconstructs the envelope's event.
    ///
    /// `None` means the kind is unknown; `Some(Err(_))` means the kind is known
    /// but the payload did not match its type.
    pub fn decode(&self, envelope: Envelope) -> Option<Result<T>> {
        let decoder = self.decoders.get(envelope.kind.as_str())?;
        Some(decoder(envelope.event).map_err(|source| BusError::Decode {
            kind: envelope.kind,
            source,
        }))
    }
}

impl<T> Default for TypeRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for TypeRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("kinds", &self.decoders.keys().collect::<Vec<_>>())
            .finish()
    }
}
