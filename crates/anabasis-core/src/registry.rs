//! Event type registry: routes a recorded event's declared type name to a
//! typed decoder.

use std::any::type_name;
use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;

use crate::codec::{CodecError, EventCodec, JsonCodec};
use crate::error::DomainError;
use crate::log::RecordedEvent;

type Decoder<E, C> = fn(&C, &[u8]) -> Result<E, CodecError>;

struct Registration<E, C> {
    decode: Decoder<E, C>,
    payload_type: &'static str,
}

fn decode_as<P, E, C>(codec: &C, bytes: &[u8]) -> Result<E, CodecError>
where
    P: DeserializeOwned + Into<E>,
    C: EventCodec,
{
    codec.decode::<P>(bytes).map(Into::into)
}

/// Maps event type names to decoders producing the aggregate's event type.
///
/// Only registered names can be applied; anything else on a shared stream is
/// somebody else's event.
pub struct EventTypeRegistry<E, C = JsonCodec> {
    codec: C,
    decoders: HashMap<&'static str, Registration<E, C>>,
}

impl<E> EventTypeRegistry<E, JsonCodec> {
    /// Creates an empty registry using the JSON codec.
    #[must_use]
    pub fn json() -> Self {
        Self::new(JsonCodec)
    }
}

impl<E, C: EventCodec> EventTypeRegistry<E, C> {
    /// Creates an empty registry using `codec`.
    #[must_use]
    pub fn new(codec: C) -> Self {
        Self {
            codec,
            decoders: HashMap::new(),
        }
    }

    /// Registers payload type `P` under `event_type`.
    #[must_use]
    pub fn register<P>(mut self, event_type: &'static str) -> Self
    where
        P: DeserializeOwned + Into<E> + 'static,
    {
        self.decoders.insert(
            event_type,
            Registration {
                decode: decode_as::<P, E, C>,
                payload_type: type_name::<P>(),
            },
        );
        self
    }

    /// Returns the Rust type name of the payload registered under `event_type`.
    #[must_use]
    pub fn payload_type(&self, event_type: &str) -> Option<&'static str> {
        self.decoders
            .get(event_type)
            .map(|registration| registration.payload_type)
    }

    /// Returns `true` if `event_type` has a registered decoder.
    #[must_use]
    pub fn can_apply(&self, event_type: &str) -> bool {
        self.decoders.contains_key(event_type)
    }

    /// Returns the registered event type names.
    pub fn event_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.decoders.keys().copied()
    }

    /// Returns the codec shared by every decoder.
    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Decodes a recorded event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::UnsupportedEvent` if the type is not registered
    /// and `DomainError::Decode` if the payload does not match it.
    pub fn decode(&self, recorded: &RecordedEvent) -> Result<E, DomainError> {
        let registration = self.decoders.get(recorded.event_type.as_str()).ok_or_else(|| {
            DomainError::UnsupportedEvent {
                stream: recorded.stream_id.clone(),
                event_type: recorded.event_type.clone(),
            }
        })?;

        (registration.decode)(&self.codec, &recorded.data).map_err(|source| DomainError::Decode {
            stream: recorded.stream_id.clone(),
            event_type: recorded.event_type.clone(),
            sequence_number: recorded.sequence_number,
            source,
        })
    }
}

impl<E, C> fmt::Debug for EventTypeRegistry<E, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.decoders.keys().collect();
        names.sort();
        f.debug_struct("EventTypeRegistry")
            .field("event_types", &names)
            .finish_non_exhaustive()
    }
}
