// Event Framework
//
// Events are the only way the model changes. Each event can check
// itself against the current model and fold itself into a new one.
// Concrete events are resolved by name through an explicit registry.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Error returned by application code (validation rules, decoders).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Encodes an event's payload for the log.
///
/// Implemented for every `Serialize` type; deriving `Serialize` on an
/// event is all that is needed.
pub trait Payload {
    fn payload(&self) -> serde_json::Result<serde_json::Value>;
}

impl<T: Serialize> Payload for T {
    fn payload(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

/// Trait implemented by all events applied to a model of type `M`.
///
/// `execute` must be pure and deterministic: replaying the log relies on
/// it producing the same model from the same inputs. It receives the
/// model by reference and returns the next value; readers may still hold
/// the previous one.
pub trait Event<M>: Payload + Send + Sync {
    /// Name under which the event is logged and registered.
    fn name(&self) -> &str;

    /// Check the event against the current model. Must not have side effects.
    fn validate(&self, model: &M) -> Result<(), BoxError>;

    /// Produce the model that results from applying this event at `time`.
    fn execute(&self, model: &M, time: DateTime<Utc>) -> M;
}

type Decoder<M> =
    Box<dyn Fn(serde_json::Value) -> Result<Box<dyn Event<M>>, BoxError> + Send + Sync>;

/// Returned when a logged event cannot be turned back into a value.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown event `{name}`")]
    UnknownEvent { name: String },

    #[error("decoding payload of `{name}`: {source}")]
    Payload {
        name: String,
        #[source]
        source: BoxError,
    },
}

/// Maps event names to decoders.
pub struct Registry<M> {
    decoders: HashMap<String, Decoder<M>>,
}

impl<M> Default for Registry<M> {
    fn default() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }
}

impl<M> fmt::Debug for Registry<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.decoders.keys().collect();
        names.sort();
        f.debug_struct("Registry").field("events", &names).finish()
    }
}

impl<M> Registry<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an event type whose payload is its serde representation.
    ///
    /// Registering a name twice replaces the earlier decoder.
    pub fn register<E>(&mut self, name: &str) -> &mut Self
    where
        M: 'static,
        E: Event<M> + DeserializeOwned + 'static,
    {
        self.register_with(name, |payload| {
            let event: E = serde_json::from_value(payload)?;
            Ok(Box::new(event) as Box<dyn Event<M>>)
        })
    }

    /// Register a custom decoder for `name`.
    pub fn register_with<F>(&mut self, name: &str, decoder: F) -> &mut Self
    where
        F: Fn(serde_json::Value) -> Result<Box<dyn Event<M>>, BoxError> + Send + Sync + 'static,
    {
        self.decoders.insert(name.to_string(), Box::new(decoder));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.decoders.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Resolve `name` and decode its payload into a concrete event.
    pub fn decode(
        &self,
        name: &str,
        payload: serde_json::Value,
    ) -> Result<Box<dyn Event<M>>, DecodeError> {
        let decoder = self
            .decoders
            .get(name)
            .ok_or_else(|| DecodeError::UnknownEvent {
                name: name.to_string(),
            })?;

        decoder(payload).map_err(|source| DecodeError::Payload {
            name: name.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize)]
    struct Add {
        amount: i64,
    }

    impl Event<i64> for Add {
        fn name(&self) -> &str {
            "add"
        }

        fn validate(&self, model: &i64) -> Result<(), BoxError> {
            if model.checked_add(self.amount).is_none() {
                return Err("counter would overflow".into());
            }
            Ok(())
        }

        fn execute(&self, model: &i64, _time: DateTime<Utc>) -> i64 {
            model + self.amount
        }
    }

    #[test]
    fn registered_event_decodes_and_executes() {
        let mut registry = Registry::<i64>::new();
        registry.register::<Add>("add");

        let event = registry.decode("add", json!({ "amount": 5 })).unwrap();

        assert_eq!(event.name(), "add");
        assert_eq!(event.execute(&10, Utc::now()), 15);
        assert_eq!(event.payload().unwrap(), json!({ "amount": 5 }));
    }

    #[test]
    fn unknown_name_is_rejected() {
        let registry = Registry::<i64>::new();

        let err = registry.decode("add", json!({ "amount": 5 })).err().unwrap();
        assert!(matches!(err, DecodeError::UnknownEvent { ref name } if name == "add"));
    }

    #[test]
    fn bad_payload_is_rejected() {
        let mut registry = Registry::<i64>::new();
        registry.register::<Add>("add");

        let err = registry
            .decode("add", json!({ "amount": "lots" }))
            .err()
            .unwrap();
        assert!(err.to_string().contains("decoding payload of `add`"));
    }

    #[test]
    fn validation_sees_current_model() {
        let event = Add { amount: 1 };
        assert!(event.validate(&0).is_ok());
        assert!(event.validate(&i64::MAX).is_err());
    }

    #[test]
    fn custom_decoder_wins_on_reregistration() {
        let mut registry = Registry::<i64>::new();
        registry
            .register::<Add>("add")
            .register_with("add", |_| Ok(Box::new(Add { amount: 100 }) as Box<dyn Event<i64>>));

        let event = registry.decode("add", json!(null)).unwrap();
        assert_eq!(event.execute(&0, Utc::now()), 100);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("add"));
    }
}
