/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

*/

//! Message serialization for the socket transport.
//!
//! A process-wide registry maps message ids to serialize/deserialize
//! closures so `Box<dyn Message>` values can cross the wire as JSON.
//! Every message type that travels between processes must be registered
//! once, usually at program start.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::SocketError;
use crate::Message;

/// Function type for serializing a message to JSON
type SerializeFn = Box<dyn Fn(&dyn Message) -> Result<Value, SocketError> + Send + Sync>;

/// Function type for deserializing JSON to a message
type DeserializeFn = Box<dyn Fn(Value) -> Result<Box<dyn Message>, SocketError> + Send + Sync>;

/// Registry entry containing serialize/deserialize functions
struct RegistryEntry {
    serialize: SerializeFn,
    deserialize: DeserializeFn,
}

/// Global message registry (message id -> entry)
static REGISTRY: Mutex<Option<HashMap<u16, RegistryEntry>>> = Mutex::new(None);

/// Register a message type for wire transfer.
///
/// Messages must implement `Serialize` and `DeserializeOwned` from serde.
/// Registering the same id twice replaces the earlier entry, so repeated
/// registration is harmless.
///
/// # Example
/// ```
/// use serde::{Serialize, Deserialize};
/// use wattrun::{define_message, register_message};
///
/// #[derive(Serialize, Deserialize)]
/// struct PowerReading { watts: f64 }
/// define_message!(PowerReading, 100);
///
/// register_message::<PowerReading>(100);
/// ```
pub fn register_message<M>(message_id: u16)
where
    M: Message + Serialize + DeserializeOwned + 'static,
{
    let mut reg = REGISTRY.lock().unwrap();
    let map = reg.get_or_insert_with(HashMap::new);

    let serialize: SerializeFn = Box::new(move |msg: &dyn Message| {
        let typed = msg
            .as_any()
            .downcast_ref::<M>()
            .ok_or(SocketError::UnregisteredMessage { message_id })?;
        serde_json::to_value(typed).map_err(|e| SocketError::MalformedWire {
            reason: e.to_string(),
        })
    });

    let deserialize: DeserializeFn = Box::new(|value: Value| {
        let msg: M = serde_json::from_value(value).map_err(|e| SocketError::MalformedWire {
            reason: e.to_string(),
        })?;
        Ok(Box::new(msg) as Box<dyn Message>)
    });

    map.insert(
        message_id,
        RegistryEntry {
            serialize,
            deserialize,
        },
    );
}

/// Serialize a message to JSON using the registry.
pub fn serialize_message(msg: &dyn Message) -> Result<Value, SocketError> {
    let message_id = msg.message_id();
    let reg = REGISTRY.lock().unwrap();
    let entry = reg
        .as_ref()
        .and_then(|map| map.get(&message_id))
        .ok_or(SocketError::UnregisteredMessage { message_id })?;
    (entry.serialize)(msg)
}

/// Deserialize a message from JSON using the registry.
pub fn deserialize_message(message_id: u16, value: Value) -> Result<Box<dyn Message>, SocketError> {
    let reg = REGISTRY.lock().unwrap();
    let entry = reg
        .as_ref()
        .and_then(|map| map.get(&message_id))
        .ok_or(SocketError::UnregisteredMessage { message_id })?;
    (entry.deserialize)(value)
}

/// Check if a message id is registered.
pub fn is_message_registered(message_id: u16) -> bool {
    let reg = REGISTRY.lock().unwrap();
    reg.as_ref()
        .map(|map| map.contains_key(&message_id))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::define_message;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct TestMsg {
        value: i32,
        name: String,
    }
    define_message!(TestMsg, 300);

    #[test]
    fn test_register_and_serialize() {
        register_message::<TestMsg>(300);

        let msg = TestMsg {
            value: 42,
            name: "test".to_string(),
        };

        let json = serialize_message(&msg).unwrap();
        assert_eq!(json["value"], 42);
        assert_eq!(json["name"], "test");
    }

    #[test]
    fn test_deserialize() {
        register_message::<TestMsg>(300);

        let json = serde_json::json!({
            "value": 123,
            "name": "hello"
        });

        let msg = deserialize_message(300, json).unwrap();
        let typed = msg.as_any().downcast_ref::<TestMsg>().unwrap();
        assert_eq!(typed.value, 123);
        assert_eq!(typed.name, "hello");
    }

    #[test]
    fn test_is_message_registered_tracks_the_registry() {
        assert!(!is_message_registered(301));
        register_message::<TestMsg>(300);
        assert!(is_message_registered(300));
    }

    #[test]
    fn test_unregistered_id_is_an_error() {
        let err = deserialize_message(9999, serde_json::json!({})).err().unwrap();
        match err {
            SocketError::UnregisteredMessage { message_id } => assert_eq!(message_id, 9999),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_malformed_payload_is_an_error() {
        register_message::<TestMsg>(300);

        let err = deserialize_message(300, serde_json::json!({"value": "not a number"}));
        assert!(matches!(
            err,
            Err(SocketError::MalformedWire { .. })
        ));
    }
}
