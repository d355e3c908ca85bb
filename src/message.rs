/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

*/

//! Message trait and discriminator for the actor runtime.
//!
//! Every value exchanged between actors implements `Message`. The message id
//! is the wire discriminator: handler bindings match on it, and the
//! serialization registry keys on it. Use the `define_message!` macro to
//! implement the trait.

use std::any::Any;

/// Trait for all messages in the actor system.
///
/// Each message type carries a unique id. Control messages use ids below
/// [`crate::messages::APPLICATION_MESSAGE_BASE`]; application messages
/// should pick ids at or above it.
///
/// # Example
/// ```
/// use wattrun::define_message;
///
/// struct PowerReading { watts: f64 }
/// define_message!(PowerReading, 100);
/// ```
pub trait Message: Any + Send + 'static {
    /// Returns the unique message id used for dispatch and wire framing.
    fn message_id(&self) -> u16;

    /// For downcasting to the concrete type
    fn as_any(&self) -> &dyn Any;

    /// For downcasting to the concrete type (mutable)
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Macro to implement the `Message` trait for a type.
///
/// # Example
/// ```
/// use wattrun::define_message;
///
/// struct HwpcReportMessage {
///     payload: serde_json::Value,
/// }
/// define_message!(HwpcReportMessage, 42);
/// ```
#[macro_export]
macro_rules! define_message {
    ($name:ty, $id:expr) => {
        impl $crate::Message for $name {
            fn message_id(&self) -> u16 {
                $id
            }

            fn as_any(&self) -> &dyn std::any::Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
                self
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestMessage {
        value: i32,
    }
    define_message!(TestMessage, 200);

    #[test]
    fn test_message_id() {
        let msg = TestMessage { value: 42 };
        assert_eq!(msg.message_id(), 200);
    }

    #[test]
    fn test_downcast() {
        let msg = TestMessage { value: 42 };
        let any_ref = msg.as_any();
        let downcasted = any_ref.downcast_ref::<TestMessage>().unwrap();
        assert_eq!(downcasted.value, 42);
    }
}
