/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

*/

//! Built-in control messages for the actor lifecycle protocol.
//!
//! The control set is closed: `StartMessage` triggers initialization,
//! `OkMessage`/`ErrorMessage` are the control-channel replies, and
//! `PoisonPillMessage` instructs the receiving actor to terminate.
//! Application messages live outside this module and must use ids at or
//! above [`APPLICATION_MESSAGE_BASE`].

use serde::{Deserialize, Serialize};

use crate::define_message;
use crate::serialization::register_message;

/// Wire id of [`StartMessage`].
pub const START_MESSAGE_ID: u16 = 1;
/// Wire id of [`OkMessage`].
pub const OK_MESSAGE_ID: u16 = 2;
/// Wire id of [`ErrorMessage`].
pub const ERROR_MESSAGE_ID: u16 = 3;
/// Wire id of [`PoisonPillMessage`].
pub const POISON_PILL_MESSAGE_ID: u16 = 4;

/// First id available to application messages.
pub const APPLICATION_MESSAGE_BASE: u16 = 16;

/// Requests actor initialization.
///
/// Sent on the control channel; the actor replies with [`OkMessage`] or
/// [`ErrorMessage`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartMessage;
define_message!(StartMessage, START_MESSAGE_ID);

/// Positive control-channel reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OkMessage;
define_message!(OkMessage, OK_MESSAGE_ID);

/// Negative control-channel reply, carrying a human-readable reason.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub reason: String,
}
define_message!(ErrorMessage, ERROR_MESSAGE_ID);

impl ErrorMessage {
    pub fn new(reason: impl Into<String>) -> Self {
        ErrorMessage {
            reason: reason.into(),
        }
    }
}

/// Instructs the receiving actor to terminate.
///
/// Delivered on the monitor channel; there is no reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoisonPillMessage;
define_message!(PoisonPillMessage, POISON_PILL_MESSAGE_ID);

/// Register the control set with the serialization registry.
///
/// Idempotent; called by every transport endpoint before binding or
/// connecting so control messages can always cross the wire.
pub fn register_control_messages() {
    register_message::<StartMessage>(START_MESSAGE_ID);
    register_message::<OkMessage>(OK_MESSAGE_ID);
    register_message::<ErrorMessage>(ERROR_MESSAGE_ID);
    register_message::<PoisonPillMessage>(POISON_PILL_MESSAGE_ID);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;

    #[test]
    fn test_control_ids_are_below_application_base() {
        assert!(StartMessage.message_id() < APPLICATION_MESSAGE_BASE);
        assert!(OkMessage.message_id() < APPLICATION_MESSAGE_BASE);
        assert!(ErrorMessage::new("x").message_id() < APPLICATION_MESSAGE_BASE);
        assert!(PoisonPillMessage.message_id() < APPLICATION_MESSAGE_BASE);
    }

    #[test]
    fn test_error_message_reason() {
        let msg = ErrorMessage::new("Actor already initialized");
        assert_eq!(msg.reason, "Actor already initialized");
    }
}
