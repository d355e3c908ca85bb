/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

*/

//! Handlers: units of behavior bound to message-type discriminators.
//!
//! A handler consumes the incoming message and the current actor state and
//! returns the next state. Handlers may perform side effects (control
//! replies, logging) but must always return a usable state. An `Err`
//! return propagates out of the run loop and crashes the actor's execution
//! context; supervision is the spawner's responsibility.

use crate::error::ActorError;
use crate::messages::{ErrorMessage, OkMessage, StartMessage};
use crate::state::{ActorState, Behaviour};
use crate::Message;

/// State transition bound to a message discriminator.
pub trait Handler: Send {
    /// Consume the message and the current state, produce the next state.
    fn handle(&mut self, msg: Box<dyn Message>, state: ActorState)
        -> Result<ActorState, ActorError>;
}

/// Closures work as handlers.
impl<F> Handler for F
where
    F: FnMut(Box<dyn Message>, ActorState) -> Result<ActorState, ActorError> + Send,
{
    fn handle(
        &mut self,
        msg: Box<dyn Message>,
        state: ActorState,
    ) -> Result<ActorState, ActorError> {
        self(msg, state)
    }
}

/// Transition invoked when a receive timeout fires with no message.
pub trait TimeoutHandler: Send {
    fn handle_timeout(&mut self, state: ActorState) -> Result<ActorState, ActorError>;
}

/// Closures work as timeout handlers.
impl<F> TimeoutHandler for F
where
    F: FnMut(ActorState) -> Result<ActorState, ActorError> + Send,
{
    fn handle_timeout(&mut self, state: ActorState) -> Result<ActorState, ActorError> {
        self(state)
    }
}

/// Structural matcher a handler binding is registered under.
///
/// Bindings are kept in an ordered list and the *first* matching entry
/// wins, so a broad matcher registered after narrow ones never shadows
/// them. `Where` covers the polymorphic case: matching on a capability of
/// the message rather than an exact discriminator. `Any` is the catch-all.
#[derive(Clone, Copy)]
pub enum MessageMatch {
    /// Exact discriminator match.
    Id(u16),
    /// Predicate over the message.
    Where(fn(&dyn Message) -> bool),
    /// Matches every message.
    Any,
}

impl MessageMatch {
    pub fn matches(&self, msg: &dyn Message) -> bool {
        match self {
            MessageMatch::Id(id) => msg.message_id() == *id,
            MessageMatch::Where(predicate) => predicate(msg),
            MessageMatch::Any => true,
        }
    }
}

/// Initialization hook run by [`StartHandler`] on the first start request.
pub type InitFn = Box<dyn FnMut(ActorState) -> Result<ActorState, ActorError> + Send>;

/// Built-in start handshake: `uninitialized -> initialized`.
///
/// On a `StartMessage` with `initialized == false`, runs the
/// initialization hook (identity by default), marks the state initialized
/// and replies `OkMessage` on the control channel. A second start request
/// is rejected with `ErrorMessage("Actor already initialized")` and leaves
/// the state unchanged.
///
/// A non-Start message reaching this handler before initialization is
/// silently ignored (no reply, state unchanged). That permissiveness is
/// inherited from the protocol design; it is a known smell, not a feature.
pub struct StartHandler {
    init: Option<InitFn>,
}

impl StartHandler {
    pub fn new() -> Self {
        StartHandler { init: None }
    }

    /// Attach a specialization hook run once during initialization.
    pub fn with_initialization(init: InitFn) -> Self {
        StartHandler { init: Some(init) }
    }
}

impl Default for StartHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for StartHandler {
    fn handle(
        &mut self,
        msg: Box<dyn Message>,
        mut state: ActorState,
    ) -> Result<ActorState, ActorError> {
        if state.initialized {
            state
                .socket
                .send_control(Box::new(ErrorMessage::new("Actor already initialized")))?;
            return Ok(state);
        }

        if !msg.as_any().is::<StartMessage>() {
            return Ok(state);
        }

        if let Some(init) = self.init.as_mut() {
            state = init(state)?;
        }

        state.initialized = true;
        state.socket.send_control(Box::new(OkMessage))?;
        Ok(state)
    }
}

/// Built-in poison-pill handler: flips `alive` and parks the loop.
pub struct KillHandler;

impl Handler for KillHandler {
    fn handle(
        &mut self,
        _msg: Box<dyn Message>,
        mut state: ActorState,
    ) -> Result<ActorState, ActorError> {
        state.alive = false;
        state.behaviour = Behaviour::Idle;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::define_message;
    use crate::messages::PoisonPillMessage;
    use crate::socket::local_pair;

    struct Reading {
        watts: f64,
    }
    define_message!(Reading, 400);

    #[test]
    fn test_match_id() {
        let matcher = MessageMatch::Id(400);
        assert!(matcher.matches(&Reading { watts: 1.0 }));
        assert!(!matcher.matches(&StartMessage));
    }

    #[test]
    fn test_match_where_and_any() {
        let control_only = MessageMatch::Where(|m| {
            m.message_id() < crate::messages::APPLICATION_MESSAGE_BASE
        });
        assert!(control_only.matches(&StartMessage));
        assert!(!control_only.matches(&Reading { watts: 1.0 }));
        assert!(MessageMatch::Any.matches(&Reading { watts: 1.0 }));
    }

    #[test]
    fn test_start_handler_initializes_once() {
        let (socket, handle) = local_pair();
        let state = ActorState::new(Box::new(socket));

        let hook_runs_ref = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let hook_counter = std::sync::Arc::clone(&hook_runs_ref);
        let mut handler = StartHandler::with_initialization(Box::new(move |state| {
            hook_counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(state)
        }));

        let state = handler.handle(Box::new(StartMessage), state).unwrap();
        assert!(state.initialized);
        assert_eq!(hook_runs_ref.load(std::sync::atomic::Ordering::SeqCst), 1);
        let reply = handle.try_recv_control().unwrap();
        assert!(reply.as_any().is::<OkMessage>());

        // Second start: idempotent rejection, hook does not run again.
        let state = handler.handle(Box::new(StartMessage), state).unwrap();
        assert!(state.initialized);
        assert_eq!(hook_runs_ref.load(std::sync::atomic::Ordering::SeqCst), 1);
        let reply = handle.try_recv_control().unwrap();
        let err = reply.as_any().downcast_ref::<ErrorMessage>().unwrap();
        assert_eq!(err.reason, "Actor already initialized");
    }

    #[test]
    fn test_start_handler_ignores_non_start_message() {
        let (socket, handle) = local_pair();
        let state = ActorState::new(Box::new(socket));

        let mut handler = StartHandler::new();
        let state = handler
            .handle(Box::new(Reading { watts: 2.0 }), state)
            .unwrap();

        assert!(!state.initialized);
        assert!(handle.try_recv_control().is_none());
    }

    #[test]
    fn test_kill_handler_stops_the_state() {
        let (socket, _handle) = local_pair();
        let state = ActorState::new(Box::new(socket));

        let mut handler = KillHandler;
        let state = handler.handle(Box::new(PoisonPillMessage), state).unwrap();
        assert!(!state.alive);
        assert_eq!(state.behaviour, Behaviour::Idle);
    }
}
