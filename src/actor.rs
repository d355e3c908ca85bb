/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

*/

//! Actor runtime: lifecycle, receive-dispatch-timeout loop, termination.
//!
//! An actor is an independent schedulable unit (one named OS thread)
//! owning private state and a socket transport. Its behavior is a small
//! state machine driven by message arrival or inactivity timeout:
//! `run()` sets the transport up, then receives, dispatches and applies
//! state transitions until the state reports it is no longer alive or the
//! shutdown token fires. Exactly one transition runs at a time; a
//! transition's effects are visible to the next one before it starts.

use std::time::Duration;

use tracing::{debug, info};

use crate::error::{ActorError, SocketError};
use crate::handler::{Handler, MessageMatch, TimeoutHandler};
use crate::manager::ShutdownToken;
use crate::socket::SocketInterface;
use crate::state::{ActorState, Behaviour};
use crate::Message;

/// Hook run during termination cleanup, before the transport closes.
pub type TerminatedFn = Box<dyn FnMut(&mut ActorState) + Send>;

/// A worker unit driven by messages.
///
/// Construct it with a name and a transport, register handlers against
/// message matchers, then hand it to [`crate::manager::Manager::spawn`]
/// (or call [`Actor::run`] on a dedicated thread).
pub struct Actor {
    name: String,
    verbose: bool,
    timeout: Option<Duration>,
    handlers: Vec<(MessageMatch, Box<dyn Handler>)>,
    timeout_handler: Option<Box<dyn TimeoutHandler>>,
    terminated: Option<TerminatedFn>,
    socket: Option<Box<dyn SocketInterface>>,
    state: Option<ActorState>,
    token: ShutdownToken,
}

impl Actor {
    /// Create an actor owning the given transport.
    pub fn new(name: impl Into<String>, socket: Box<dyn SocketInterface>) -> Self {
        Actor {
            name: name.into(),
            verbose: false,
            timeout: None,
            handlers: Vec::new(),
            timeout_handler: None,
            terminated: None,
            socket: Some(socket),
            state: None,
            token: ShutdownToken::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enable per-message debug logging.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Wake the actor after this long without a message. Configuring a
    /// timeout implies registering a timeout handler; a timeout firing
    /// without one is a configuration error surfaced at use time.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    pub fn set_timeout_handler(&mut self, handler: Box<dyn TimeoutHandler>) {
        self.timeout_handler = Some(handler);
    }

    /// Hook invoked exactly once during termination cleanup, before the
    /// transport closes. Specializations release their resources here.
    pub fn set_terminated_behaviour(&mut self, hook: TerminatedFn) {
        self.terminated = Some(hook);
    }

    /// Token observed by the run loop and the transport. Signal watchers
    /// and poison pills are two producers of this same cancellation
    /// signal.
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.token.clone()
    }

    /// Replace the shutdown token, linking this actor to a shared one.
    /// Must happen before the actor starts running.
    pub fn bind_token(&mut self, token: ShutdownToken) {
        self.token = token;
    }

    /// Append a handler binding. Bindings are never removed; the first
    /// structurally-matching entry wins, so register narrow matchers
    /// before broad ones.
    pub fn add_handler(&mut self, matcher: MessageMatch, handler: Box<dyn Handler>) {
        self.handlers.push((matcher, handler));
    }

    /// Look up the handler for a message: linear scan, first match wins.
    pub fn corresponding_handler(
        &mut self,
        msg: &dyn Message,
    ) -> Result<&mut dyn Handler, ActorError> {
        find_handler(&mut self.handlers, msg)
    }

    /// Prepare the actor for its run loop: open the transport, attach the
    /// shutdown token, build the initial state. Called exactly once by
    /// `run()`; calling it twice is undefined.
    fn setup(&mut self) -> Result<(), ActorError> {
        let mut socket = self.socket.take().ok_or(ActorError::MissingState)?;
        socket.open()?;
        socket.observe(self.token.clone());
        self.state = Some(ActorState::new(socket));
        info!(actor = %self.name, "actor started");
        Ok(())
    }

    /// Run the actor to completion. Executes exactly once per actor
    /// lifetime and consumes the actor.
    ///
    /// A handler error is not caught: it propagates out and crashes this
    /// execution context without cleanup, leaving supervision to whoever
    /// spawned the actor. Token-driven interruption (external signal) and
    /// the poison-pill path both funnel into the same cleanup, run once.
    pub fn run(mut self) -> Result<(), ActorError> {
        self.setup()?;

        loop {
            if self.token.is_terminated() {
                break;
            }
            let behaviour = match &self.state {
                Some(state) if state.alive => state.behaviour,
                _ => break,
            };
            match behaviour {
                Behaviour::Receive => self.receive_step()?,
                Behaviour::Idle => {}
            }
        }

        self.kill_process();
        Ok(())
    }

    /// Default step: receive a batch, dispatch it in arrival order, or
    /// run the timeout handler on an empty batch.
    fn receive_step(&mut self) -> Result<(), ActorError> {
        let mut state = self.state.take().ok_or(ActorError::MissingState)?;

        let batch = match state.socket.receive(self.timeout) {
            Ok(batch) => batch,
            Err(SocketError::Interrupted) => {
                // Shutdown signal observed mid-receive: stop cooperatively.
                state.alive = false;
                self.state = Some(state);
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        if self.verbose {
            debug!(actor = %self.name, count = batch.len(), "received");
        }

        if batch.is_empty() {
            let handler = self
                .timeout_handler
                .as_mut()
                .ok_or(ActorError::MissingTimeoutHandler)?;
            state = handler.handle_timeout(state)?;
        } else {
            for msg in batch {
                let handler = find_handler(&mut self.handlers, msg.as_ref())?;
                state = handler.handle(msg, state)?;
            }
        }

        self.state = Some(state);
        Ok(())
    }

    /// Termination cleanup: terminated-behaviour hook, transport
    /// teardown, final log line. Runs exactly once per actor lifetime.
    fn kill_process(&mut self) {
        if let Some(state) = self.state.as_mut() {
            if let Some(hook) = self.terminated.as_mut() {
                hook(state);
            }
            state.socket.close();
        }
        info!(actor = %self.name, "actor terminated");
    }
}

fn find_handler<'a>(
    handlers: &'a mut [(MessageMatch, Box<dyn Handler>)],
    msg: &dyn Message,
) -> Result<&'a mut dyn Handler, ActorError> {
    let message_id = msg.message_id();
    for (matcher, handler) in handlers.iter_mut() {
        if matcher.matches(msg) {
            return Ok(handler.as_mut());
        }
    }
    Err(ActorError::UnknownMessageType { message_id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;

    use crate::define_message;
    use crate::handler::{KillHandler, StartHandler};
    use crate::messages::{
        OkMessage, PoisonPillMessage, StartMessage, POISON_PILL_MESSAGE_ID, START_MESSAGE_ID,
    };
    use crate::socket::local_pair;

    struct Reading {
        id: u32,
    }
    define_message!(Reading, 500);

    struct StrayMessage;
    define_message!(StrayMessage, 501);

    fn recording_handler(log: Arc<Mutex<Vec<u32>>>) -> Box<dyn Handler> {
        Box::new(move |msg: Box<dyn Message>, state: ActorState| {
            let reading = msg.as_any().downcast_ref::<Reading>().unwrap();
            log.lock().unwrap().push(reading.id);
            Ok(state)
        })
    }

    #[test]
    fn test_dispatch_first_match_wins_in_arrival_order() {
        let (socket, handle) = local_pair();
        let mut actor = Actor::new("dispatch", Box::new(socket));
        actor.set_timeout(Duration::from_millis(50));

        let specific = Arc::new(Mutex::new(Vec::new()));
        let fallback = Arc::new(Mutex::new(Vec::new()));
        actor.add_handler(MessageMatch::Id(500), recording_handler(Arc::clone(&specific)));
        actor.add_handler(MessageMatch::Any, recording_handler(Arc::clone(&fallback)));

        actor.setup().unwrap();
        handle.send(Box::new(Reading { id: 1 })).unwrap();
        handle.send(Box::new(Reading { id: 2 })).unwrap();
        handle.send(Box::new(Reading { id: 3 })).unwrap();

        actor.receive_step().unwrap();

        // The narrow binding took every message; the catch-all saw none.
        assert_eq!(*specific.lock().unwrap(), vec![1, 2, 3]);
        assert!(fallback.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_message_type_aborts_the_batch() {
        let (socket, handle) = local_pair();
        let mut actor = Actor::new("unknown", Box::new(socket));
        actor.set_timeout(Duration::from_millis(50));

        actor.add_handler(
            MessageMatch::Id(START_MESSAGE_ID),
            Box::new(StartHandler::new()),
        );

        actor.setup().unwrap();
        handle.send(Box::new(Reading { id: 9 })).unwrap();

        let err = actor.receive_step().unwrap_err();
        match err {
            ActorError::UnknownMessageType { message_id } => assert_eq!(message_id, 500),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_message_mid_batch_stops_dispatch() {
        let (socket, handle) = local_pair();
        let mut actor = Actor::new("mid-batch", Box::new(socket));
        actor.set_timeout(Duration::from_millis(50));

        let seen = Arc::new(Mutex::new(Vec::new()));
        actor.add_handler(MessageMatch::Id(500), recording_handler(Arc::clone(&seen)));

        actor.setup().unwrap();
        handle.send(Box::new(Reading { id: 1 })).unwrap();
        handle.send(Box::new(StrayMessage)).unwrap();
        handle.send(Box::new(Reading { id: 2 })).unwrap();

        let err = actor.receive_step().unwrap_err();
        match err {
            ActorError::UnknownMessageType { message_id } => assert_eq!(message_id, 501),
            other => panic!("unexpected error: {other}"),
        }
        // Dispatch stopped at the stray message: the leading reading was
        // handled, the trailing one never was.
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_timeout_handler_runs_on_empty_receive() {
        let (socket, _handle) = local_pair();
        let mut actor = Actor::new("timeout", Box::new(socket));
        actor.set_timeout(Duration::from_millis(10));

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        actor.set_timeout_handler(Box::new(move |mut state: ActorState| {
            counter.fetch_add(1, Ordering::SeqCst);
            state.alive = false;
            Ok(state)
        }));

        actor.setup().unwrap();
        actor.receive_step().unwrap();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!actor.state.as_ref().unwrap().alive);
    }

    #[test]
    fn test_timeout_without_handler_is_a_configuration_error() {
        let (socket, _handle) = local_pair();
        let mut actor = Actor::new("misconfigured", Box::new(socket));
        actor.set_timeout(Duration::from_millis(10));

        actor.setup().unwrap();
        let err = actor.receive_step().unwrap_err();
        assert!(matches!(err, ActorError::MissingTimeoutHandler));
    }

    #[test]
    fn test_full_lifecycle_start_then_poison_pill() {
        let (socket, handle) = local_pair();
        let mut actor = Actor::new("lifecycle", Box::new(socket));
        actor.add_handler(
            MessageMatch::Id(START_MESSAGE_ID),
            Box::new(StartHandler::new()),
        );
        actor.add_handler(
            MessageMatch::Id(POISON_PILL_MESSAGE_ID),
            Box::new(KillHandler),
        );

        let terminated = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&terminated);
        actor.set_terminated_behaviour(Box::new(move |_state| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        handle.send(Box::new(StartMessage)).unwrap();
        handle.send_monitor(Box::new(PoisonPillMessage)).unwrap();

        let worker = thread::spawn(move || actor.run());
        worker.join().unwrap().unwrap();

        let reply = handle.try_recv_control().unwrap();
        assert!(reply.as_any().is::<OkMessage>());
        assert_eq!(terminated.load(Ordering::SeqCst), 1);
        assert_eq!(handle.close_count(), 1);
    }

    #[test]
    fn test_shutdown_token_interrupts_the_loop() {
        let (socket, handle) = local_pair();
        let mut actor = Actor::new("signalled", Box::new(socket));
        let token = actor.shutdown_token();

        let worker = thread::spawn(move || actor.run());
        token.terminate();
        worker.join().unwrap().unwrap();

        // Cleanup ran exactly once despite no poison pill arriving.
        assert_eq!(handle.close_count(), 1);
    }

    #[test]
    fn test_handler_crash_propagates_without_cleanup() {
        let (socket, handle) = local_pair();
        let mut actor = Actor::new("crash", Box::new(socket));
        actor.add_handler(
            MessageMatch::Id(500),
            Box::new(|_msg: Box<dyn Message>, _state: ActorState| {
                Err(ActorError::MissingState)
            }),
        );

        handle.send(Box::new(Reading { id: 1 })).unwrap();

        let worker = thread::spawn(move || actor.run());
        let result = worker.join().unwrap();
        assert!(result.is_err());
        assert_eq!(handle.close_count(), 0);
    }
}
