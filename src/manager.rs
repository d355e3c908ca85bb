/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

*/

//! Supervision root: spawning actors on named threads, shared shutdown
//! signalling, and orderly teardown of a running pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{error, info, warn};

use crate::actor::Actor;
use crate::error::ActorError;
use crate::socket::ActorRef;

/// Shared cancellation flag, set once and never cleared.
///
/// Two producers raise it: the process signal watcher and the supervisor
/// on [`Manager::kill_all`]. Every actor bound to the token observes it
/// between receive poll slices, so a raised token interrupts blocked
/// receives within one slice.
#[derive(Clone, Debug, Default)]
pub struct ShutdownToken {
    flag: Arc<AtomicBool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        ShutdownToken::default()
    }

    /// Raise the flag. Idempotent.
    pub fn terminate(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_terminated(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Owns the threads and references of a running actor pipeline.
///
/// All actors spawned through one manager share its shutdown token, so a
/// single SIGTERM, SIGINT or [`Manager::kill_all`] call stops the whole
/// pipeline cooperatively.
pub struct Manager {
    token: ShutdownToken,
    threads: Vec<(String, JoinHandle<Result<(), ActorError>>)>,
    refs: Vec<ActorRef>,
}

impl Manager {
    pub fn new() -> Self {
        Manager {
            token: ShutdownToken::new(),
            threads: Vec::new(),
            refs: Vec::new(),
        }
    }

    pub fn shutdown_token(&self) -> ShutdownToken {
        self.token.clone()
    }

    /// Run the actor on its own named OS thread, bound to the shared
    /// shutdown token.
    pub fn spawn(&mut self, mut actor: Actor) -> Result<(), ActorError> {
        actor.bind_token(self.token.clone());
        let name = actor.name().to_owned();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || actor.run())?;
        self.threads.push((name, handle));
        Ok(())
    }

    /// Keep a reference for [`Manager::kill_all`] teardown.
    pub fn register(&mut self, actor_ref: ActorRef) {
        self.refs.push(actor_ref);
    }

    /// Watch for SIGTERM and SIGINT on a dedicated thread and raise the
    /// shared token when one arrives.
    pub fn watch_signals(&self) -> Result<(), ActorError> {
        let token = self.token.clone();
        thread::Builder::new()
            .name("signal-watcher".into())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(err) => {
                        error!(error = %err, "signal watcher failed to start");
                        return;
                    }
                };
                rt.block_on(wait_for_signal());
                info!("shutdown signal received");
                token.terminate();
            })?;
        Ok(())
    }

    /// Send a poison pill to every registered actor and raise the token,
    /// covering actors whose monitor channel is already gone.
    pub fn kill_all(&mut self) {
        for actor_ref in &mut self.refs {
            if let Err(err) = actor_ref.kill() {
                warn!(actor = %actor_ref.name(), error = %err, "kill request failed");
            }
        }
        self.token.terminate();
    }

    /// Wait for every spawned actor to finish. Returns the first actor
    /// error encountered, after all threads have been joined.
    pub fn join(&mut self) -> Result<(), ActorError> {
        let mut first_error = None;
        for (name, handle) in self.threads.drain(..) {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(actor = %name, error = %err, "actor failed");
                    first_error.get_or_insert(err);
                }
                Err(_) => {
                    error!(actor = %name, "actor panicked");
                    first_error.get_or_insert(ActorError::Panicked { actor: name });
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for Manager {
    fn default() -> Self {
        Manager::new()
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(err) => {
            error!(error = %err, "cannot watch SIGTERM");
            return;
        }
    };
    let mut int = match signal(SignalKind::interrupt()) {
        Ok(int) => int,
        Err(err) => {
            error!(error = %err, "cannot watch SIGINT");
            return;
        }
    };
    tokio::select! {
        _ = term.recv() => {}
        _ = int.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "cannot watch ctrl-c");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::local_pair;

    #[test]
    fn test_token_starts_clear_and_latches() {
        let token = ShutdownToken::new();
        assert!(!token.is_terminated());
        token.terminate();
        token.terminate();
        assert!(token.is_terminated());
    }

    #[test]
    fn test_token_is_shared_across_clones() {
        let token = ShutdownToken::new();
        let clone = token.clone();
        clone.terminate();
        assert!(token.is_terminated());
    }

    #[test]
    fn test_spawned_actors_stop_on_kill_all() {
        let mut manager = Manager::new();

        let (first, first_handle) = local_pair();
        let (second, second_handle) = local_pair();
        manager.spawn(Actor::new("first", Box::new(first))).unwrap();
        manager
            .spawn(Actor::new("second", Box::new(second)))
            .unwrap();

        manager.kill_all();
        manager.join().unwrap();

        assert_eq!(first_handle.close_count(), 1);
        assert_eq!(second_handle.close_count(), 1);
    }

    #[test]
    fn test_join_surfaces_actor_failure() {
        use crate::handler::MessageMatch;
        use crate::state::ActorState;
        use crate::Message;

        let mut manager = Manager::new();
        let (socket, handle) = local_pair();
        let mut actor = Actor::new("failing", Box::new(socket));
        actor.add_handler(
            MessageMatch::Any,
            Box::new(|_msg: Box<dyn Message>, _state: ActorState| {
                Err(ActorError::MissingTimeoutHandler)
            }),
        );
        handle.send(Box::new(crate::messages::StartMessage)).unwrap();

        manager.spawn(actor).unwrap();
        let err = manager.join().unwrap_err();
        assert!(matches!(err, ActorError::MissingTimeoutHandler));
    }
}
