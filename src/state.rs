/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

*/

//! Actor state: the mutable record every actor carries.
//!
//! State is a linear value. Each transition consumes the current state and
//! returns the next one; the runtime loop stores the result before the next
//! receive, so no handler can retain a reference past its return.

use crate::socket::SocketInterface;

/// The step function the runtime loop executes on each iteration.
///
/// `Receive` is the default receive-and-dispatch step. `Idle` is the
/// quiescent step a terminated-state handler swaps in; the loop does
/// nothing in it and exits as soon as `alive` is false.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    Receive,
    Idle,
}

/// Mutable condition of a single actor.
///
/// Created by `setup()` immediately before the run loop starts, mutated
/// only by handlers, owned by exactly one actor for its whole life.
pub struct ActorState {
    /// The run loop continues while this is true.
    pub alive: bool,
    /// Set once by the start handler.
    pub initialized: bool,
    /// Active step function for the run loop.
    pub behaviour: Behaviour,
    /// Transport owned by this actor. Only the owning actor reads its
    /// inbound side.
    pub socket: Box<dyn SocketInterface>,
}

impl ActorState {
    pub fn new(socket: Box<dyn SocketInterface>) -> Self {
        ActorState {
            alive: true,
            initialized: false,
            behaviour: Behaviour::Receive,
            socket,
        }
    }
}
