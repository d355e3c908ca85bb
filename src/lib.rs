/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

*/

//! # Wattrun - Actor Runtime for Power-Measurement Pipelines
//!
//! A lightweight actor runtime underlying a power-measurement monitoring
//! pipeline: sources feed power reports to filters and formula actors
//! over message passing.
//!
//! ## Features
//!
//! - **Actor Model**: Independent units processing messages sequentially
//! - **Message-Driven**: All communication via serialized message passing
//! - **Thread-Safe**: Each actor runs in its own named thread with owned state
//! - **Lifecycle Protocol**: Start handshake, poison-pill termination,
//!   cooperative shutdown on process signals
//! - **Report Plumbing**: Routing filter, grouped report model and a
//!   MongoDB-backed streaming source
//!
//! ## Quick Start
//!
//! ### 1. Define Messages
//!
//! ```rust
//! use wattrun::{define_message, register_message, APPLICATION_MESSAGE_BASE};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct PowerReading { watts: f64 }
//! define_message!(PowerReading, APPLICATION_MESSAGE_BASE);
//! register_message::<PowerReading>(APPLICATION_MESSAGE_BASE);
//! ```
//!
//! ### 2. Create an Actor
//!
//! ```rust,no_run
//! use wattrun::{
//!     Actor, ActorState, KillHandler, Message, MessageMatch, StartHandler,
//!     ZmqSocketInterface, SocketAddress, APPLICATION_MESSAGE_BASE,
//!     POISON_PILL_MESSAGE_ID, START_MESSAGE_ID,
//! };
//!
//! let socket = ZmqSocketInterface::new(SocketAddress::local(7400)).unwrap();
//! let mut actor = Actor::new("reader", Box::new(socket));
//! actor.add_handler(MessageMatch::Id(START_MESSAGE_ID), Box::new(StartHandler::new()));
//! actor.add_handler(MessageMatch::Id(POISON_PILL_MESSAGE_ID), Box::new(KillHandler));
//! actor.add_handler(
//!     MessageMatch::Id(APPLICATION_MESSAGE_BASE),
//!     Box::new(|msg: Box<dyn Message>, state: ActorState| {
//!         // process the reading
//!         Ok(state)
//!     }),
//! );
//! ```
//!
//! ### 3. Run It Under a Manager
//!
//! ```rust,no_run
//! # use wattrun::{Actor, ActorRef, Manager, SocketAddress, ZmqSocketInterface};
//! # use std::time::Duration;
//! # let actor = Actor::new("reader", Box::new(ZmqSocketInterface::new(SocketAddress::local(7400)).unwrap()));
//! let mut manager = Manager::new();
//! manager.watch_signals().unwrap();
//! manager.spawn(actor).unwrap();
//!
//! let mut reader = ActorRef::new("reader", SocketAddress::local(7400)).unwrap();
//! reader.connect().unwrap();
//! reader.start(Duration::from_secs(1)).unwrap();
//! // ... send reports ...
//! reader.monitor().unwrap();
//! reader.kill().unwrap();
//! manager.join().unwrap();
//! ```

pub mod actor;
pub mod error;
pub mod filter;
pub mod handler;
pub mod manager;
pub mod message;
pub mod messages;
pub mod report;
pub mod serialization;
pub mod socket;
pub mod source;
pub mod state;

// Re-export commonly used types
pub use actor::{Actor, TerminatedFn};
pub use error::{ActorError, FilterError, ReportError, SocketError, SourceError};
pub use filter::Filter;
pub use handler::{Handler, KillHandler, MessageMatch, StartHandler, TimeoutHandler};
pub use manager::{Manager, ShutdownToken};
pub use message::Message;
pub use messages::{
    register_control_messages, ErrorMessage, OkMessage, PoisonPillMessage, StartMessage,
    APPLICATION_MESSAGE_BASE, ERROR_MESSAGE_ID, OK_MESSAGE_ID, POISON_PILL_MESSAGE_ID,
    START_MESSAGE_ID,
};
pub use report::{EventReading, GroupedReport};
pub use serialization::{deserialize_message, register_message, serialize_message};
pub use socket::{
    local_pair, ActorRef, LocalHandle, LocalSocketInterface, SocketAddress, SocketInterface,
    ZmqSocketInterface,
};
pub use source::{MongoSource, TimestampBatcher};
pub use state::{ActorState, Behaviour};
