/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

*/

//! Error taxonomy for the runtime and its collaborators.
//!
//! Four families, all typed and all carrying enough context to diagnose:
//! configuration errors (missing timeout handler, no routing rule),
//! protocol errors (unknown message type), data errors (malformed report
//! rows, with the offending payload attached) and transport/connectivity
//! errors (socket failures, unreachable backing store). None of these are
//! retried internally.

use serde_json::Value;
use thiserror::Error;

/// Errors raised by the actor runtime loop and its handlers.
#[derive(Debug, Error)]
pub enum ActorError {
    /// No registered handler matched the message. Fatal: dispatch of the
    /// remaining batch is aborted and the error propagates out of `run()`.
    #[error("unknown message type: id {message_id}")]
    UnknownMessageType { message_id: u16 },

    /// A receive timeout fired but no timeout handler is registered.
    /// Configuring a timeout implies configuring a timeout handler.
    #[error("receive timeout fired but no timeout handler is registered")]
    MissingTimeoutHandler,

    /// The actor has no state, meaning `setup()` has not run or the actor
    /// is already torn down.
    #[error("actor state is missing (setup has not run)")]
    MissingState,

    /// An actor thread exited by panic rather than by returning.
    #[error("actor thread {actor:?} panicked")]
    Panicked { actor: String },

    #[error(transparent)]
    Socket(#[from] SocketError),

    /// A handler failed to rebuild a report from a message payload.
    #[error(transparent)]
    Report(#[from] ReportError),

    #[error("spawn failed")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the socket transport.
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("transport error on {channel} channel: {cause}")]
    Transport {
        channel: &'static str,
        #[source]
        cause: zeromq::ZmqError,
    },

    /// The receive call observed the shutdown token; the caller must run
    /// termination cleanup and stop.
    #[error("receive interrupted by shutdown signal")]
    Interrupted,

    #[error("message id {message_id} is not registered for serialization")]
    UnregisteredMessage { message_id: u16 },

    #[error("malformed wire message: {reason}")]
    MalformedWire { reason: String },

    #[error("{channel} channel is not open")]
    NotOpen { channel: &'static str },

    /// The peer side of an in-process transport is gone.
    #[error("transport peer disconnected")]
    Disconnected,

    /// The actor refused the start handshake.
    #[error("start refused by actor: {reason}")]
    StartRefused { reason: String },

    #[error("no control reply within the allotted time")]
    ReplyTimeout,

    #[error("unexpected control reply: message id {message_id}")]
    UnexpectedReply { message_id: u16 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised by the routing filter.
#[derive(Debug, Error)]
pub enum FilterError {
    /// `route` was called on a filter with zero configured rules.
    #[error("no routing rule configured")]
    NoRuleConfigured,
}

/// Errors raised by the grouped-report model.
#[derive(Debug, Error)]
pub enum ReportError {
    /// An input document lacks a required key or holds a malformed value.
    /// Carries the offending payload; the report is never partially built.
    #[error("bad input data: {reason}; offending payload: {input}")]
    BadInputData { reason: String, input: Value },
}

/// Errors raised by streaming report sources.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{source_name}: can't connect to source: {cause}")]
    Unreachable {
        source_name: String,
        #[source]
        cause: mongodb::error::Error,
    },

    #[error("{source_name}: can't subscribe: {cause}")]
    Subscribe {
        source_name: String,
        #[source]
        cause: mongodb::error::Error,
    },

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error("runtime setup failed")]
    Io(#[from] std::io::Error),
}
