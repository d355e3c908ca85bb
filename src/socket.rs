/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

*/

//! Socket transport for actors.
//!
//! Every actor owns one [`ZmqSocketInterface`] with three inbound channels:
//! *data* (the mailbox), *control* (start handshake requests) and *monitor*
//! (out-of-band supervision, where the poison pill arrives), plus an
//! outbound *control reply* channel. External callers hold an [`ActorRef`]
//! connected to the same endpoints from the other side.
//!
//! All channels are ZMQ PUSH/PULL pairs carrying JSON envelopes
//! `{"message_id": <u16>, "payload": <json>}` through the serialization
//! registry. Each interface owns a current-thread tokio runtime and blocks
//! on socket operations, so actors stay plain synchronous threads.
//!
//! [`LocalSocketInterface`] is an in-process rendition of the same contract
//! over std channels, used by tests and demos.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::runtime::{Builder, Runtime};
use zeromq::{PullSocket, PushSocket, Socket, SocketRecv, SocketSend};

use crate::error::SocketError;
use crate::manager::ShutdownToken;
use crate::messages::{register_control_messages, PoisonPillMessage, StartMessage};
use crate::serialization::{deserialize_message, serialize_message};
use crate::Message;

/// Slice used to poll sockets so the shutdown token is observed even when
/// no receive timeout is configured.
const POLL_SLICE: Duration = Duration::from_millis(100);

/// Wait used when draining additional queued messages into one batch.
const DRAIN_SLICE: Duration = Duration::from_millis(1);

/// Upper bound on messages returned by a single `receive` call.
const MAX_BATCH: usize = 64;

/// Endpoint scheme of one actor: four consecutive TCP ports starting at a
/// base port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketAddress {
    host: String,
    base_port: u16,
}

impl SocketAddress {
    pub fn new(host: impl Into<String>, base_port: u16) -> Self {
        SocketAddress {
            host: host.into(),
            base_port,
        }
    }

    /// Address on the loopback interface.
    pub fn local(base_port: u16) -> Self {
        SocketAddress::new("127.0.0.1", base_port)
    }

    pub fn data_endpoint(&self) -> String {
        format!("tcp://{}:{}", self.host, self.base_port)
    }

    pub fn control_endpoint(&self) -> String {
        format!("tcp://{}:{}", self.host, self.base_port + 1)
    }

    pub fn control_reply_endpoint(&self) -> String {
        format!("tcp://{}:{}", self.host, self.base_port + 2)
    }

    pub fn monitor_endpoint(&self) -> String {
        format!("tcp://{}:{}", self.host, self.base_port + 3)
    }
}

/// Encode a message into its wire envelope.
pub fn encode_message(msg: &dyn Message) -> Result<Vec<u8>, SocketError> {
    let payload = serialize_message(msg)?;
    let envelope = serde_json::json!({
        "message_id": msg.message_id(),
        "payload": payload,
    });
    Ok(envelope.to_string().into_bytes())
}

/// Decode a wire envelope back into a message.
pub fn decode_message(data: &[u8]) -> Result<Box<dyn Message>, SocketError> {
    let envelope: Value = serde_json::from_slice(data).map_err(|e| SocketError::MalformedWire {
        reason: e.to_string(),
    })?;
    let raw_id = envelope
        .get("message_id")
        .and_then(Value::as_u64)
        .ok_or_else(|| SocketError::MalformedWire {
            reason: "missing or non-numeric message_id".to_string(),
        })?;
    let message_id = u16::try_from(raw_id).map_err(|_| SocketError::MalformedWire {
        reason: format!("message_id {raw_id} out of range"),
    })?;
    let payload = envelope.get("payload").cloned().unwrap_or(Value::Null);
    deserialize_message(message_id, payload)
}

/// Actor-side transport abstraction.
///
/// Only the owning actor reads the inbound side. Implementations must be
/// cheap to move into the actor's thread.
pub trait SocketInterface: Send {
    /// Bind/prepare the channels. Called once by `Actor::setup()`.
    fn open(&mut self) -> Result<(), SocketError>;

    /// Block until at least one message is available on any inbound
    /// channel or `timeout` elapses. Returns an empty batch on timeout.
    /// Returns [`SocketError::Interrupted`] when the observed shutdown
    /// token fires during the wait.
    fn receive(&mut self, timeout: Option<Duration>) -> Result<Vec<Box<dyn Message>>, SocketError>;

    /// Send on the data channel. Implementations whose data side is
    /// inbound-only report `NotOpen { channel: "data" }`: the ZMQ actor
    /// side owns the pull end, so its outbound sends go through an
    /// [`ActorRef`] instead.
    fn send(&mut self, msg: Box<dyn Message>) -> Result<(), SocketError>;

    /// Send a reply on the control channel.
    fn send_control(&mut self, msg: Box<dyn Message>) -> Result<(), SocketError>;

    /// Observe a shutdown token: once it fires, `receive` stops waiting
    /// and reports [`SocketError::Interrupted`].
    fn observe(&mut self, token: ShutdownToken);

    /// Tear the channels down. Idempotent; later calls are no-ops.
    fn close(&mut self);
}

/// ZMQ transport bound by the actor.
///
/// Binds PULL sockets for data, control and monitor, and a PUSH socket for
/// control replies. Socket operations run on an owned current-thread tokio
/// runtime.
pub struct ZmqSocketInterface {
    rt: Runtime,
    address: SocketAddress,
    token: Option<ShutdownToken>,
    data: Option<PullSocket>,
    control: Option<PullSocket>,
    control_reply: Option<PushSocket>,
    monitor: Option<PullSocket>,
    closed: bool,
}

impl ZmqSocketInterface {
    pub fn new(address: SocketAddress) -> Result<Self, SocketError> {
        let rt = Builder::new_current_thread().enable_all().build()?;
        Ok(ZmqSocketInterface {
            rt,
            address,
            token: None,
            data: None,
            control: None,
            control_reply: None,
            monitor: None,
            closed: false,
        })
    }

    pub fn address(&self) -> &SocketAddress {
        &self.address
    }

    fn bind_pull(&self, endpoint: &str, channel: &'static str) -> Result<PullSocket, SocketError> {
        let mut socket = PullSocket::new();
        self.rt
            .block_on(socket.bind(endpoint))
            .map_err(|cause| SocketError::Transport { channel, cause })?;
        Ok(socket)
    }
}

impl SocketInterface for ZmqSocketInterface {
    fn open(&mut self) -> Result<(), SocketError> {
        register_control_messages();

        self.data = Some(self.bind_pull(&self.address.data_endpoint(), "data")?);
        self.control = Some(self.bind_pull(&self.address.control_endpoint(), "control")?);
        self.monitor = Some(self.bind_pull(&self.address.monitor_endpoint(), "monitor")?);

        let mut reply = PushSocket::new();
        self.rt
            .block_on(reply.bind(&self.address.control_reply_endpoint()))
            .map_err(|cause| SocketError::Transport {
                channel: "control",
                cause,
            })?;
        self.control_reply = Some(reply);
        Ok(())
    }

    fn receive(&mut self, timeout: Option<Duration>) -> Result<Vec<Box<dyn Message>>, SocketError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let rt = &self.rt;
        let token = self.token.clone();
        let data = self
            .data
            .as_mut()
            .ok_or(SocketError::NotOpen { channel: "data" })?;
        let control = self
            .control
            .as_mut()
            .ok_or(SocketError::NotOpen { channel: "control" })?;
        let monitor = self
            .monitor
            .as_mut()
            .ok_or(SocketError::NotOpen { channel: "monitor" })?;

        loop {
            if let Some(token) = &token {
                if token.is_terminated() {
                    return Err(SocketError::Interrupted);
                }
            }

            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(Vec::new());
                    }
                    POLL_SLICE.min(deadline - now)
                }
                None => POLL_SLICE,
            };

            if let Some(first) = poll_channels(rt, data, control, monitor, slice)? {
                let mut batch = vec![first];
                while batch.len() < MAX_BATCH {
                    match poll_channels(rt, data, control, monitor, DRAIN_SLICE)? {
                        Some(msg) => batch.push(msg),
                        None => break,
                    }
                }
                return Ok(batch);
            }
        }
    }

    fn send(&mut self, _msg: Box<dyn Message>) -> Result<(), SocketError> {
        // The actor side owns the pull end of the data channel; outbound
        // sends go through an ActorRef.
        Err(SocketError::NotOpen { channel: "data" })
    }

    fn send_control(&mut self, msg: Box<dyn Message>) -> Result<(), SocketError> {
        let reply = self
            .control_reply
            .as_mut()
            .ok_or(SocketError::NotOpen { channel: "control" })?;
        let data = encode_message(msg.as_ref())?;
        self.rt
            .block_on(reply.send(data.into()))
            .map_err(|cause| SocketError::Transport {
                channel: "control",
                cause,
            })
    }

    fn observe(&mut self, token: ShutdownToken) {
        self.token = Some(token);
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        // Dropping a socket closes it.
        self.data.take();
        self.control.take();
        self.control_reply.take();
        self.monitor.take();
    }
}

/// Wait up to `wait` for one message on any inbound channel.
fn poll_channels(
    rt: &Runtime,
    data: &mut PullSocket,
    control: &mut PullSocket,
    monitor: &mut PullSocket,
    wait: Duration,
) -> Result<Option<Box<dyn Message>>, SocketError> {
    let polled = rt.block_on(async {
        tokio::time::timeout(wait, async {
            tokio::select! {
                r = data.recv() => ("data", r),
                r = control.recv() => ("control", r),
                r = monitor.recv() => ("monitor", r),
            }
        })
        .await
    });

    match polled {
        Err(_elapsed) => Ok(None),
        Ok((_, Ok(zmsg))) => {
            let bytes = zmsg.get(0).map(|b| b.as_ref()).unwrap_or(&[]);
            decode_message(bytes).map(Some)
        }
        Ok((channel, Err(cause))) => Err(SocketError::Transport { channel, cause }),
    }
}

/// Client-side handle to a remote actor.
///
/// Connects PUSH sockets toward the actor's data, control and monitor
/// channels, and a PULL socket for control replies. Any number of refs may
/// point at the same actor; only the actor reads its inbound side.
pub struct ActorRef {
    name: String,
    address: SocketAddress,
    rt: Runtime,
    data: Option<PushSocket>,
    control: Option<PushSocket>,
    control_reply: Option<PullSocket>,
    monitor: Option<PushSocket>,
}

impl ActorRef {
    pub fn new(name: impl Into<String>, address: SocketAddress) -> Result<Self, SocketError> {
        let rt = Builder::new_current_thread().enable_all().build()?;
        register_control_messages();
        Ok(ActorRef {
            name: name.into(),
            address,
            rt,
            data: None,
            control: None,
            control_reply: None,
            monitor: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &SocketAddress {
        &self.address
    }

    fn connect_push(&self, endpoint: &str, channel: &'static str) -> Result<PushSocket, SocketError> {
        let mut socket = PushSocket::new();
        self.rt
            .block_on(socket.connect(endpoint))
            .map_err(|cause| SocketError::Transport { channel, cause })?;
        // Small delay to let the connection establish.
        self.rt
            .block_on(tokio::time::sleep(Duration::from_millis(10)));
        Ok(socket)
    }

    /// Open the data and control channels toward the actor.
    pub fn connect(&mut self) -> Result<(), SocketError> {
        self.data = Some(self.connect_push(&self.address.data_endpoint(), "data")?);
        self.control = Some(self.connect_push(&self.address.control_endpoint(), "control")?);

        let mut reply = PullSocket::new();
        self.rt
            .block_on(reply.connect(&self.address.control_reply_endpoint()))
            .map_err(|cause| SocketError::Transport {
                channel: "control",
                cause,
            })?;
        self.control_reply = Some(reply);
        Ok(())
    }

    /// Open the monitor channel toward the actor.
    pub fn monitor(&mut self) -> Result<(), SocketError> {
        self.monitor = Some(self.connect_push(&self.address.monitor_endpoint(), "monitor")?);
        Ok(())
    }

    fn push(
        rt: &Runtime,
        socket: &mut Option<PushSocket>,
        channel: &'static str,
        msg: Box<dyn Message>,
    ) -> Result<(), SocketError> {
        let socket = socket.as_mut().ok_or(SocketError::NotOpen { channel })?;
        let data = encode_message(msg.as_ref())?;
        rt.block_on(socket.send(data.into()))
            .map_err(|cause| SocketError::Transport { channel, cause })
    }

    /// Send a message on the actor's data channel.
    pub fn send(&mut self, msg: Box<dyn Message>) -> Result<(), SocketError> {
        Self::push(&self.rt, &mut self.data, "data", msg)
    }

    /// Send a request on the actor's control channel.
    pub fn send_control(&mut self, msg: Box<dyn Message>) -> Result<(), SocketError> {
        Self::push(&self.rt, &mut self.control, "control", msg)
    }

    /// Send a message on the actor's monitor channel.
    pub fn send_monitor(&mut self, msg: Box<dyn Message>) -> Result<(), SocketError> {
        Self::push(&self.rt, &mut self.monitor, "monitor", msg)
    }

    /// Wait for a control-channel reply.
    pub fn recv_control(&mut self, timeout: Duration) -> Result<Box<dyn Message>, SocketError> {
        let reply = self
            .control_reply
            .as_mut()
            .ok_or(SocketError::NotOpen { channel: "control" })?;
        let polled = self
            .rt
            .block_on(async { tokio::time::timeout(timeout, reply.recv()).await });
        match polled {
            Err(_elapsed) => Err(SocketError::ReplyTimeout),
            Ok(Ok(zmsg)) => {
                let bytes = zmsg.get(0).map(|b| b.as_ref()).unwrap_or(&[]);
                decode_message(bytes)
            }
            Ok(Err(cause)) => Err(SocketError::Transport {
                channel: "control",
                cause,
            }),
        }
    }

    /// Run the start handshake: send `StartMessage`, wait for the reply.
    ///
    /// `OkMessage` means the actor initialized; `ErrorMessage` surfaces as
    /// [`SocketError::StartRefused`].
    pub fn start(&mut self, timeout: Duration) -> Result<(), SocketError> {
        self.send_control(Box::new(StartMessage))?;
        let reply = self.recv_control(timeout)?;
        if reply.as_any().is::<crate::messages::OkMessage>() {
            return Ok(());
        }
        if let Some(err) = reply.as_any().downcast_ref::<crate::messages::ErrorMessage>() {
            return Err(SocketError::StartRefused {
                reason: err.reason.clone(),
            });
        }
        Err(SocketError::UnexpectedReply {
            message_id: reply.message_id(),
        })
    }

    /// Fire-and-forget termination request: poison pill on the monitor
    /// channel, then disconnect this side. The actor is expected, but not
    /// guaranteed, to have stopped by the time this returns; callers
    /// needing a barrier join the actor thread instead.
    pub fn kill(&mut self) -> Result<(), SocketError> {
        self.send_monitor(Box::new(PoisonPillMessage))?;
        self.disconnect();
        Ok(())
    }

    /// Drop this side of every channel.
    pub fn disconnect(&mut self) {
        self.data.take();
        self.control.take();
        self.control_reply.take();
        self.monitor.take();
    }
}

/// In-process transport over std channels.
///
/// Same contract as the ZMQ interface: one inbound mailbox (data, control
/// and monitor messages all arrive there) and observable outbound control
/// replies. Built by [`local_pair`]; the peer is a [`LocalHandle`].
pub struct LocalSocketInterface {
    inbox: Receiver<Box<dyn Message>>,
    control_out: Sender<Box<dyn Message>>,
    data_out: Sender<Box<dyn Message>>,
    token: Option<ShutdownToken>,
    closes: Arc<AtomicUsize>,
    closed: bool,
}

/// Caller-side peer of a [`LocalSocketInterface`].
pub struct LocalHandle {
    inbox_tx: Sender<Box<dyn Message>>,
    control_rx: Receiver<Box<dyn Message>>,
    data_rx: Receiver<Box<dyn Message>>,
    closes: Arc<AtomicUsize>,
}

/// Build a connected in-process transport pair.
pub fn local_pair() -> (LocalSocketInterface, LocalHandle) {
    let (inbox_tx, inbox) = channel();
    let (control_out, control_rx) = channel();
    let (data_out, data_rx) = channel();
    let closes = Arc::new(AtomicUsize::new(0));
    (
        LocalSocketInterface {
            inbox,
            control_out,
            data_out,
            token: None,
            closes: Arc::clone(&closes),
            closed: false,
        },
        LocalHandle {
            inbox_tx,
            control_rx,
            data_rx,
            closes,
        },
    )
}

impl LocalHandle {
    /// Deliver a message to the actor's mailbox.
    pub fn send(&self, msg: Box<dyn Message>) -> Result<(), SocketError> {
        self.inbox_tx.send(msg).map_err(|_| SocketError::Disconnected)
    }

    /// Deliver an out-of-band supervision message. The in-process
    /// transport has a single mailbox, so this is the same channel.
    pub fn send_monitor(&self, msg: Box<dyn Message>) -> Result<(), SocketError> {
        self.send(msg)
    }

    /// Next control reply, if one is queued.
    pub fn try_recv_control(&self) -> Option<Box<dyn Message>> {
        self.control_rx.try_recv().ok()
    }

    /// Next outbound data message, if one is queued.
    pub fn try_recv_data(&self) -> Option<Box<dyn Message>> {
        self.data_rx.try_recv().ok()
    }

    /// How many times the peer interface has been closed.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl SocketInterface for LocalSocketInterface {
    fn open(&mut self) -> Result<(), SocketError> {
        register_control_messages();
        Ok(())
    }

    fn receive(&mut self, timeout: Option<Duration>) -> Result<Vec<Box<dyn Message>>, SocketError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(token) = &self.token {
                if token.is_terminated() {
                    return Err(SocketError::Interrupted);
                }
            }

            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(Vec::new());
                    }
                    POLL_SLICE.min(deadline - now)
                }
                None => POLL_SLICE,
            };

            match self.inbox.recv_timeout(slice) {
                Ok(first) => {
                    let mut batch = vec![first];
                    batch.extend(self.inbox.try_iter().take(MAX_BATCH - 1));
                    return Ok(batch);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(SocketError::Disconnected),
            }
        }
    }

    fn send(&mut self, msg: Box<dyn Message>) -> Result<(), SocketError> {
        self.data_out.send(msg).map_err(|_| SocketError::Disconnected)
    }

    fn send_control(&mut self, msg: Box<dyn Message>) -> Result<(), SocketError> {
        self.control_out
            .send(msg)
            .map_err(|_| SocketError::Disconnected)
    }

    fn observe(&mut self, token: ShutdownToken) {
        self.token = Some(token);
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ErrorMessage, OkMessage, StartMessage};

    #[test]
    fn test_socket_address_endpoints() {
        let addr = SocketAddress::local(5000);
        assert_eq!(addr.data_endpoint(), "tcp://127.0.0.1:5000");
        assert_eq!(addr.control_endpoint(), "tcp://127.0.0.1:5001");
        assert_eq!(addr.control_reply_endpoint(), "tcp://127.0.0.1:5002");
        assert_eq!(addr.monitor_endpoint(), "tcp://127.0.0.1:5003");
    }

    #[test]
    fn test_envelope_round_trip() {
        register_control_messages();

        let bytes = encode_message(&ErrorMessage::new("nope")).unwrap();
        let decoded = decode_message(&bytes).unwrap();
        let err = decoded.as_any().downcast_ref::<ErrorMessage>().unwrap();
        assert_eq!(err.reason, "nope");
    }

    #[test]
    fn test_decode_rejects_missing_id() {
        let err = decode_message(b"{\"payload\": null}").err().unwrap();
        assert!(matches!(err, SocketError::MalformedWire { .. }));
    }

    #[test]
    fn test_decode_rejects_out_of_range_id() {
        // 65537 must not wrap around to the start-message id.
        let result = decode_message(b"{\"message_id\": 65537, \"payload\": null}");
        match result {
            Err(SocketError::MalformedWire { reason }) => assert!(reason.contains("65537")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(msg) => panic!("decoded out-of-range id as message {}", msg.message_id()),
        }
    }

    #[test]
    fn test_zmq_send_reports_data_channel_closed() {
        let mut socket = ZmqSocketInterface::new(SocketAddress::local(5100)).unwrap();
        let err = socket.send(Box::new(OkMessage)).err().unwrap();
        assert!(matches!(err, SocketError::NotOpen { channel: "data" }));
    }

    #[test]
    fn test_local_outbound_data_is_observable() {
        let (mut socket, handle) = local_pair();
        socket.open().unwrap();

        assert!(handle.try_recv_data().is_none());
        socket.send(Box::new(OkMessage)).unwrap();

        let out = handle.try_recv_data().unwrap();
        assert!(out.as_any().is::<OkMessage>());
    }

    #[test]
    fn test_local_receive_returns_batch_in_order() {
        let (mut socket, handle) = local_pair();
        socket.open().unwrap();

        handle.send(Box::new(StartMessage)).unwrap();
        handle.send(Box::new(OkMessage)).unwrap();

        let batch = socket.receive(Some(Duration::from_millis(200))).unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch[0].as_any().is::<StartMessage>());
        assert!(batch[1].as_any().is::<OkMessage>());
    }

    #[test]
    fn test_local_receive_times_out_empty() {
        let (mut socket, _handle) = local_pair();
        socket.open().unwrap();

        let batch = socket.receive(Some(Duration::from_millis(20))).unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn test_local_receive_observes_token() {
        let (mut socket, _handle) = local_pair();
        socket.open().unwrap();

        let token = ShutdownToken::new();
        token.terminate();
        socket.observe(token);

        let err = socket.receive(None).err().unwrap();
        assert!(matches!(err, SocketError::Interrupted));
    }

    #[test]
    fn test_local_close_is_idempotent() {
        let (mut socket, handle) = local_pair();
        socket.close();
        socket.close();
        assert_eq!(handle.close_count(), 1);
    }
}
