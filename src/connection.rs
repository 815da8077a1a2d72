//! The per-connection state machine: handshake, service-phase frame
//! dispatch, and shutdown.
//!
//! Structured after the teacher's `Connection` (`connection.rs`): a
//! buffered write half plus an accumulating `BytesMut` read buffer,
//! with `read_frame` looping `parse_frame` against `stream.read_buf`
//! until a complete frame is available or the stream hits EOF. Unlike
//! the teacher's single-purpose SMPP session, a frame here multiplexes
//! requests, responses, and events over one socket, so the read pump
//! also owns correlating responses through the `ResponseMap` and
//! dispatching requests to a `ServiceHost`.

use crate::config::EpoxyConfig;
use crate::error::{Error, ProtocolErrorReason, Result, RpcError};
use crate::frame::{CheckError, Frame};
use crate::framelet::{Framelet, FrameletType};
use crate::headers::{Headers, PayloadKind};
use crate::keepalive::KeepAlive;
use crate::layer::LayerStack;
use crate::logging::{self, Severity};
use crate::message::Message;
use crate::response_map::{RequestId, ResponseHandle, ResponseMap};
use crate::service::ServiceHost;
use bytes::{Buf, Bytes, BytesMut};
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Which side of the handshake a connection played. The response map
/// is kept on both roles (a server that also issues requests just uses
/// it), but only the client side allocates request ids from its own
/// counter during the handshake's initial config exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

struct ReadBuffer {
    read_half: OwnedReadHalf,
    buffer: BytesMut,
}

impl ReadBuffer {
    fn new(read_half: OwnedReadHalf) -> Self {
        ReadBuffer {
            read_half,
            buffer: BytesMut::with_capacity(4 * 1024),
        }
    }

    /// Pull the next complete frame off the buffered stream, reading
    /// more bytes as needed. Returns `Ok(None)` only on a clean EOF
    /// with nothing left buffered.
    async fn read_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.parse_buffered()? {
                return Ok(Some(frame));
            }

            if 0 == self.read_half.read_buf(&mut self.buffer).await? {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(ProtocolErrorReason::TruncatedStream.into());
            }
        }
    }

    fn parse_buffered(&mut self) -> Result<Option<Frame>> {
        let mut cursor = Cursor::new(&self.buffer[..]);
        match Frame::check(&mut cursor) {
            Ok(len) => {
                cursor.set_position(0);
                let frame = Frame::parse(&mut cursor)?;
                self.buffer.advance(len);
                Ok(Some(frame))
            }
            Err(CheckError::Incomplete) => Ok(None),
            Err(CheckError::Invalid(e)) => Err(e),
        }
    }
}

enum HandshakeReply {
    Accepted(EpoxyConfig),
    Rejected(RpcError),
}

fn protocol_error_frame(error: &RpcError) -> Result<Frame> {
    Frame::from_framelets(vec![Framelet::new(
        FrameletType::ProtocolError,
        error.encode(),
    )?])
}

fn config_frame(config: &EpoxyConfig) -> Result<Frame> {
    Frame::from_framelets(vec![Framelet::new(FrameletType::EpoxyConfig, config.encode())?])
}

fn classify_handshake_reply(frame: &Frame) -> Result<HandshakeReply> {
    if frame.framelets().len() == 1 {
        if let Some(f) = frame.framelet_of_type(FrameletType::EpoxyConfig) {
            return Ok(HandshakeReply::Accepted(EpoxyConfig::decode(f.contents())?));
        }
        if let Some(f) = frame.framelet_of_type(FrameletType::ProtocolError) {
            return Ok(HandshakeReply::Rejected(RpcError::decode(f.contents())?));
        }
    }
    Err(ProtocolErrorReason::UnexpectedFrameShape(
        "handshake reply was neither EpoxyConfig nor ProtocolError".into(),
    )
    .into())
}

/// A request/response/event frame's classified shape, after validating
/// the mandatory framelets are present. The `LayerData`/`PayloadData`
/// contents are handed back raw; decoding them into a [`Message`] needs
/// the connection's configured `LayerStack`, which this free function
/// has no access to.
enum ServiceFrame {
    Request {
        request_id: RequestId,
        method: String,
        layer_data: Option<Bytes>,
        raw_payload: Bytes,
    },
    Response {
        request_id: RequestId,
        layer_data: Option<Bytes>,
        raw_payload: Bytes,
    },
    Event {
        method: String,
        layer_data: Option<Bytes>,
        raw_payload: Bytes,
    },
    Terminal(RpcError),
}

fn classify_service_frame(frame: &Frame) -> Result<ServiceFrame> {
    if frame.framelets().len() == 1 {
        if let Some(f) = frame.framelet_of_type(FrameletType::ProtocolError) {
            return Ok(ServiceFrame::Terminal(RpcError::decode(f.contents())?));
        }
    }

    let headers_framelet = frame
        .framelet_of_type(FrameletType::EpoxyHeaders)
        .ok_or(ProtocolErrorReason::MissingFramelet("EpoxyHeaders"))?;
    let headers = Headers::decode(headers_framelet.contents())?;

    let payload_framelet = frame
        .framelet_of_type(FrameletType::PayloadData)
        .ok_or(ProtocolErrorReason::MissingFramelet("PayloadData"))?;

    let layer_data = frame
        .framelet_of_type(FrameletType::LayerData)
        .map(|f| f.contents().clone());

    let raw_payload = payload_framelet.contents().clone();

    match headers.payload_type {
        PayloadKind::Request => Ok(ServiceFrame::Request {
            request_id: headers.request_id,
            method: headers.method_name,
            layer_data,
            raw_payload,
        }),
        PayloadKind::Response => Ok(ServiceFrame::Response {
            request_id: headers.request_id,
            layer_data,
            raw_payload,
        }),
        PayloadKind::Event => Ok(ServiceFrame::Event {
            method: headers.method_name,
            layer_data,
            raw_payload,
        }),
    }
}

/// A live Epoxy connection: either a client connection opened with
/// [`Connection::connect`], or a server connection produced by a
/// listener's accept loop via [`Connection::accept`].
pub struct Connection<S, L>
where
    S: ServiceHost + 'static,
    L: LayerStack + 'static,
{
    write_half: Mutex<BufWriter<OwnedWriteHalf>>,
    response_map: ResponseMap,
    service: Arc<S>,
    layers: Arc<L>,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    role: Role,
    next_request_id: AtomicU64,
    shut_down: AtomicBool,
    keep_alive: KeepAlive,
    read_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<S, L> Connection<S, L>
where
    S: ServiceHost + 'static,
    L: LayerStack + 'static,
{
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// The connection's ambient event-traffic counter. Disabled by
    /// default; see [`KeepAlive`].
    pub fn keep_alive(&self) -> &KeepAlive {
        &self.keep_alive
    }

    async fn write_frame(&self, frame: &Frame) -> Result<()> {
        let bytes = frame.encode()?;
        let mut guard = self.write_half.lock().await;
        guard.write_all(&bytes).await?;
        guard.flush().await?;
        Ok(())
    }

    /// Open a client connection: connect the socket (already done by
    /// the caller — `Transport::connect` owns address resolution),
    /// exchange `EpoxyConfig` frames, and on acceptance, spawn the
    /// background read pump that will deliver inbound responses.
    #[tracing::instrument(skip(stream, local_config, service, layers))]
    pub async fn connect(
        stream: TcpStream,
        local_config: EpoxyConfig,
        service: Arc<S>,
        layers: Arc<L>,
    ) -> Result<Arc<Self>> {
        stream.set_nodelay(true).ok();
        let local_addr = stream.local_addr()?;
        let remote_addr = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();

        let conn = Arc::new(Connection {
            write_half: Mutex::new(BufWriter::new(write_half)),
            response_map: ResponseMap::new(),
            service,
            layers,
            local_addr,
            remote_addr,
            role: Role::Client,
            next_request_id: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
            keep_alive: KeepAlive::new(),
            read_task: std::sync::Mutex::new(None),
        });

        conn.write_frame(&config_frame(&local_config)?).await?;

        let mut reader = ReadBuffer::new(read_half);
        let reply = reader
            .read_frame()
            .await?
            .ok_or(ProtocolErrorReason::TruncatedStream)?;

        match classify_handshake_reply(&reply)? {
            HandshakeReply::Accepted(_server_config) => {
                logging::log(Severity::Information, "client handshake accepted");
            }
            HandshakeReply::Rejected(rpc_error) => {
                logging::log(Severity::Warning, "client handshake rejected by peer");
                return Err(Error::Protocol(ProtocolErrorReason::HandshakeRejected(
                    rpc_error,
                )));
            }
        }

        conn.clone()
            .spawn_service_loop(ReadBufferHandle(reader), |_conn, _error| {});
        Ok(conn)
    }

    /// Accept a server connection on an already-accepted socket. Reads
    /// the client's `EpoxyConfig`, gives `on_connected` a chance to
    /// reject the connection, and on acceptance writes back this side's
    /// own config before returning. The caller (ordinarily a
    /// `Listener`) is responsible for calling [`Connection::spawn_service_loop`]
    /// to start the service phase and be notified on termination.
    #[tracing::instrument(skip(stream, local_config, service, layers, on_connected))]
    pub async fn accept(
        stream: TcpStream,
        local_config: EpoxyConfig,
        service: Arc<S>,
        layers: Arc<L>,
        on_connected: impl FnOnce(&Connection<S, L>) -> Option<RpcError>,
    ) -> Result<(Arc<Self>, ReadBufferHandle)> {
        stream.set_nodelay(true).ok();
        let local_addr = stream.local_addr()?;
        let remote_addr = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();

        let conn = Arc::new(Connection {
            write_half: Mutex::new(BufWriter::new(write_half)),
            response_map: ResponseMap::new(),
            service,
            layers,
            local_addr,
            remote_addr,
            role: Role::Server,
            next_request_id: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
            keep_alive: KeepAlive::new(),
            read_task: std::sync::Mutex::new(None),
        });

        let mut reader = ReadBuffer::new(read_half);
        let client_hello = reader
            .read_frame()
            .await?
            .ok_or(ProtocolErrorReason::TruncatedStream)?;

        if client_hello.framelets().len() != 1
            || client_hello.framelet_of_type(FrameletType::EpoxyConfig).is_none()
        {
            let err = RpcError::new(
                crate::error::ErrorCode::ProtocolError,
                "expected a lone EpoxyConfig frame to open the handshake",
            );
            conn.write_frame(&protocol_error_frame(&err)?).await.ok();
            return Err(Error::Protocol(ProtocolErrorReason::UnexpectedFrameShape(
                "client's opening frame was not a lone EpoxyConfig".into(),
            )));
        }

        if let Some(disconnect_error) = on_connected(&conn) {
            logging::log(Severity::Information, "listener rejected incoming connection");
            conn.write_frame(&protocol_error_frame(&disconnect_error)?)
                .await
                .ok();
            return Err(Error::Protocol(ProtocolErrorReason::HandshakeRejected(
                disconnect_error,
            )));
        }

        conn.write_frame(&config_frame(&local_config)?).await?;
        logging::log(Severity::Information, "server handshake accepted");

        Ok((conn, ReadBufferHandle(reader)))
    }

    /// Begin the service phase: spawn the background task that reads
    /// frames until the connection terminates, dispatching responses
    /// through the response map and requests/events through the
    /// `ServiceHost`. `on_terminal` is invoked exactly once, after the
    /// loop exits, with the error that ended the connection (`None` for
    /// an orderly shutdown).
    pub fn spawn_service_loop(
        self: Arc<Self>,
        reader: ReadBufferHandle,
        on_terminal: impl FnOnce(Arc<Self>, Option<RpcError>) + Send + 'static,
    ) where
        S: Send + Sync,
        L: Send + Sync,
    {
        let task_conn = self.clone();
        let handle = tokio::spawn(async move {
            let error = run_read_loop(&task_conn, reader.0).await;
            task_conn.response_map.shutdown();
            task_conn.shut_down.store(true, Ordering::SeqCst);
            on_terminal(task_conn.clone(), error);
        });
        *self.read_task.lock().unwrap() = Some(handle);
    }

    fn spawn_request_dispatch(
        self: Arc<Self>,
        request_id: RequestId,
        method: String,
        message: Message,
    ) {
        tokio::spawn(async move {
            let reply = if self.service.is_registered(&method) {
                self.service.dispatch(&method, message).await
            } else {
                Message::from_error(RpcError::method_not_found(&method))
            };

            let (layer_data, payload) = match encode_outgoing_message(&reply, self.layers.as_ref()).await {
                Ok(pair) => pair,
                Err(e) => {
                    logging::log(Severity::Warning, "outgoing layer transform failed for a response");
                    (None, Message::from_error(e.to_rpc_error()).encode())
                }
            };

            let headers = Headers::response(request_id);
            let frame = build_service_frame(headers, layer_data, payload);
            if let Ok(frame) = frame {
                self.write_frame(&frame).await.ok();
            }
        });
    }

    fn spawn_event_dispatch(self: Arc<Self>, method: String, message: Message) {
        tokio::spawn(async move {
            if self.service.is_registered(&method) {
                let _ = self.service.dispatch(&method, message).await;
            }
        });
    }

    /// Issue an outbound request and await its response.
    pub async fn send_request(self: &Arc<Self>, method: impl Into<String>, payload: Bytes) -> Result<Message> {
        let method = method.into();
        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);

        let (layer_data, payload) =
            encode_outgoing_message(&Message::from_payload(payload), self.layers.as_ref()).await?;

        let handle = self.response_map.add(request_id)?;

        let headers = Headers::request(request_id, method);
        let frame = build_service_frame(headers, layer_data, payload)?;

        if let Err(e) = self.write_frame(&frame).await {
            let rpc_error = e.to_rpc_error();
            self.response_map.complete(request_id, Message::from_error(rpc_error));
            return Err(e);
        }

        Ok(handle.wait().await)
    }

    /// Send a fire-and-forget event. No response is expected or awaited.
    pub async fn send_event(&self, method: impl Into<String>, payload: Bytes) -> Result<()> {
        let (layer_data, payload) =
            encode_outgoing_message(&Message::from_payload(payload), self.layers.as_ref()).await?;
        let headers = Headers::event(method.into());
        let frame = build_service_frame(headers, layer_data, payload)?;
        self.write_frame(&frame).await?;
        self.keep_alive.record_event_sent();
        Ok(())
    }

    /// Orderly shutdown: send a final `ProtocolError` framelet announcing
    /// it to the peer, resolve every outstanding request locally, half-close
    /// the write side, then drain and await whatever is still in flight on
    /// the read loop before returning.
    pub async fn stop(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let reason = RpcError::new(
            crate::error::ErrorCode::ConnectionShutDown,
            "connection stopped locally",
        );
        self.write_frame(&protocol_error_frame(&reason)?).await.ok();
        self.response_map.shutdown();

        self.write_half.lock().await.shutdown().await.ok();

        let read_task = self.read_task.lock().unwrap().take();
        if let Some(read_task) = read_task {
            let _ = read_task.await;
        }

        Ok(())
    }
}

/// Opaque handle threading the accept-time read buffer into
/// [`Connection::spawn_service_loop`] without exposing `ReadBuffer`
/// itself as part of the public API.
pub struct ReadBufferHandle(ReadBuffer);

fn build_service_frame(headers: Headers, layer_data: Option<Bytes>, payload: Bytes) -> Result<Frame> {
    let mut framelets = vec![Framelet::new(FrameletType::EpoxyHeaders, headers.encode())?];
    if let Some(data) = layer_data {
        framelets.push(Framelet::new(FrameletType::LayerData, data)?);
    }
    framelets.push(Framelet::new(FrameletType::PayloadData, payload)?);
    Frame::from_framelets(framelets)
}

/// Run an application-level `Message` through the outgoing layer
/// transform and serialize it to the `(LayerData, PayloadData)` pair a
/// frame carries. Errors bypass the layer stack — it exists to rewrite
/// application payloads, not failure notices — and serialize directly.
async fn encode_outgoing_message<L: LayerStack>(
    message: &Message,
    layers: &L,
) -> Result<(Option<Bytes>, Bytes)> {
    if message.is_error() {
        return Ok((None, message.encode()));
    }
    let (layer_data, payload) = layers.transform_outgoing(message.payload().clone()).await?;
    Ok((layer_data, Message::from_payload(payload).encode()))
}

/// Inverse of [`encode_outgoing_message`]: decode the `PayloadData`
/// framelet's tag, and for a payload-tagged message, recover the
/// original bytes through the incoming layer transform.
async fn decode_incoming_message<L: LayerStack>(
    layer_data: Option<Bytes>,
    raw_payload: Bytes,
    layers: &L,
) -> Result<Message> {
    let message = Message::decode(&raw_payload)?;
    if message.is_error() {
        return Ok(message);
    }
    let recovered = layers
        .transform_incoming(layer_data, message.payload().clone())
        .await?;
    Ok(Message::from_payload(recovered))
}

/// Drive the service phase's read pump: repeatedly pull frames off the
/// wire, correlate responses through the response map, and dispatch
/// requests/events to the `ServiceHost`, until the stream ends, the
/// peer signals a terminal `ProtocolError`, or a malformed frame forces
/// this side to do the same. Returns the error that ended the
/// connection, or `None` for a clean peer-initiated EOF.
async fn run_read_loop<S, L>(conn: &Arc<Connection<S, L>>, mut reader: ReadBuffer) -> Option<RpcError>
where
    S: ServiceHost + 'static,
    L: LayerStack + 'static,
{
    loop {
        let frame = match reader.read_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => return None,
            Err(e) => return Some(e.to_rpc_error()),
        };

        let classified = match classify_service_frame(&frame) {
            Ok(c) => c,
            Err(e) => {
                let rpc_error = e.to_rpc_error();
                if let Ok(err_frame) = protocol_error_frame(&rpc_error) {
                    conn.write_frame(&err_frame).await.ok();
                }
                return Some(rpc_error);
            }
        };

        match classified {
            ServiceFrame::Terminal(rpc_error) => {
                logging::log(Severity::Information, "peer closed the connection with a ProtocolError");
                return Some(rpc_error);
            }
            ServiceFrame::Response {
                request_id,
                layer_data,
                raw_payload,
            } => match decode_incoming_message(layer_data, raw_payload, conn.layers.as_ref()).await {
                Ok(message) => {
                    conn.response_map.complete(request_id, message);
                }
                Err(e) => {
                    let rpc_error = e.to_rpc_error();
                    if let Ok(err_frame) = protocol_error_frame(&rpc_error) {
                        conn.write_frame(&err_frame).await.ok();
                    }
                    return Some(rpc_error);
                }
            },
            ServiceFrame::Request {
                request_id,
                method,
                layer_data,
                raw_payload,
            } => match decode_incoming_message(layer_data, raw_payload, conn.layers.as_ref()).await {
                Ok(message) => conn.clone().spawn_request_dispatch(request_id, method, message),
                Err(e) => {
                    let rpc_error = e.to_rpc_error();
                    if let Ok(err_frame) = protocol_error_frame(&rpc_error) {
                        conn.write_frame(&err_frame).await.ok();
                    }
                    return Some(rpc_error);
                }
            },
            ServiceFrame::Event {
                method,
                layer_data,
                raw_payload,
            } => match decode_incoming_message(layer_data, raw_payload, conn.layers.as_ref()).await {
                Ok(message) => conn.clone().spawn_event_dispatch(method, message),
                Err(e) => {
                    logging::log(Severity::Warning, "dropping malformed inbound event frame");
                    let _ = e;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::NoopLayerStack;

    #[tokio::test]
    async fn payload_message_round_trips_through_layer_encode_decode() {
        let layers = NoopLayerStack;
        let message = Message::from_payload(Bytes::from_static(b"hello"));
        let (layer_data, raw_payload) = encode_outgoing_message(&message, &layers).await.unwrap();
        assert!(layer_data.is_none());

        let decoded = decode_incoming_message(layer_data, raw_payload, &layers)
            .await
            .unwrap();
        assert!(!decoded.is_error());
        assert_eq!(decoded.payload().as_ref(), b"hello");
    }

    #[tokio::test]
    async fn error_message_bypasses_the_layer_stack() {
        let layers = NoopLayerStack;
        let message = Message::from_error(RpcError::method_not_found("Echo"));
        let (layer_data, raw_payload) = encode_outgoing_message(&message, &layers).await.unwrap();
        assert!(layer_data.is_none());

        let decoded = decode_incoming_message(layer_data, raw_payload, &layers)
            .await
            .unwrap();
        assert!(decoded.is_error());
        assert_eq!(decoded.error().error_code, crate::error::ErrorCode::MethodNotFound);
    }

    #[test]
    fn classify_service_frame_rejects_missing_headers() {
        let frame = Frame::from_framelets(vec![Framelet::new(
            FrameletType::PayloadData,
            Bytes::from_static(b"x"),
        )
        .unwrap()])
        .unwrap();
        assert!(classify_service_frame(&frame).is_err());
    }

    #[test]
    fn classify_service_frame_recognises_a_terminal_protocol_error() {
        let err = RpcError::method_not_found("Echo");
        let frame = protocol_error_frame(&err).unwrap();
        assert!(matches!(
            classify_service_frame(&frame).unwrap(),
            ServiceFrame::Terminal(_)
        ));
    }
}
