//! Crate-wide error type for the Epoxy transport core.
//!
//! Follows the teacher's `CodecError`/`SmppError` shape: one `thiserror`
//! enum with structured variants, rather than a boxed `dyn Error`, so
//! callers can match on failure class.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use thiserror::Error;

/// Well-known error codes carried on the wire inside a `Message::Error`
/// or a `ProtocolError` framelet. Extensible: unrecognised codes parse
/// as `Other(u32)` rather than failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConnectionShutDown = 1,
    MethodNotFound = 2,
    TransportError = 3,
    ProtocolError = 4,
    ApplicationError = 5,
    Other(u32),
}

impl ErrorCode {
    pub fn as_u32(self) -> u32 {
        match self {
            ErrorCode::ConnectionShutDown => 1,
            ErrorCode::MethodNotFound => 2,
            ErrorCode::TransportError => 3,
            ErrorCode::ProtocolError => 4,
            ErrorCode::ApplicationError => 5,
            ErrorCode::Other(v) => v,
        }
    }

    pub fn from_u32(v: u32) -> Self {
        match v {
            1 => ErrorCode::ConnectionShutDown,
            2 => ErrorCode::MethodNotFound,
            3 => ErrorCode::TransportError,
            4 => ErrorCode::ProtocolError,
            5 => ErrorCode::ApplicationError,
            other => ErrorCode::Other(other),
        }
    }
}

/// An application/protocol level error value, as carried by a `Message`.
///
/// Distinct from [`Error`] (this crate's own failure type): a `RpcError`
/// is data that travels on the wire; `Error` is a local, synchronous
/// failure of an API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    pub error_code: ErrorCode,
    pub message: String,
}

impl RpcError {
    pub fn new(error_code: ErrorCode, message: impl Into<String>) -> Self {
        RpcError {
            error_code,
            message: message.into(),
        }
    }

    pub fn shutdown() -> Self {
        RpcError::new(ErrorCode::ConnectionShutDown, "connection shut down")
    }

    pub fn method_not_found(method: &str) -> Self {
        RpcError::new(ErrorCode::MethodNotFound, format!("method not found: {method}"))
    }

    /// Serialize to the bytes carried inside a `ProtocolError` framelet
    /// or an error-tagged `Message`'s `PayloadData` framelet.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u32_le(self.error_code.as_u32());
        let message_bytes = self.message.as_bytes();
        buf.put_u16_le(message_bytes.len() as u16);
        buf.put_slice(message_bytes);
        buf.freeze()
    }

    pub fn decode(contents: &Bytes) -> Result<Self> {
        let mut buf = std::io::Cursor::new(contents.as_ref());
        if buf.remaining() < 4 + 2 {
            return Err(Error::Protocol(ProtocolErrorReason::UnexpectedFrameShape(
                "RpcError contents too short".into(),
            )));
        }
        let error_code = ErrorCode::from_u32(buf.get_u32_le());
        let message_len = buf.get_u16_le() as usize;
        if buf.remaining() < message_len {
            return Err(Error::Protocol(ProtocolErrorReason::UnexpectedFrameShape(
                "RpcError contents truncated message".into(),
            )));
        }
        let message_bytes = buf.copy_to_bytes(message_len);
        let message = String::from_utf8(message_bytes.to_vec()).map_err(|_| {
            Error::Protocol(ProtocolErrorReason::UnexpectedFrameShape(
                "RpcError message is not valid UTF-8".into(),
            ))
        })?;
        Ok(RpcError { error_code, message })
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.error_code.as_u32(), self.message)
    }
}

impl std::error::Error for RpcError {}

/// Reasons a frame can fail to parse. Kept separate from [`Error`] so
/// that `Frame::read` sites can match on the exact cause the way the
/// teacher's `frame::Error`/`CodecError` pairs do.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolErrorReason {
    #[error("frame declares zero framelets")]
    ZeroFramelets,

    #[error("unknown framelet type code 0x{0:04x}")]
    UnknownFrameletType(u16),

    #[error("framelet length {0} is out of range [1, 2^31)")]
    InvalidFrameletLength(u32),

    #[error("stream ended before a complete frame was read")]
    TruncatedStream,

    #[error("peer rejected the handshake: {0}")]
    HandshakeRejected(RpcError),

    #[error("received a frame with an unrecognised shape: {0}")]
    UnexpectedFrameShape(String),

    #[error("missing mandatory framelet: {0}")]
    MissingFramelet(&'static str),
}

/// The crate-wide error type. API misuse fails synchronously as
/// `InvalidArgument`/`InvalidOperation`; network and framing failures are
/// `Protocol`/`Transport` and propagate through a response slot or a
/// `Disconnected` event rather than being retried at this layer.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad input to an API: malformed address, empty framelet contents,
    /// an unknown framelet type, a null/second log handler, etc.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Lifecycle misuse: writing an empty frame, adding a duplicate
    /// request id, registering a second log handler.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Malformed frame, unknown framelet, EOF mid-frame, or a rejected
    /// handshake. Terminates the connection.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolErrorReason),

    /// Socket I/O failure.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// A handler returned an application-level error. Delivered as a
    /// response `Message`, never a connection failure.
    #[error("application error: {0}")]
    Application(#[from] RpcError),
}

impl Error {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Error::InvalidOperation(msg.into())
    }

    pub fn unknown_framelet_type(code: u16) -> Self {
        Error::Protocol(ProtocolErrorReason::UnknownFrameletType(code))
    }

    /// Maps this error to the wire-level [`RpcError`] delivered to a
    /// pending response slot when a connection tears down mid-flight.
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            Error::Protocol(reason) => RpcError::new(ErrorCode::ProtocolError, reason.to_string()),
            Error::Transport(e) => RpcError::new(ErrorCode::TransportError, e.to_string()),
            Error::Application(e) => e.clone(),
            other => RpcError::new(ErrorCode::ProtocolError, other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_error_round_trips_through_encode_decode() {
        let err = RpcError::new(ErrorCode::MethodNotFound, "method not found: Frobnicate");
        let decoded = RpcError::decode(&err.encode()).unwrap();
        assert_eq!(decoded, err);
    }

    #[test]
    fn error_code_other_round_trips_through_u32() {
        let code = ErrorCode::from_u32(9000);
        assert_eq!(code, ErrorCode::Other(9000));
        assert_eq!(code.as_u32(), 9000);
    }
}
