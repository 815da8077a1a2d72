//! Tags a payload as either a successful value or an error value.
//! Mirrors the teacher's `Frame` enum discriminating PDU shape by
//! construction rather than by inspecting a flag after the fact; here
//! the flag (`is_error`) is still exposed for callers that need to
//! branch without matching.

use crate::error::{ProtocolErrorReason, Result, RpcError};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Either a user payload or an [`RpcError`], never both.
#[derive(Debug, Clone, PartialEq)]
enum Body {
    Payload(Bytes),
    Error(RpcError),
}

/// The envelope carried by a response (or event) frame's `PayloadData`
/// framelet once deserialized.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    body: Body,
}

impl Message {
    pub fn from_payload(payload: impl Into<Bytes>) -> Self {
        Message {
            body: Body::Payload(payload.into()),
        }
    }

    pub fn from_error(error: RpcError) -> Self {
        Message {
            body: Body::Error(error),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.body, Body::Error(_))
    }

    /// Extract the payload. Calling this on an error message is a
    /// programmer error, not a recoverable one, so it panics the way
    /// the teacher's `Encodable::to_bytes` panics on an encoding
    /// invariant it expects always to hold.
    pub fn into_payload(self) -> Bytes {
        match self.body {
            Body::Payload(p) => p,
            Body::Error(e) => panic!("Message::into_payload called on an error message: {e}"),
        }
    }

    pub fn payload(&self) -> &Bytes {
        match &self.body {
            Body::Payload(p) => p,
            Body::Error(e) => panic!("Message::payload called on an error message: {e}"),
        }
    }

    /// Extract the error. Calling this on a payload message panics,
    /// mirroring [`Message::into_payload`]'s discipline.
    pub fn into_error(self) -> RpcError {
        match self.body {
            Body::Error(e) => e,
            Body::Payload(_) => panic!("Message::into_error called on a payload message"),
        }
    }

    pub fn error(&self) -> &RpcError {
        match &self.body {
            Body::Error(e) => e,
            Body::Payload(_) => panic!("Message::error called on a payload message"),
        }
    }

    /// Serialize to the bytes carried inside a `PayloadData` framelet.
    /// A single leading tag byte (0 = payload, 1 = error) distinguishes
    /// the two shapes on the wire.
    pub fn encode(&self) -> Bytes {
        match &self.body {
            Body::Payload(p) => {
                let mut buf = BytesMut::with_capacity(1 + p.len());
                buf.put_u8(0);
                buf.put_slice(p);
                buf.freeze()
            }
            Body::Error(e) => {
                let encoded = e.encode();
                let mut buf = BytesMut::with_capacity(1 + encoded.len());
                buf.put_u8(1);
                buf.put_slice(&encoded);
                buf.freeze()
            }
        }
    }

    pub fn decode(contents: &Bytes) -> Result<Self> {
        let mut buf = std::io::Cursor::new(contents.as_ref());
        if buf.remaining() < 1 {
            return Err(ProtocolErrorReason::UnexpectedFrameShape(
                "PayloadData framelet is empty".into(),
            )
            .into());
        }
        let tag = buf.get_u8();
        let rest = contents.slice(1..);
        match tag {
            0 => Ok(Message::from_payload(rest)),
            1 => Ok(Message::from_error(RpcError::decode(&rest)?)),
            other => Err(ProtocolErrorReason::UnexpectedFrameShape(format!(
                "unknown Message tag byte {other}"
            ))
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn payload_message_reports_not_error() {
        let msg = Message::from_payload(Bytes::from_static(b"hi"));
        assert!(!msg.is_error());
        assert_eq!(msg.payload().as_ref(), b"hi");
    }

    #[test]
    fn error_message_reports_is_error() {
        let msg = Message::from_error(RpcError::new(ErrorCode::MethodNotFound, "nope"));
        assert!(msg.is_error());
        assert_eq!(msg.error().error_code, ErrorCode::MethodNotFound);
    }

    #[test]
    #[should_panic]
    fn reading_error_as_payload_panics() {
        let msg = Message::from_error(RpcError::new(ErrorCode::MethodNotFound, "nope"));
        let _ = msg.payload();
    }

    #[test]
    #[should_panic]
    fn reading_payload_as_error_panics() {
        let msg = Message::from_payload(Bytes::from_static(b"hi"));
        let _ = msg.error();
    }

    #[test]
    fn payload_message_round_trips_through_encode_decode() {
        let msg = Message::from_payload(Bytes::from_static(b"hello"));
        let decoded = Message::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn error_message_round_trips_through_encode_decode() {
        let msg = Message::from_error(RpcError::new(ErrorCode::ApplicationError, "boom"));
        let decoded = Message::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn decoding_empty_bytes_is_a_protocol_error() {
        assert!(Message::decode(&Bytes::new()).is_err());
    }
}
