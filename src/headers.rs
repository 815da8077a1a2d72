//! Contents of the `EpoxyHeaders` framelet: at minimum a request id, a
//! method name, and a payload kind distinguishing request/response/event.
//!
//! The wire format for `EpoxyConfig` is left as opaque, caller-supplied
//! bytes (a real system hands this to an external schema serializer);
//! headers need an actual layout to drive dispatch, so this module
//! defines one directly, following the teacher's length-prefixed /
//! fixed-width field encoding style (`codec::encode_cstring`/
//! `decode_cstring`) rather than pulling in a schema library for three
//! scalar fields.

use crate::error::{Error, ProtocolErrorReason, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Distinguishes the three shapes a headers-led frame can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadKind {
    Request = 0,
    Response = 1,
    Event = 2,
}

impl PayloadKind {
    fn from_wire(code: u8) -> Result<Self> {
        match code {
            0 => Ok(PayloadKind::Request),
            1 => Ok(PayloadKind::Response),
            2 => Ok(PayloadKind::Event),
            other => Err(Error::Protocol(ProtocolErrorReason::UnexpectedFrameShape(
                format!("unknown payload_type code {other}"),
            ))),
        }
    }
}

/// The decoded contents of an `EpoxyHeaders` framelet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Headers {
    pub request_id: u64,
    pub method_name: String,
    pub payload_type: PayloadKind,
}

impl Headers {
    pub fn request(request_id: u64, method_name: impl Into<String>) -> Self {
        Headers {
            request_id,
            method_name: method_name.into(),
            payload_type: PayloadKind::Request,
        }
    }

    pub fn response(request_id: u64) -> Self {
        Headers {
            request_id,
            method_name: String::new(),
            payload_type: PayloadKind::Response,
        }
    }

    pub fn event(method_name: impl Into<String>) -> Self {
        Headers {
            request_id: 0,
            method_name: method_name.into(),
            payload_type: PayloadKind::Event,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(self.payload_type as u8);
        buf.put_u64_le(self.request_id);
        let name_bytes = self.method_name.as_bytes();
        buf.put_u16_le(name_bytes.len() as u16);
        buf.put_slice(name_bytes);
        buf.freeze()
    }

    pub fn decode(contents: &Bytes) -> Result<Self> {
        let mut buf = std::io::Cursor::new(contents.as_ref());
        if buf.remaining() < 1 + 8 + 2 {
            return Err(ProtocolErrorReason::UnexpectedFrameShape(
                "headers framelet too short".into(),
            )
            .into());
        }
        let payload_type = PayloadKind::from_wire(buf.get_u8())?;
        let request_id = buf.get_u64_le();
        let name_len = buf.get_u16_le() as usize;
        if buf.remaining() < name_len {
            return Err(ProtocolErrorReason::UnexpectedFrameShape(
                "headers framelet truncated method name".into(),
            )
            .into());
        }
        let name_bytes = buf.copy_to_bytes(name_len);
        let method_name = String::from_utf8(name_bytes.to_vec()).map_err(|_| {
            Error::Protocol(ProtocolErrorReason::UnexpectedFrameShape(
                "headers method_name is not valid UTF-8".into(),
            ))
        })?;
        Ok(Headers {
            request_id,
            method_name,
            payload_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_headers_round_trip() {
        let headers = Headers::request(42, "Echo");
        let encoded = headers.encode();
        let decoded = Headers::decode(&encoded).unwrap();
        assert_eq!(decoded, headers);
    }

    #[test]
    fn response_headers_round_trip() {
        let headers = Headers::response(7);
        let decoded = Headers::decode(&headers.encode()).unwrap();
        assert_eq!(decoded, headers);
    }

    #[test]
    fn event_headers_round_trip() {
        let headers = Headers::event("Tick");
        let decoded = Headers::decode(&headers.encode()).unwrap();
        assert_eq!(decoded, headers);
    }

    #[test]
    fn truncated_headers_is_protocol_error() {
        let bytes = Bytes::from_static(&[0x00, 0x01]);
        assert!(Headers::decode(&bytes).is_err());
    }
}
