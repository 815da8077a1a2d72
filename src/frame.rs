//! Wire layout for an ordered sequence of framelets:
//!
//! ```text
//! frame := count:u16 framelet{count}
//! framelet := type:u16 length:u32 content:byte[length]
//! ```
//!
//! Structured the way the teacher splits `Frame::check` (a cheap
//! completeness probe over a `Cursor`) from `Frame::parse` (the
//! allocating decode) in `frame.rs`/`codec.rs`, so `Connection::read_frame`
//! can retry short reads without re-parsing from scratch.

use crate::error::{Error, ProtocolErrorReason, Result};
use crate::framelet::{Framelet, FrameletType, MAX_FRAMELET_LENGTH};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::Cursor;

/// The largest number of framelets a single frame may carry: `[1, 65535]`.
pub const MAX_FRAMELETS: usize = u16::MAX as usize;

/// An ordered sequence of framelets. May be built up empty, but
/// [`Frame::write`] refuses to emit one with zero framelets.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Frame {
    framelets: Vec<Framelet>,
}

/// Distinguishes "not enough bytes yet" from a genuine protocol
/// violation, mirroring the teacher's `frame::Error::{Incomplete, Other}`.
/// Only used internally while accumulating a read buffer.
#[derive(Debug)]
pub(crate) enum CheckError {
    Incomplete,
    Invalid(Error),
}

impl From<Error> for CheckError {
    fn from(e: Error) -> Self {
        CheckError::Invalid(e)
    }
}

impl Frame {
    pub fn new() -> Self {
        Frame::default()
    }

    pub fn framelets(&self) -> &[Framelet] {
        &self.framelets
    }

    /// Append a framelet. Fails once the frame already holds the
    /// maximum of 65535.
    pub fn push(&mut self, framelet: Framelet) -> Result<()> {
        if self.framelets.len() >= MAX_FRAMELETS {
            return Err(Error::invalid_operation(
                "frame already holds the maximum of 65535 framelets",
            ));
        }
        self.framelets.push(framelet);
        Ok(())
    }

    /// Build a frame from framelets known in advance, failing under the
    /// same cardinality rule as repeated [`Frame::push`] calls.
    pub fn from_framelets(framelets: Vec<Framelet>) -> Result<Self> {
        if framelets.len() > MAX_FRAMELETS {
            return Err(Error::invalid_operation(format!(
                "frame has {} framelets, exceeding the maximum of {MAX_FRAMELETS}",
                framelets.len()
            )));
        }
        Ok(Frame { framelets })
    }

    pub fn framelet_of_type(&self, kind: FrameletType) -> Option<&Framelet> {
        self.framelets.iter().find(|f| f.kind() == kind)
    }

    /// Encode this frame to its exact on-wire byte representation.
    /// Refuses an empty frame.
    pub fn encode(&self) -> Result<Bytes> {
        if self.framelets.is_empty() {
            return Err(Error::invalid_operation("cannot write an empty frame"));
        }

        let mut buf = BytesMut::new();
        buf.put_u16_le(self.framelets.len() as u16);
        for framelet in &self.framelets {
            buf.put_u16_le(framelet.kind().wire_code());
            buf.put_u32_le(framelet.contents().len() as u32);
            buf.put_slice(framelet.contents());
        }
        Ok(buf.freeze())
    }

    /// Probe whether `src` holds a complete frame, without allocating
    /// the decoded structure. Returns the total byte length of the
    /// frame on success. Mirrors `Frame::check` in the teacher's codec.
    pub(crate) fn check(src: &mut Cursor<&[u8]>) -> std::result::Result<usize, CheckError> {
        let start = src.position();

        let count = read_u16(src)?;
        if count == 0 {
            return Err(CheckError::Invalid(Error::Protocol(
                ProtocolErrorReason::ZeroFramelets,
            )));
        }

        for _ in 0..count {
            let type_code = read_u16(src)?;
            if FrameletType::from_wire(type_code).is_none() {
                return Err(CheckError::Invalid(Error::Protocol(
                    ProtocolErrorReason::UnknownFrameletType(type_code),
                )));
            }
            let length = read_u32(src)?;
            if length == 0 || length > MAX_FRAMELET_LENGTH {
                return Err(CheckError::Invalid(Error::Protocol(
                    ProtocolErrorReason::InvalidFrameletLength(length),
                )));
            }
            skip(src, length as usize)?;
        }

        Ok((src.position() - start) as usize)
    }

    /// Parse a frame already validated complete by [`Frame::check`].
    pub(crate) fn parse(src: &mut Cursor<&[u8]>) -> Result<Frame> {
        let count = get_u16(src)?;
        let mut framelets = Vec::with_capacity(count as usize);

        for _ in 0..count {
            let type_code = get_u16(src)?;
            let kind = FrameletType::from_wire(type_code)
                .ok_or(ProtocolErrorReason::UnknownFrameletType(type_code))?;
            let length = get_u32(src)?;
            if length == 0 || length > MAX_FRAMELET_LENGTH {
                return Err(ProtocolErrorReason::InvalidFrameletLength(length).into());
            }
            if (src.remaining() as u64) < length as u64 {
                return Err(ProtocolErrorReason::TruncatedStream.into());
            }
            let content = src.copy_to_bytes(length as usize);
            framelets.push(Framelet::new(kind, content)?);
        }

        Ok(Frame { framelets })
    }
}

fn read_u16(src: &mut Cursor<&[u8]>) -> std::result::Result<u16, CheckError> {
    if src.remaining() < 2 {
        return Err(CheckError::Incomplete);
    }
    Ok(src.get_u16_le())
}

fn read_u32(src: &mut Cursor<&[u8]>) -> std::result::Result<u32, CheckError> {
    if src.remaining() < 4 {
        return Err(CheckError::Incomplete);
    }
    Ok(src.get_u32_le())
}

fn skip(src: &mut Cursor<&[u8]>, n: usize) -> std::result::Result<(), CheckError> {
    if src.remaining() < n {
        return Err(CheckError::Incomplete);
    }
    src.advance(n);
    Ok(())
}

fn get_u16(src: &mut Cursor<&[u8]>) -> Result<u16> {
    if src.remaining() < 2 {
        return Err(ProtocolErrorReason::TruncatedStream.into());
    }
    Ok(src.get_u16_le())
}

fn get_u32(src: &mut Cursor<&[u8]>) -> Result<u32> {
    if src.remaining() < 4 {
        return Err(ProtocolErrorReason::TruncatedStream.into());
    }
    Ok(src.get_u32_le())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_framelet(bytes: &'static [u8]) -> Framelet {
        Framelet::new(FrameletType::EpoxyConfig, Bytes::from_static(bytes)).unwrap()
    }

    #[test]
    fn single_framelet_frame_bytes_match_wire_layout() {
        let mut frame = Frame::new();
        frame.push(config_framelet(b"bond")).unwrap();

        let encoded = frame.encode().unwrap();
        let expected: &[u8] = &[
            0x01, 0x00, // count = 1
            0x43, 0x47, // type = EpoxyConfig
            0x04, 0x00, 0x00, 0x00, // length = 4
            0x62, 0x6F, 0x6E, 0x64, // "bond"
        ];
        assert_eq!(encoded.as_ref(), expected);
    }

    #[test]
    fn empty_frame_refuses_to_encode() {
        let frame = Frame::new();
        assert!(matches!(frame.encode(), Err(Error::InvalidOperation(_))));
    }

    #[test]
    fn round_trip_preserves_order_and_bytes() {
        let mut frame = Frame::new();
        frame.push(config_framelet(b"bond")).unwrap();
        frame
            .push(Framelet::new(FrameletType::LayerData, Bytes::from_static(b"bond")).unwrap())
            .unwrap();
        frame.push(config_framelet(b"bond")).unwrap();

        let encoded = frame.encode().unwrap();
        let mut cursor = Cursor::new(encoded.as_ref());
        let len = Frame::check(&mut cursor).unwrap();
        assert_eq!(len, encoded.len());

        cursor.set_position(0);
        let parsed = Frame::parse(&mut cursor).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn zero_framelets_is_protocol_error() {
        let bytes: &[u8] = &[0x00, 0x00];
        let mut cursor = Cursor::new(bytes);
        let err = Frame::check(&mut cursor);
        assert!(matches!(
            err,
            Err(CheckError::Invalid(Error::Protocol(
                ProtocolErrorReason::ZeroFramelets
            )))
        ));
    }

    #[test]
    fn unknown_type_code_is_protocol_error() {
        let bytes: &[u8] = &[
            0x01, 0x00, // count = 1
            0x34, 0x12, // unknown type 0x1234
            0x01, 0x00, 0x00, 0x00, // length = 1
            0xAB,
        ];
        let mut cursor = Cursor::new(bytes);
        let err = Frame::check(&mut cursor);
        assert!(matches!(
            err,
            Err(CheckError::Invalid(Error::Protocol(
                ProtocolErrorReason::UnknownFrameletType(0x1234)
            )))
        ));
    }

    #[test]
    fn truncated_mid_count_is_incomplete() {
        let bytes: &[u8] = &[0x01];
        let mut cursor = Cursor::new(bytes);
        assert!(matches!(Frame::check(&mut cursor), Err(CheckError::Incomplete)));
    }

    #[test]
    fn truncated_mid_content_is_incomplete() {
        let bytes: &[u8] = &[
            0x01, 0x00, 0x43, 0x47, 0x04, 0x00, 0x00, 0x00, 0x62, 0x6F,
        ];
        let mut cursor = Cursor::new(bytes);
        assert!(matches!(Frame::check(&mut cursor), Err(CheckError::Incomplete)));
    }

    #[test]
    fn length_at_or_above_2gb_is_protocol_error() {
        let bytes: &[u8] = &[
            0x01, 0x00, 0x43, 0x47, 0xFF, 0xFF, 0xFF, 0xFF,
        ];
        let mut cursor = Cursor::new(bytes);
        assert!(matches!(
            Frame::check(&mut cursor),
            Err(CheckError::Invalid(Error::Protocol(
                ProtocolErrorReason::InvalidFrameletLength(_)
            )))
        ));
    }

    #[test]
    fn pushing_past_max_framelets_fails() {
        let framelets = vec![config_framelet(b"x"); MAX_FRAMELETS];
        let mut frame = Frame::from_framelets(framelets).unwrap();
        let result = frame.push(config_framelet(b"x"));
        assert!(matches!(result, Err(Error::InvalidOperation(_))));
    }
}
