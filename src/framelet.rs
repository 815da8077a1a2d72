//! The smallest unit on the wire: a typed, non-empty byte segment.
//!
//! Mirrors the teacher's `CommandId` (`datatypes/command_id.rs`): a
//! closed, `TryFromPrimitive`-backed enumeration with explicit on-wire
//! codes, plus a thin wrapper type pairing the tag with its payload.

use crate::error::{Error, ProtocolErrorReason, Result};
use bytes::Bytes;
use num_enum::TryFromPrimitive;

/// The five framelet kinds a `Frame` may carry. Wire values are
/// little-endian `u16`s fixed by the protocol.
#[derive(TryFromPrimitive, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum FrameletType {
    /// Handshake config record (Bond-serialized, forward-compatible).
    EpoxyConfig = 0x4743,
    /// Request/response/event header block.
    EpoxyHeaders = 0x5248,
    /// Pre/post-send layer-stack transform output.
    LayerData = 0x594C,
    /// The user payload itself.
    PayloadData = 0x5444,
    /// A terminal protocol-failure notice.
    ProtocolError = 0x5245,
}

impl FrameletType {
    /// Decode a wire code, returning `None` for anything outside the
    /// closed enumeration.
    pub fn from_wire(code: u16) -> Option<Self> {
        Self::try_from(code).ok()
    }

    pub fn wire_code(self) -> u16 {
        self as u16
    }

    pub fn is_known_type(code: u16) -> bool {
        Self::from_wire(code).is_some()
    }
}

/// The largest legal `length` field for a framelet's content: `[1, 2^31 - 1]`.
pub const MAX_FRAMELET_LENGTH: u32 = (1u32 << 31) - 1;

/// An immutable `(type, contents)` pair. `contents` is guaranteed
/// non-empty by construction — `Framelet::new` is the only constructor
/// and it enforces that invariant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Framelet {
    kind: FrameletType,
    contents: Bytes,
}

impl Framelet {
    /// Build a framelet. Fails if `contents` is empty or exceeds the
    /// maximum on-wire length; the type is always valid since it comes
    /// from the closed [`FrameletType`] enum rather than a raw code.
    pub fn new(kind: FrameletType, contents: impl Into<Bytes>) -> Result<Self> {
        let contents = contents.into();
        if contents.is_empty() {
            return Err(Error::invalid_argument(
                "framelet contents must be non-empty",
            ));
        }
        if contents.len() as u64 > MAX_FRAMELET_LENGTH as u64 {
            return Err(Error::Protocol(ProtocolErrorReason::InvalidFrameletLength(
                contents.len() as u32,
            )));
        }
        Ok(Framelet { kind, contents })
    }

    pub fn kind(&self) -> FrameletType {
        self.kind
    }

    pub fn contents(&self) -> &Bytes {
        &self.contents
    }

    pub fn into_contents(self) -> Bytes {
        self.contents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes_match_protocol_constants() {
        assert_eq!(FrameletType::EpoxyConfig.wire_code(), 0x4743);
        assert_eq!(FrameletType::EpoxyHeaders.wire_code(), 0x5248);
        assert_eq!(FrameletType::LayerData.wire_code(), 0x594C);
        assert_eq!(FrameletType::PayloadData.wire_code(), 0x5444);
        assert_eq!(FrameletType::ProtocolError.wire_code(), 0x5245);
    }

    #[test]
    fn unknown_code_is_not_known() {
        assert!(!FrameletType::is_known_type(0x1234));
        assert!(FrameletType::is_known_type(0x4743));
    }

    #[test]
    fn empty_contents_rejected() {
        let err = Framelet::new(FrameletType::PayloadData, Bytes::new());
        assert!(matches!(err, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn construction_round_trips_fields() {
        let f = Framelet::new(FrameletType::EpoxyConfig, Bytes::from_static(b"bond")).unwrap();
        assert_eq!(f.kind(), FrameletType::EpoxyConfig);
        assert_eq!(f.contents().as_ref(), b"bond");
    }
}
