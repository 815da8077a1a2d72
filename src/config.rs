//! The handshake config record carried in an `EpoxyConfig` framelet.
//!
//! A real deployment serializes this with an external schema library
//! (Bond in the source system); that dependency is out of scope here.
//! What the connection state machine actually needs is a forward-
//! compatible record it can exchange during the handshake without
//! having to understand every field, so `EpoxyConfig` keeps a version
//! byte plus an opaque extension blob rather than parsing named fields.
//! Every framelet's contents must be non-empty on the wire, so the
//! version byte also guarantees `encode()` is never empty even with no
//! extension data.

use bytes::{Buf, BufMut, Bytes, BytesMut};

const CURRENT_VERSION: u8 = 1;

/// Forward-compatible config payload exchanged during the handshake.
/// `extension` carries fields this crate does not itself interpret;
/// callers that know the schema decode it further, unknown bytes are
/// preserved rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpoxyConfig {
    version: u8,
    extension: Bytes,
}

impl EpoxyConfig {
    pub fn new(extension: impl Into<Bytes>) -> Self {
        EpoxyConfig {
            version: CURRENT_VERSION,
            extension: extension.into(),
        }
    }

    /// The config record advertised when a caller has no parameters of
    /// its own to negotiate.
    pub fn empty() -> Self {
        EpoxyConfig {
            version: CURRENT_VERSION,
            extension: Bytes::new(),
        }
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn extension(&self) -> &Bytes {
        &self.extension
    }

    /// Serialize to the bytes carried inside an `EpoxyConfig` framelet.
    /// Always at least one byte (the version), so it satisfies the
    /// non-empty-contents rule even for an otherwise-empty config.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + self.extension.len());
        buf.put_u8(self.version);
        buf.put_slice(&self.extension);
        buf.freeze()
    }

    /// Decode the contents of a received `EpoxyConfig` framelet. Any
    /// version byte is accepted; bytes past it are kept as-is rather
    /// than validated against a known schema, so peers advertising
    /// fields this crate doesn't know about round-trip cleanly.
    pub fn decode(contents: &Bytes) -> crate::error::Result<Self> {
        let mut buf = std::io::Cursor::new(contents.as_ref());
        if buf.remaining() < 1 {
            return Err(crate::error::ProtocolErrorReason::UnexpectedFrameShape(
                "EpoxyConfig framelet is empty".into(),
            )
            .into());
        }
        let version = buf.get_u8();
        let extension = contents.slice(1..);
        Ok(EpoxyConfig { version, extension })
    }
}

impl Default for EpoxyConfig {
    fn default() -> Self {
        EpoxyConfig::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_encodes_to_a_single_version_byte() {
        let config = EpoxyConfig::empty();
        assert_eq!(config.encode().as_ref(), &[CURRENT_VERSION]);
    }

    #[test]
    fn config_round_trips_through_encode_decode() {
        let config = EpoxyConfig::new(Bytes::from_static(b"unknown-field-blob"));
        let decoded = EpoxyConfig::decode(&config.encode()).unwrap();
        assert_eq!(decoded, config);
    }

    #[test]
    fn decoding_empty_bytes_is_a_protocol_error() {
        assert!(EpoxyConfig::decode(&Bytes::new()).is_err());
    }
}
