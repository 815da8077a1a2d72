//! The pluggable pre/post-send transform pipeline a connection runs a
//! payload through on its way to and from the wire.
//!
//! An outgoing call produces the optional `LayerData` framelet plus the
//! (possibly rewritten) payload bytes to place in `PayloadData`; an
//! incoming call consumes whatever `LayerData` accompanied a frame and
//! recovers the original payload. Like [`crate::service::ServiceHost`],
//! this is a native-`async fn` trait the `Transport`/`Connection` are
//! generic over, not a boxed trait object.

use crate::error::Result;
use bytes::Bytes;

pub trait LayerStack: Send + Sync {
    /// Transform an outgoing payload. Returns the optional `LayerData`
    /// framelet contents to attach and the payload bytes to carry in
    /// `PayloadData`.
    fn transform_outgoing(
        &self,
        payload: Bytes,
    ) -> impl std::future::Future<Output = Result<(Option<Bytes>, Bytes)>> + Send;

    /// Recover the original payload from an incoming frame's optional
    /// `LayerData` contents and its `PayloadData` contents.
    fn transform_incoming(
        &self,
        layer_data: Option<Bytes>,
        payload: Bytes,
    ) -> impl std::future::Future<Output = Result<Bytes>> + Send;
}

/// A layer stack that passes payloads through unchanged and never
/// emits a `LayerData` framelet. The default for a `Transport` with no
/// layers configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLayerStack;

impl LayerStack for NoopLayerStack {
    async fn transform_outgoing(&self, payload: Bytes) -> Result<(Option<Bytes>, Bytes)> {
        Ok((None, payload))
    }

    async fn transform_incoming(&self, _layer_data: Option<Bytes>, payload: Bytes) -> Result<Bytes> {
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_layer_stack_passes_payload_through() {
        let stack = NoopLayerStack;
        let (layer_data, payload) = stack
            .transform_outgoing(Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert!(layer_data.is_none());
        assert_eq!(payload.as_ref(), b"hello");

        let recovered = stack
            .transform_incoming(None, Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert_eq!(recovered.as_ref(), b"hello");
    }
}
