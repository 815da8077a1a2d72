//! Per-connection registry correlating outbound request ids with the
//! pending completion slots awaiting their response.
//!
//! Grounded in the teacher's use of guarded, shared connection state
//! (`client/keepalive.rs`'s `KeepAliveManager`) combined with the
//! idiomatic tokio shape for a one-shot-per-pending-call registry: a
//! `Mutex<HashMap<RequestId, oneshot::Sender<Message>>>`.

use crate::error::RpcError;
use crate::message::Message;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;

/// A request id, unique within a connection for its lifetime,
/// monotonically assigned by the client side.
pub type RequestId = u64;

/// A one-shot completion handle: writable at most once, readable
/// exactly once. The write side lives inside the [`ResponseMap`]; this
/// is the read side returned to the caller that issued the request.
pub struct ResponseHandle {
    receiver: oneshot::Receiver<Message>,
}

impl ResponseHandle {
    /// Resolve to a `Message` already completed, used by [`ResponseMap::add`]
    /// when the map is shut down at the time of the call.
    fn ready(message: Message) -> Self {
        let (tx, rx) = oneshot::channel();
        // The receiver is guaranteed to observe this send since nothing
        // else holds the sender; a failed send here would mean the
        // receiver was dropped before we returned it to the caller.
        let _ = tx.send(message);
        ResponseHandle { receiver: rx }
    }

    /// Await the response. Resolves to `Err` only if the map dropped the
    /// sender without completing it, which does not happen given
    /// [`ResponseMap::shutdown`]'s guarantee that every outstanding slot
    /// is resolved before the map is considered shut down.
    pub async fn wait(self) -> Message {
        self.receiver
            .await
            .unwrap_or_else(|_| Message::from_error(RpcError::shutdown()))
    }
}

struct Inner {
    pending: HashMap<RequestId, oneshot::Sender<Message>>,
    shut_down: bool,
}

/// The per-connection response map. Safe for concurrent `add`,
/// `complete`, and `shutdown` from independent tasks.
pub struct ResponseMap {
    inner: Mutex<Inner>,
}

impl ResponseMap {
    pub fn new() -> Self {
        ResponseMap {
            inner: Mutex::new(Inner {
                pending: HashMap::new(),
                shut_down: false,
            }),
        }
    }

    /// Register `id` as awaiting a response, returning the handle that
    /// will resolve once it completes.
    ///
    /// If the map is already shut down, returns a handle already
    /// resolved with `ConnectionShutDown` and does not insert anything.
    /// If `id` is already present, fails with `InvalidOperation`.
    pub fn add(&self, id: RequestId) -> crate::error::Result<ResponseHandle> {
        let mut inner = self.inner.lock().unwrap();

        if inner.shut_down {
            return Ok(ResponseHandle::ready(Message::from_error(
                RpcError::shutdown(),
            )));
        }

        if inner.pending.contains_key(&id) {
            return Err(crate::error::Error::invalid_operation(format!(
                "request id {id} is already pending"
            )));
        }

        let (tx, rx) = oneshot::channel();
        inner.pending.insert(id, tx);
        Ok(ResponseHandle { receiver: rx })
    }

    /// Resolve the slot for `id` with `message` and remove it. Returns
    /// `true` if a pending slot was found and completed, `false` for a
    /// late or duplicate completion.
    ///
    /// If the map has since shut down, the slot (if still present — it
    /// normally won't be, `shutdown` already drained it) resolves with
    /// `ConnectionShutDown` instead of `message`, and this still returns
    /// `false`.
    pub fn complete(&self, id: RequestId, message: Message) -> bool {
        let mut inner = self.inner.lock().unwrap();

        let Some(sender) = inner.pending.remove(&id) else {
            return false;
        };

        if inner.shut_down {
            let _ = sender.send(Message::from_error(RpcError::shutdown()));
            return false;
        }

        let _ = sender.send(message);
        true
    }

    /// Mark the map shut down and resolve every outstanding slot with
    /// `ConnectionShutDown`. Idempotent: calling this again is a no-op
    /// because `pending` is already empty.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.shut_down = true;
        for (_, sender) in inner.pending.drain() {
            let _ = sender.send(Message::from_error(RpcError::shutdown()));
        }
    }

    pub fn outstanding_count(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.lock().unwrap().shut_down
    }
}

impl Default for ResponseMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[tokio::test]
    async fn add_then_complete_resolves_handle() {
        let map = ResponseMap::new();
        let handle = map.add(1).unwrap();
        assert_eq!(map.outstanding_count(), 1);

        let resolved = map.complete(1, Message::from_payload(bytes::Bytes::from_static(b"ok")));
        assert!(resolved);
        assert_eq!(map.outstanding_count(), 0);

        let msg = handle.wait().await;
        assert!(!msg.is_error());
        assert_eq!(msg.payload().as_ref(), b"ok");

        let second = map.complete(1, Message::from_payload(bytes::Bytes::from_static(b"ok2")));
        assert!(!second);
    }

    #[test]
    fn duplicate_add_fails() {
        let map = ResponseMap::new();
        let _handle = map.add(1).unwrap();
        let err = map.add(1);
        assert!(matches!(err, Err(crate::error::Error::InvalidOperation(_))));
    }

    #[tokio::test]
    async fn shutdown_race_resolves_with_shutdown_error() {
        let map = ResponseMap::new();
        let handle = map.add(1).unwrap();
        map.shutdown();
        let completed = map.complete(1, Message::from_payload(bytes::Bytes::from_static(b"late")));
        assert!(!completed);
        assert_eq!(map.outstanding_count(), 0);

        let msg = handle.wait().await;
        assert!(msg.is_error());
        assert_eq!(msg.error().error_code, ErrorCode::ConnectionShutDown);
    }

    #[tokio::test]
    async fn add_after_shutdown_yields_already_resolved_handle() {
        let map = ResponseMap::new();
        map.shutdown();
        let handle = map.add(1).unwrap();
        assert_eq!(map.outstanding_count(), 0);

        let msg = handle.wait().await;
        assert!(msg.is_error());
        assert_eq!(msg.error().error_code, ErrorCode::ConnectionShutDown);
    }

    #[tokio::test]
    async fn shutdown_resolves_all_outstanding_slots() {
        let map = ResponseMap::new();
        let h1 = map.add(1).unwrap();
        let h2 = map.add(2).unwrap();
        assert_eq!(map.outstanding_count(), 2);

        map.shutdown();
        assert_eq!(map.outstanding_count(), 0);

        assert!(h1.wait().await.is_error());
        assert!(h2.wait().await.is_error());
    }

    #[test]
    fn shutdown_is_idempotent() {
        let map = ResponseMap::new();
        map.shutdown();
        map.shutdown();
        assert!(map.is_shut_down());
        assert_eq!(map.outstanding_count(), 0);
    }

    #[test]
    fn complete_of_unknown_id_returns_false() {
        let map = ResponseMap::new();
        assert!(!map.complete(42, Message::from_payload(bytes::Bytes::from_static(b"x"))));
    }
}
