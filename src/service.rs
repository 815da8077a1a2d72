//! The external collaborator a server-side connection dispatches
//! incoming requests to.
//!
//! Grounded in the teacher's `PduRegistry` (`codec.rs`): a registry
//! mapping a wire key to a handler, exposing `is_registered`/
//! `registered_commands` alongside the lookup itself. `ServiceHost` is
//! the Epoxy-level analogue, keyed by method name instead of
//! `CommandId`. Like the rest of this crate it uses a native `async fn`
//! in the trait rather than pulling in `async-trait`, the same choice
//! the teacher's `client/traits.rs` makes.

use crate::message::Message;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

/// Maps method names to handlers. A `Listener` (or a directly-driven
/// server `Connection`) is generic over one implementation of this
/// trait rather than holding a `dyn ServiceHost`, so that a handler's
/// `async fn` need not be boxed to satisfy dyn-compatibility.
pub trait ServiceHost: Send + Sync {
    /// Whether `method` has a registered handler. Backs
    /// `Listener.is_registered(method)`.
    fn is_registered(&self, method: &str) -> bool;

    /// Invoke the handler for `method` with the decoded request
    /// payload, returning the `Message` to send back as the response.
    /// Callers that look up `is_registered` first only reach here for
    /// known methods; an implementation that receives an unknown method
    /// anyway should respond with `Message::from_error(RpcError::method_not_found(..))`
    /// rather than panicking.
    fn dispatch(
        &self,
        method: &str,
        payload: Message,
    ) -> impl std::future::Future<Output = Message> + Send;
}

/// A `ServiceHost` with no registered methods. Useful for a
/// client-only `Transport` that never accepts inbound requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyServiceHost;

impl ServiceHost for EmptyServiceHost {
    fn is_registered(&self, _method: &str) -> bool {
        false
    }

    async fn dispatch(&self, method: &str, _payload: Message) -> Message {
        Message::from_error(crate::error::RpcError::method_not_found(method))
    }
}

type BoxedReply = Pin<Box<dyn Future<Output = Message> + Send>>;
type Handler = Box<dyn Fn(Message) -> BoxedReply + Send + Sync>;

/// A `ServiceHost` built at runtime by registering one handler per
/// method name. Grounded in the teacher's `PduRegistry`
/// (`HashMap<CommandId, DecoderFn>` behind a `register_pdu`/
/// `is_registered`/`registered_commands` surface); this is the same
/// shape keyed by method name, backing `Listener::add_service` and
/// `Listener::is_registered`.
///
/// A handler's own `async fn` can't appear in the map's value type
/// without erasure (heterogeneous futures per entry), so entries are
/// boxed here — the one place in this crate that reaches for `dyn`
/// over a native `async fn`, because the registry's whole point is to
/// hold handlers of different concrete types side by side.
#[derive(Default)]
pub struct MethodRegistry {
    handlers: Mutex<HashMap<String, Handler>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        MethodRegistry {
            handlers: Mutex::new(HashMap::new()),
        }
    }

    /// Register a handler for `method`, replacing any prior handler of
    /// the same name.
    pub fn register<F, Fut>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Message> + Send + 'static,
    {
        let boxed: Handler = Box::new(move |msg| Box::pin(handler(msg)));
        self.handlers.lock().unwrap().insert(method.into(), boxed);
    }

    /// Unregister `method`, if present. Returns whether anything was
    /// removed.
    pub fn unregister(&self, method: &str) -> bool {
        self.handlers.lock().unwrap().remove(method).is_some()
    }

    /// The currently registered method names, mirroring the teacher's
    /// `PduRegistry::registered_commands`.
    pub fn registered_methods(&self) -> Vec<String> {
        self.handlers.lock().unwrap().keys().cloned().collect()
    }
}

impl ServiceHost for MethodRegistry {
    fn is_registered(&self, method: &str) -> bool {
        self.handlers.lock().unwrap().contains_key(method)
    }

    async fn dispatch(&self, method: &str, payload: Message) -> Message {
        let reply = {
            let guard = self.handlers.lock().unwrap();
            match guard.get(method) {
                Some(handler) => handler(payload),
                None => return Message::from_error(crate::error::RpcError::method_not_found(method)),
            }
        };
        reply.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_service_host_rejects_everything() {
        let host = EmptyServiceHost;
        assert!(!host.is_registered("Echo"));
        let reply = host
            .dispatch("Echo", Message::from_payload(bytes::Bytes::new()))
            .await;
        assert!(reply.is_error());
    }

    #[tokio::test]
    async fn method_registry_dispatches_to_the_registered_handler() {
        let registry = MethodRegistry::new();
        registry.register("Echo", |msg| async move { msg });
        assert!(registry.is_registered("Echo"));
        assert_eq!(registry.registered_methods(), vec!["Echo".to_string()]);

        let reply = registry
            .dispatch("Echo", Message::from_payload(bytes::Bytes::from_static(b"hi")))
            .await;
        assert!(!reply.is_error());
        assert_eq!(reply.payload().as_ref(), b"hi");
    }

    #[tokio::test]
    async fn method_registry_reports_method_not_found_for_unknown_methods() {
        let registry = MethodRegistry::new();
        let reply = registry
            .dispatch("Missing", Message::from_payload(bytes::Bytes::new()))
            .await;
        assert!(reply.is_error());
        assert_eq!(
            reply.error().error_code,
            crate::error::ErrorCode::MethodNotFound
        );
    }

    #[test]
    fn unregister_removes_a_method() {
        let registry = MethodRegistry::new();
        registry.register("Echo", |msg| async move { msg });
        assert!(registry.unregister("Echo"));
        assert!(!registry.is_registered("Echo"));
        assert!(!registry.unregister("Echo"));
    }
}
