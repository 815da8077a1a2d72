//! Accepts inbound TCP connections, drives each through the connection
//! state machine's server-side handshake, and fires `Connected`/
//! `Disconnected` events to registered callbacks.
//!
//! Grounded in the teacher's absence of a listener (`iainh-smpp` is
//! client-only) enriched with `felipemeriga-socket-flow`'s
//! `start_server_with_config` accept-loop shape (`src/server.rs`): one
//! `tokio::spawn`ed loop around `TcpListener::accept`, one further task
//! spawned per accepted socket to drive its handshake without blocking
//! the next `accept`. The connection set is a `Mutex`-guarded map, per
//! this crate's own `§5` concurrency model rather than the socket-flow
//! crate's channel-of-events design — callers here get direct handler
//! callbacks instead of polling an `EventStream`.

use crate::config::EpoxyConfig;
use crate::connection::Connection;
use crate::error::RpcError;
use crate::layer::LayerStack;
use crate::logging::{self, Severity};
use crate::service::MethodRegistry;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener as TokioTcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// A server-side connection: the `ServiceHost` is always the
/// listener's own [`MethodRegistry`], matching the data model's "a
/// service host reference (server role only)".
pub type ServerConnection<L> = Connection<MethodRegistry, L>;

type ConnectedHandler<L> = Arc<dyn Fn(&ServerConnection<L>) -> Option<RpcError> + Send + Sync>;
type DisconnectedHandler<L> = Arc<dyn Fn(&ServerConnection<L>, Option<&RpcError>) + Send + Sync>;

#[derive(Default)]
struct BoundState {
    actual_addr: Option<SocketAddr>,
    accept_task: Option<JoinHandle<()>>,
}

/// Accepts connections on a bound TCP endpoint. Construct via
/// [`crate::transport::Transport::make_listener`]; `start`/`stop`
/// govern the accept loop's lifetime.
pub struct Listener<L: LayerStack + 'static> {
    requested_addr: SocketAddr,
    service: Arc<MethodRegistry>,
    layers: Arc<L>,
    state: Mutex<BoundState>,
    started: AtomicBool,
    connections: Mutex<HashMap<u64, Arc<ServerConnection<L>>>>,
    next_conn_id: AtomicU64,
    cancel: Arc<Notify>,
    cancelled: Arc<AtomicBool>,
    connected_handlers: Mutex<Vec<ConnectedHandler<L>>>,
    disconnected_handlers: Mutex<Vec<DisconnectedHandler<L>>>,
}

impl<L: LayerStack + 'static> Listener<L> {
    pub(crate) fn new(requested_addr: SocketAddr, layers: Arc<L>) -> Arc<Self> {
        Arc::new(Listener {
            requested_addr,
            service: Arc::new(MethodRegistry::new()),
            layers,
            state: Mutex::new(BoundState::default()),
            started: AtomicBool::new(false),
            connections: Mutex::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
            cancel: Arc::new(Notify::new()),
            cancelled: Arc::new(AtomicBool::new(false)),
            connected_handlers: Mutex::new(Vec::new()),
            disconnected_handlers: Mutex::new(Vec::new()),
        })
    }

    /// Register a handler for `method`. Backs the public
    /// `Listener.add_service(service)` surface — in this core, "a
    /// service" is one named handler rather than an external schema
    /// object, since method dispatch shape is this crate's only
    /// concern (see DESIGN.md).
    pub fn add_service<F, Fut>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(crate::message::Message) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = crate::message::Message> + Send + 'static,
    {
        self.service.register(method, handler);
    }

    pub fn is_registered(&self, method: &str) -> bool {
        self.service.is_registered(method)
    }

    /// Append a `Connected` handler. Handlers run in registration
    /// order; the first to return `Some(error)` wins and the
    /// connection is rejected (see [`Connection::accept`]'s
    /// `on_connected` fold).
    pub fn on_connected(
        &self,
        handler: impl Fn(&ServerConnection<L>) -> Option<RpcError> + Send + Sync + 'static,
    ) {
        self.connected_handlers.lock().unwrap().push(Arc::new(handler));
    }

    /// Append a `Disconnected` handler, invoked exactly once per
    /// connection after it reaches a terminal state.
    pub fn on_disconnected(
        &self,
        handler: impl Fn(&ServerConnection<L>, Option<&RpcError>) + Send + Sync + 'static,
    ) {
        self.disconnected_handlers.lock().unwrap().push(Arc::new(handler));
    }

    /// The concrete endpoint this listener is bound to, once `start`
    /// has returned. `None` before the first successful `start`.
    pub fn listen_endpoint(&self) -> Option<SocketAddr> {
        self.state.lock().unwrap().actual_addr
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    /// Bind (if not already bound) and spawn the accept loop.
    /// Idempotent: a second call while already started is a no-op.
    pub async fn start(self: &Arc<Self>) -> crate::error::Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let acceptor = TokioTcpListener::bind(self.requested_addr).await?;
        let actual_addr = acceptor.local_addr()?;
        logging::log(Severity::Information, &format!("listener bound to {actual_addr}"));

        let this = self.clone();
        let task = tokio::spawn(async move { this.run_accept_loop(acceptor).await });

        let mut state = self.state.lock().unwrap();
        state.actual_addr = Some(actual_addr);
        state.accept_task = Some(task);
        Ok(())
    }

    /// Signal cancellation, stop accepting, and await the accept task.
    /// Already-open connections are left alone; callers drive their
    /// shutdown independently (see the Open Question on
    /// `Transport::stop` — the same "no forced drain" stance applies
    /// here).
    pub async fn stop(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.cancel.notify_waiters();

        let task = self.state.lock().unwrap().accept_task.take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    async fn run_accept_loop(self: Arc<Self>, acceptor: TokioTcpListener) {
        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                logging::log(Severity::Information, "listener accept loop cancelled");
                return;
            }

            tokio::select! {
                _ = self.cancel.notified() => {
                    logging::log(Severity::Information, "listener accept loop cancelled");
                    return;
                }
                accepted = acceptor.accept() => {
                    match accepted {
                        Ok((stream, _peer)) => {
                            let listener = self.clone();
                            tokio::spawn(async move { listener.handle_accepted(stream).await });
                        }
                        Err(e) => {
                            logging::log(Severity::Fatal, &format!("accept failed: {e}"));
                        }
                    }
                }
            }
        }
    }

    async fn handle_accepted(self: Arc<Self>, stream: tokio::net::TcpStream) {
        let service = self.service.clone();
        let layers = self.layers.clone();
        let this = self.clone();

        let result = Connection::accept(stream, EpoxyConfig::empty(), service, layers, move |conn| {
            this.fire_connected(conn)
        })
        .await;

        let (conn, reader) = match result {
            Ok(pair) => pair,
            Err(e) => {
                logging::log(Severity::Warning, &format!("inbound handshake failed: {e}"));
                return;
            }
        };

        let id = self.next_conn_id.fetch_add(1, Ordering::SeqCst);
        self.connections.lock().unwrap().insert(id, conn.clone());

        let listener = self.clone();
        conn.spawn_service_loop(reader, move |conn, error| {
            listener.connections.lock().unwrap().remove(&id);
            listener.fire_disconnected(&conn, error.as_ref());
        });
    }

    fn fire_connected(&self, conn: &ServerConnection<L>) -> Option<RpcError> {
        let handlers = self.connected_handlers.lock().unwrap().clone();
        handlers.into_iter().find_map(|h| h(conn))
    }

    fn fire_disconnected(&self, conn: &ServerConnection<L>, error: Option<&RpcError>) {
        let handlers = self.disconnected_handlers.lock().unwrap().clone();
        for handler in handlers {
            handler(conn, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::NoopLayerStack;
    use std::net::SocketAddr;

    #[tokio::test]
    async fn start_on_port_zero_reports_a_concrete_port() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = Listener::new(addr, Arc::new(NoopLayerStack));
        listener.start().await.unwrap();

        let endpoint = listener.listen_endpoint().unwrap();
        assert_ne!(endpoint.port(), 0);

        listener.stop().await;
    }

    #[tokio::test]
    async fn starting_twice_is_idempotent() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = Listener::new(addr, Arc::new(NoopLayerStack));
        listener.start().await.unwrap();
        let first = listener.listen_endpoint().unwrap();
        listener.start().await.unwrap();
        let second = listener.listen_endpoint().unwrap();
        assert_eq!(first, second);
        listener.stop().await;
    }
}
