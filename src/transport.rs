//! Thin factory tying the frame codec, connection state machine, and
//! listener together: builds client connections and listeners, and
//! owns the process-wide [`LayerStack`].
//!
//! Grounded in the teacher's [`crate::client::builder::ClientBuilder`]
//! (`client/builder.rs`): a small non-generic-over-credentials factory
//! whose methods do "resolve address, connect, run the handshake" in
//! one call. `Transport` generalises that to both connection roles.

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::layer::{LayerStack, NoopLayerStack};
use crate::listener::Listener;
use crate::service::EmptyServiceHost;
use crate::EpoxyConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;

/// The port an address string resolves to when it names a bare host
/// with no `:port` suffix.
pub const DEFAULT_PORT: u16 = 25188;

/// A client-side connection. The `ServiceHost` is always
/// [`EmptyServiceHost`]: per the data model, a service host reference
/// is server-role only, so a `Transport`-opened connection has no
/// methods of its own to dispatch inbound requests to.
pub type ClientConnection<L> = Connection<EmptyServiceHost, L>;

/// Split `host-or-ip[:port]` into its parts, defaulting the port to
/// [`DEFAULT_PORT`] when absent. Fails with `InvalidArgument` on empty
/// input or a `:port` suffix that doesn't parse as a `u16`.
pub fn parse_address(address: &str) -> Result<(String, u16)> {
    if address.is_empty() {
        return Err(Error::invalid_argument("address must not be empty"));
    }

    match address.rsplit_once(':') {
        Some((host, port_str)) if !host.is_empty() && !port_str.is_empty() => {
            match port_str.parse::<u16>() {
                Ok(port) => Ok((host.to_string(), port)),
                Err(_) => Err(Error::invalid_argument(format!(
                    "address '{address}' has a non-numeric port"
                ))),
            }
        }
        _ => Ok((address.to_string(), DEFAULT_PORT)),
    }
}

/// Resolve `address` to a concrete [`SocketAddr`], performing DNS
/// resolution through tokio's resolver for non-literal hosts.
async fn resolve_address(address: &str) -> Result<SocketAddr> {
    let (host, port) = parse_address(address)?;
    tokio::net::lookup_host((host.as_str(), port))
        .await
        .map_err(Error::from)?
        .next()
        .ok_or_else(|| Error::invalid_argument(format!("address '{address}' did not resolve")))
}

/// Constructs listeners and client connections, sharing one
/// [`LayerStack`] across both. `Transport::stop` is a documented no-op
/// for outstanding connections (see DESIGN.md's Open Question note);
/// callers orchestrate per-connection and per-listener shutdown
/// themselves via [`Connection::stop`] / [`Listener::stop`].
pub struct Transport<L: LayerStack + 'static> {
    layers: Arc<L>,
}

impl Transport<NoopLayerStack> {
    /// A transport with no layer stack configured: payloads pass
    /// through to the wire unmodified.
    pub fn new() -> Arc<Self> {
        Transport::with_layers(NoopLayerStack)
    }
}

impl<L: LayerStack + 'static> Transport<L> {
    pub fn with_layers(layers: L) -> Arc<Self> {
        Arc::new(Transport {
            layers: Arc::new(layers),
        })
    }

    /// Resolve `address`, open a TCP connection, and drive the client
    /// handshake to completion.
    pub async fn connect(&self, address: &str) -> Result<Arc<ClientConnection<L>>> {
        let socket_addr = resolve_address(address).await?;
        let stream = TcpStream::connect(socket_addr).await.map_err(Error::from)?;
        Connection::connect(
            stream,
            EpoxyConfig::empty(),
            Arc::new(EmptyServiceHost),
            self.layers.clone(),
        )
        .await
    }

    /// Build a (not-yet-started) listener bound to `address`. Unlike
    /// `connect`, binding needs a concrete endpoint up front, so the
    /// host part must be an IP literal — a bare hostname fails with
    /// `InvalidArgument` rather than silently picking one of several
    /// resolved addresses to bind.
    pub fn make_listener(&self, address: &str) -> Result<Arc<Listener<L>>> {
        let (host, port) = parse_address(address)?;
        let ip: std::net::IpAddr = host.parse().map_err(|_| {
            Error::invalid_argument(format!(
                "listener address '{address}' must be an IP literal, not a hostname"
            ))
        })?;
        Ok(Listener::new(SocketAddr::new(ip, port), self.layers.clone()))
    }

    /// No-op, matching the source system's `Transport.StopAsync`: this
    /// design does not track outstanding connections/listeners to
    /// close them on `stop`. See DESIGN.md.
    pub fn stop(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_defaults_to_the_well_known_port() {
        let (host, port) = parse_address("example.org").unwrap();
        assert_eq!(host, "example.org");
        assert_eq!(port, DEFAULT_PORT);
    }

    #[test]
    fn host_and_port_both_parse() {
        let (host, port) = parse_address("127.0.0.1:9000").unwrap();
        assert_eq!(host, "127.0.0.1");
        assert_eq!(port, 9000);
    }

    #[test]
    fn empty_address_is_invalid_argument() {
        assert!(matches!(parse_address(""), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn non_numeric_port_is_invalid_argument() {
        assert!(matches!(
            parse_address("example.org:http"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn make_listener_rejects_a_hostname() {
        let transport = Transport::new();
        let err = transport.make_listener("example.org:9000");
        assert!(matches!(err, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn make_listener_accepts_an_ip_literal() {
        let transport = Transport::new();
        assert!(transport.make_listener("127.0.0.1:0").is_ok());
    }
}
