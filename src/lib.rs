pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod framelet;
pub mod headers;
pub mod keepalive;
pub mod layer;
pub mod listener;
pub mod logging;
pub mod message;
pub mod response_map;
pub mod service;
pub mod transport;

pub use config::EpoxyConfig;
pub use connection::{Connection, Role};
pub use error::{Error, ErrorCode, ProtocolErrorReason, Result, RpcError};
pub use frame::Frame;
pub use framelet::{Framelet, FrameletType};
pub use headers::{Headers, PayloadKind};
pub use keepalive::{KeepAlive, KeepAliveStatus};
pub use layer::{LayerStack, NoopLayerStack};
pub use listener::{Listener, ServerConnection};
pub use logging::Severity;
pub use message::Message;
pub use response_map::{RequestId, ResponseHandle, ResponseMap};
pub use service::{EmptyServiceHost, MethodRegistry, ServiceHost};
pub use transport::{ClientConnection, Transport, DEFAULT_PORT};
