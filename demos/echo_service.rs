//! Minimal end-to-end demo: start a listener with one registered
//! "Echo" method, connect a client, send a request, print the
//! response, then shut both sides down.
//!
//! Run with `cargo run --example echo_service`.

use bytes::Bytes;
use epoxy::Transport;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let transport = Transport::new();

    let listener = transport.make_listener("127.0.0.1:0")?;
    listener.add_service("Echo", |message| async move { message });
    listener.on_disconnected(|conn, error| {
        tracing::info!(remote = %conn.remote_addr(), ?error, "client disconnected");
    });
    listener.start().await?;

    let endpoint = listener.listen_endpoint().expect("listener reports its bound port");
    println!("listening on {endpoint}");

    let client = transport.connect(&endpoint.to_string()).await?;
    let reply = client.send_request("Echo", Bytes::from_static(b"hello, epoxy")).await?;
    println!("received: {:?}", reply.payload());

    client.stop().await?;
    listener.stop().await;
    Ok(())
}
