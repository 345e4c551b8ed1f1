//! Two engines wired back to back over an in-memory pipe.
//!
//! The "client" masks its frames, the "server" echoes every data frame it
//! receives. The client sends a few messages, reads the echoes and closes.
//!
//! Run with `RUST_LOG=hpx_ws_engine=trace` to follow the frames.

use std::time::Duration;

use hpx_ws_engine::{CloseResult, Connection, ConnectionOptions, Frame, OpCode};
use tokio::{io::duplex, sync::mpsc};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> hpx_ws_engine::Result<()> {
    tracing_subscriber::fmt::init();

    let (client_reader, server_writer) = duplex(64 * 1024);
    let (server_reader, client_writer) = duplex(64 * 1024);
    let cancel = CancellationToken::new();

    let server = Connection::new(
        server_reader,
        server_writer,
        Some("echo".into()),
        ConnectionOptions::default(),
    );
    let client = Connection::new(
        client_reader,
        client_writer,
        Some("echo".into()),
        ConnectionOptions::default()
            .with_random_mask()
            .with_ping_interval(Duration::from_secs(15)),
    );

    // Server: echo data frames as they come.
    let (server_tx, mut server_rx) = mpsc::channel::<Frame>(16);
    let server_done = tokio::spawn(server.execute(server_tx, cancel.clone())?);
    let echo = {
        let server = server.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            while let Some(frame) = server_rx.recv().await {
                if let Err(err) = server.send(frame.copy(), &cancel).await {
                    tracing::warn!("echo failed: {err}");
                }
            }
        })
    };

    // Client: send, read back, close.
    let (client_tx, mut client_rx) = mpsc::unbounded_channel::<Frame>();
    let client_done = tokio::spawn(client.execute(client_tx, cancel.clone())?);

    client.send(Frame::text("Hello, WebSocket!"), &cancel).await?;
    client.send(Frame::binary(vec![0xDE, 0xAD, 0xBE, 0xEF]), &cancel).await?;
    client.send(Frame::text("Hel").with_fin(false), &cancel).await?;
    client.send(Frame::continuation("lo").with_fin(false), &cancel).await?;
    client.send(Frame::continuation("!"), &cancel).await?;

    for _ in 0..5 {
        let Some(frame) = client_rx.recv().await else {
            break;
        };
        match frame.opcode() {
            OpCode::Binary => println!("echo: {:02X?} (fin={})", frame.payload().as_ref(), frame.is_fin()),
            _ => println!("echo: {:?} (fin={})", frame.as_str().unwrap_or("<invalid>"), frame.is_fin()),
        }
    }

    client.close(CloseResult::normal(), &cancel).await?;

    let client_result = client_done.await.expect("client receive loop");
    let server_result = server_done.await.expect("server receive loop");
    let _ = echo.await;

    println!("client closed: {client_result}");
    println!("server closed: {server_result}");
    Ok(())
}
