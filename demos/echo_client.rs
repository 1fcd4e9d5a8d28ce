// ! # Vibe Echo Client
// !
// ! Opens a socket against the echo server, letting the negotiator pick the
// ! first transport that works, then sends a few chat lines and a request.
// !
// ! Run with `cargo run --example echo_client -- http://127.0.0.1:8080/vibe [ws,stream,longpoll]`.

use std::time::Duration;
use vibe_rs::client::SocketBuilder;
use vibe_rs::core::logging::init_tracing;
use vibe_rs::prelude::*;

#[tokio::main]
async fn main() -> VibeResult<()> {
    init_tracing("info");

    let mut args = std::env::args().skip(1);
    let uri = args
        .next()
        .unwrap_or_else(|| "http://127.0.0.1:8080/vibe".to_string());

    let mut config = ClientConfig::default();
    if let Some(list) = args.next() {
        let transports = list
            .split(',')
            .map(|name| {
                TransportKind::from_name(name)
                    .ok_or_else(|| VibeError::UnsupportedTransport(name.to_string()))
            })
            .collect::<VibeResult<Vec<_>>>()?;
        config = config.with_transports(transports);
    }

    let socket = SocketBuilder::new(uri)
        .config(config)
        .on("chat", |data, _reply| println!("< {data}"))
        .on_error(|error| eprintln!("! {error}"))
        .on_close(|| println!("connection closed"))
        .connect()?;

    socket.opened().await?;
    println!(
        "Connected as {} over {}",
        socket.id(),
        socket.transport_name().unwrap_or("?")
    );

    for line in ["hello", "from", "vibe"] {
        println!("> {line}");
        socket.send("chat", json!(line))?;
    }

    let uptime = socket.request("time", Value::Null).await?;
    println!("server uptime: {uptime}");

    tokio::time::sleep(Duration::from_millis(500)).await;
    socket.close();
    socket.closed().await;
    Ok(())
}
