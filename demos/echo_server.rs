// ! # Vibe Echo Server
// !
// ! Accepts sockets on every transport and echoes `chat` events back to the
// ! sender. `time` requests are answered with the server's uptime.
// !
// ! Run with `cargo run --example echo_server -- 127.0.0.1:8080`, then point
// ! `echo_client` at `http://127.0.0.1:8080/vibe`.

use std::time::Instant;
use vibe_rs::core::logging::init_tracing;
use vibe_rs::prelude::*;

#[tokio::main]
async fn main() -> VibeResult<()> {
    init_tracing("info,vibe_rs=debug");

    let bind_addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:8080".to_string());
    let started = Instant::now();

    let mut server = VibeServer::with_config(bind_addr, ServerConfig::default());
    server.on_socket(move |socket| {
        println!(
            "+ socket {} over {}",
            socket.id(),
            socket.transport_name().unwrap_or("?")
        );

        let echo = socket.clone();
        socket.on("chat", move |data, _reply| {
            if let Err(e) = echo.send("chat", data) {
                eprintln!("echo failed: {e}");
            }
        });
        socket.on("time", move |_data, reply| {
            if let Some(reply) = reply {
                let _ = reply.resolve(json!({ "uptime_ms": started.elapsed().as_millis() as u64 }));
            }
        });

        let id = socket.id();
        socket.on_close(move || println!("- socket {id} closed"));
    });

    let addr = server.start().await?;
    println!("Echo server listening on http://{addr}{}", server.config().path);
    println!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    server.stop().await
}
