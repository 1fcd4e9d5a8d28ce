// Copyright (c) 2025 Vibe Rust Contributors
// SPDX-License-Identifier: MIT

// ! Negotiation Fallback Tests
// !
// ! Serves the vibe router behind a middleware that refuses selected
// ! transports, so the client has to fall back to the next candidate.

#![cfg(all(feature = "client", feature = "server"))]

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use vibe_rs::{
    SocketState, VibeError,
    client::{self, SocketBuilder},
    core::config::ClientConfig,
    server::VibeServer,
    transport::TransportKind,
};

const WAIT: Duration = Duration::from_secs(10);

async fn refuse_websocket(request: Request, next: Next) -> Response {
    if request
        .uri()
        .query()
        .is_some_and(|query| query.contains("transport=ws"))
    {
        return StatusCode::NOT_IMPLEMENTED.into_response();
    }
    next.run(request).await
}

async fn refuse_all_but_longpoll(request: Request, next: Next) -> Response {
    if request
        .uri()
        .query()
        .is_some_and(|query| query.contains("transport=ws") || query.contains("transport=stream"))
    {
        return StatusCode::NOT_IMPLEMENTED.into_response();
    }
    next.run(request).await
}

async fn serve(app: axum::Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

fn echo_server() -> VibeServer {
    let server = VibeServer::new("127.0.0.1:0");
    server.on_socket(|socket| {
        socket.on("ping", |data, reply| {
            if let Some(reply) = reply {
                let _ = reply.resolve(data);
            }
        });
    });
    server
}

#[tokio::test]
async fn test_falls_back_to_stream_when_websocket_refused() {
    let server = echo_server();
    let app = server.router().layer(middleware::from_fn(refuse_websocket));
    let addr = serve(app).await;

    let socket = client::open(format!("http://{addr}/vibe"), ClientConfig::default()).unwrap();
    timeout(WAIT, socket.opened()).await.unwrap().unwrap();

    assert_eq!(socket.transport_name(), Some("stream"));
    let answer = timeout(WAIT, socket.request("ping", json!("pong")))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(answer, json!("pong"));
    socket.close();
}

#[tokio::test]
async fn test_falls_back_to_longpoll_as_last_resort() {
    let server = echo_server();
    let app = server.router().layer(middleware::from_fn(refuse_all_but_longpoll));
    let addr = serve(app).await;

    let socket = client::open(format!("http://{addr}/vibe"), ClientConfig::default()).unwrap();
    timeout(WAIT, socket.opened()).await.unwrap().unwrap();

    assert_eq!(socket.transport_name(), Some("longpoll"));
    assert_eq!(server.socket_count(), 1);
    socket.close();
}

#[tokio::test]
async fn test_unresponsive_candidate_times_out() {
    // The WebSocket candidate points at a listener that accepts and never answers
    let silent = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let silent_addr = silent.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = silent.accept().await {
            held.push(stream);
        }
    });

    let server = echo_server();
    let addr = serve(server.router()).await;

    let config = ClientConfig::default()
        .with_transports(vec![TransportKind::WebSocket])
        .with_connect_timeout_ms(300);
    let exhausted = Arc::new(AtomicBool::new(false));
    let flag = exhausted.clone();
    let started = Instant::now();
    let socket = SocketBuilder::new(format!("ws://{silent_addr}/vibe"))
        .config(config)
        .on_error(move |error| {
            if matches!(error, VibeError::NegotiationExhausted(_)) {
                flag.store(true, Ordering::SeqCst);
            }
        })
        .connect()
        .unwrap();
    let outcome = timeout(WAIT, socket.opened()).await.unwrap();
    assert!(outcome.is_err());
    assert!(exhausted.load(Ordering::SeqCst));
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(socket.state(), SocketState::Closed);

    let socket = client::open(
        format!("http://{addr}/vibe"),
        ClientConfig::default().with_transports(vec![TransportKind::LongPoll]),
    )
    .unwrap();
    timeout(WAIT, socket.opened()).await.unwrap().unwrap();
    socket.close();
}

#[tokio::test]
async fn test_exhaustion_reports_error_then_close() {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let seen = errors.clone();

    let socket = SocketBuilder::new("http://127.0.0.1:1/vibe")
        .config(ClientConfig::default().with_connect_timeout_ms(500))
        .on_error(move |error| seen.lock().unwrap().push(error.to_string()))
        .connect()
        .unwrap();

    let outcome = timeout(WAIT, socket.opened()).await.unwrap();
    assert!(outcome.is_err());
    timeout(WAIT, socket.closed()).await.unwrap();
    assert_eq!(errors.lock().unwrap().len(), 1);
}
