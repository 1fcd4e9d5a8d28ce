// ! Vibe server
// !
// ! Serves every transport on a single route. GET requests open channels
// ! (`when=open`), carry long polls (`when=poll`) and aborts
// ! (`when=abort`), or upgrade to WebSocket; POST requests deliver upstream
// ! frames to the HTTP transport named by `id`.

use axum::{
    Router,
    body::{Body, Bytes},
    extract::{
        RawQuery, State,
        ws::{WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::{
        HeaderMap, HeaderValue, Method, StatusCode,
        header::{ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONTENT_TYPE, EXPIRES, PRAGMA},
    },
    response::{IntoResponse, Response},
    routing::any,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{debug, info};

use crate::core::config::ServerConfig;
use crate::core::error::{VibeError, VibeResult};
use crate::core::logging::ErrorContext;
use crate::longpoll::parse_ack;
use crate::protocol::codec::{encode_jsonp, encode_longpoll_frame};
use crate::protocol::handshake::Handshake;
use crate::protocol::names::{
    BINARY_CONTENT_TYPE, EVENT_STREAM_CONTENT_TYPE, JAVASCRIPT_CONTENT_TYPE, PARAM_ACK_TIMEOUT,
    PARAM_CALLBACK, PARAM_HEARTBEAT, PARAM_ID, PARAM_JSONP, PARAM_SSE, PARAM_TRANSPORT,
    PARAM_WHEN, POST_DATA_PREFIX, TEXT_CONTENT_TYPE, WHEN_ABORT, WHEN_OPEN, WHEN_POLL,
};
use crate::server::longpoll::{LongpollServerTransport, PollReply};
use crate::server::registry::{HttpTransportEntry, RegisteredSocket, SocketRegistry};
use crate::server::stream::StreamServerTransport;
use crate::server::websocket::WebSocketServerTransport;
use crate::socket::{HeartbeatPolicy, Socket};
use crate::transport::traits::{Frame, Transport, TransportEvents, TransportKind};
use crate::utils::uri::parse_query_string;

type SocketHandler = Arc<dyn Fn(Socket) + Send + Sync>;

/// State shared by every exchange
pub(crate) struct ServerShared {
    config: ServerConfig,
    registry: Arc<SocketRegistry>,
    socket_handlers: RwLock<Vec<SocketHandler>>,
}

/// Vibe server accepting WebSocket, HTTP streaming and long-polling sockets
pub struct VibeServer {
    bind_addr: String,
    shared: Arc<ServerShared>,
    server_handle: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl VibeServer {
    /// Create a new server
    ///
    /// # Arguments
    /// * `bind_addr` - Address to bind to (e.g., "0.0.0.0:8080", or port 0 for any)
    pub fn new<S: Into<String>>(bind_addr: S) -> Self {
        Self::with_config(bind_addr, ServerConfig::default())
    }

    /// Create a new server with custom configuration
    pub fn with_config<S: Into<String>>(bind_addr: S, config: ServerConfig) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            shared: Arc::new(ServerShared {
                config,
                registry: Arc::new(SocketRegistry::new()),
                socket_handlers: RwLock::new(Vec::new()),
            }),
            server_handle: None,
            local_addr: None,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Register a handler invoked for every accepted socket before it dispatches events
    pub fn on_socket<F>(&self, handler: F)
    where
        F: Fn(Socket) + Send + Sync + 'static,
    {
        self.shared
            .socket_handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(handler));
    }

    /// Router serving the configured path, for mounting into a larger axum app
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([CONTENT_TYPE]);

        Router::new()
            .route(&self.shared.config.path, any(handle_exchange))
            .layer(
                ServiceBuilder::new()
                    .layer(SetResponseHeaderLayer::overriding(
                        CACHE_CONTROL,
                        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
                    ))
                    .layer(SetResponseHeaderLayer::overriding(
                        PRAGMA,
                        HeaderValue::from_static("no-cache"),
                    ))
                    .layer(SetResponseHeaderLayer::overriding(
                        EXPIRES,
                        HeaderValue::from_static("0"),
                    ))
                    .layer(SetResponseHeaderLayer::if_not_present(
                        ACCESS_CONTROL_ALLOW_ORIGIN,
                        HeaderValue::from_static("*"),
                    ))
                    .layer(cors),
            )
            .with_state(self.shared.clone())
    }

    /// Bind and serve in the background, returning the bound address
    pub async fn start(&mut self) -> VibeResult<SocketAddr> {
        if let Some(addr) = self.local_addr.filter(|_| self.is_running()) {
            return Ok(addr);
        }
        self.shared.config.validate()?;
        info!("Starting vibe server on {}", self.bind_addr);

        let listener = tokio::net::TcpListener::bind(&self.bind_addr)
            .await
            .map_err(|e| VibeError::transport(format!("Failed to bind to {}: {e}", self.bind_addr)))?;
        let local_addr = listener.local_addr()?;
        let app = self.router();

        let server_handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Vibe server error: {}", e);
            }
        });

        self.server_handle = Some(server_handle);
        self.local_addr = Some(local_addr);

        info!(
            "Vibe server listening on {}{}",
            local_addr, self.shared.config.path
        );
        Ok(local_addr)
    }

    /// Close every socket and stop serving
    pub async fn stop(&mut self) -> VibeResult<()> {
        info!("Stopping vibe server");

        for socket in self.shared.registry.sockets() {
            socket.close();
        }
        if let Some(handle) = self.server_handle.take() {
            handle.abort();
        }
        self.local_addr = None;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.server_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Number of live sockets
    pub fn socket_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Live socket with `id`
    pub fn socket(&self, id: &str) -> Option<Socket> {
        self.shared.registry.socket(id)
    }
}

impl std::fmt::Debug for VibeServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VibeServer")
            .field("bind_addr", &self.bind_addr)
            .field("config", &self.shared.config)
            .field("local_addr", &self.local_addr)
            .field("sockets", &self.socket_count())
            .finish()
    }
}

/// Heartbeat announced to one socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SessionHeartbeat {
    heartbeat_ms: Option<u64>,
    ack_timeout_ms: u64,
}

impl SessionHeartbeat {
    fn handshake(&self, id: &str) -> String {
        Handshake::new(id, self.heartbeat_ms, self.ack_timeout_ms).encode()
    }

    fn policy(&self) -> HeartbeatPolicy {
        match self.heartbeat_ms {
            Some(interval) => HeartbeatPolicy::Responder {
                interval: Duration::from_millis(interval),
            },
            None => HeartbeatPolicy::Disabled,
        }
    }
}

impl ServerShared {
    /// Heartbeat requested on the open exchange, or the configured one when
    /// the request asks for nothing usable
    fn session_heartbeat(&self, params: &HashMap<String, String>) -> SessionHeartbeat {
        let mut config = self.config.clone();
        let requested = [PARAM_HEARTBEAT, PARAM_ACK_TIMEOUT]
            .into_iter()
            .filter_map(|key| params.get(key).map(|value| (key, value)))
            .try_for_each(|(key, value)| config.apply_option(key, value))
            .and_then(|_| config.validate());
        if let Err(e) = requested {
            debug!("Ignoring requested heartbeat: {}", e);
            config = self.config.clone();
        }
        SessionHeartbeat {
            heartbeat_ms: config.heartbeat_ms,
            ack_timeout_ms: config.ack_timeout_ms,
        }
    }

    /// Register the socket, run the socket handlers and start dispatching
    fn spawn_socket(
        &self,
        id: String,
        transport: Arc<dyn Transport>,
        events: TransportEvents,
        http: Option<HttpTransportEntry>,
        heartbeat: SessionHeartbeat,
    ) -> Socket {
        let name = transport.name();
        let socket = Socket::from_transport(id.clone(), transport, events, heartbeat.policy());
        self.registry.insert(
            id.clone(),
            RegisteredSocket {
                socket: socket.clone(),
                http,
            },
        );

        let registry: Weak<SocketRegistry> = Arc::downgrade(&self.registry);
        let key = id.clone();
        let linger = Duration::from_millis(self.config.disconnect_grace_ms);
        socket.on_close(move || {
            if let Some(registry) = registry.upgrade() {
                registry.retire(&key, linger);
            }
        });

        info!("Accepted {} socket {}", name, id);
        let handlers = self
            .socket_handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in handlers {
            handler(socket.clone());
        }

        socket.start();
        socket
    }

    async fn accept_websocket(self: Arc<Self>, ws: WebSocket, heartbeat: SessionHeartbeat) {
        let id = uuid::Uuid::new_v4().to_string();
        match WebSocketServerTransport::accept(ws, &heartbeat.handshake(&id)).await {
            Ok((transport, events)) => {
                self.spawn_socket(id, transport, events, None, heartbeat);
            }
            Err(e) => e.log_with_context(
                ErrorContext::new("websocket accept")
                    .with_transport("ws")
                    .with_socket_id(id),
            ),
        }
    }

    fn open_http(&self, params: &HashMap<String, String>) -> Response {
        let requested = params.get(PARAM_TRANSPORT).map(String::as_str).unwrap_or("");
        let kind = match TransportKind::from_name(requested) {
            Some(kind @ (TransportKind::Stream | TransportKind::LongPoll)) => kind,
            _ => {
                debug!("Rejecting open for transport '{}'", requested);
                return StatusCode::NOT_IMPLEMENTED.into_response();
            }
        };

        let id = uuid::Uuid::new_v4().to_string();
        let heartbeat = self.session_heartbeat(params);
        let handshake = heartbeat.handshake(&id);

        match kind {
            TransportKind::Stream => {
                let (transport, events, body) =
                    StreamServerTransport::open(&handshake, self.config.padding_bytes);
                let sse = is_true(params.get(PARAM_SSE)) || requested.eq_ignore_ascii_case("sse");
                self.spawn_socket(
                    id,
                    transport.clone(),
                    events,
                    Some(HttpTransportEntry::Stream(transport)),
                    heartbeat,
                );
                let content_type = if sse {
                    EVENT_STREAM_CONTENT_TYPE
                } else {
                    TEXT_CONTENT_TYPE
                };
                with_content_type(StatusCode::OK, content_type, body)
            }
            _ => {
                let callback = is_true(params.get(PARAM_JSONP))
                    .then(|| params.get(PARAM_CALLBACK).cloned())
                    .flatten();
                let body = match render_body(callback.as_deref(), handshake) {
                    Ok(body) => body,
                    Err(e) => {
                        e.log_error("long-poll open");
                        return StatusCode::BAD_REQUEST.into_response();
                    }
                };
                let (transport, events) = LongpollServerTransport::open(
                    id.clone(),
                    Duration::from_millis(self.config.poll_timeout_ms),
                    Duration::from_millis(self.config.disconnect_grace_ms),
                    callback.clone(),
                );
                self.spawn_socket(
                    id,
                    transport.clone(),
                    events,
                    Some(HttpTransportEntry::LongPoll(transport)),
                    heartbeat,
                );
                with_content_type(StatusCode::OK, longpoll_content_type(&callback), Body::from(body))
            }
        }
    }

    async fn poll(&self, params: &HashMap<String, String>) -> Response {
        let id = params.get(PARAM_ID).map(String::as_str).unwrap_or("");
        let Some(HttpTransportEntry::LongPoll(transport)) = self.registry.http(id) else {
            VibeError::UnknownSocket(id.to_string()).log_with_context(
                ErrorContext::new("long-poll poll")
                    .with_transport("longpoll")
                    .with_socket_id(id),
            );
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        };

        let callback = transport.jsonp_callback().map(str::to_string);
        let body = match transport.poll(parse_ack(params)).await {
            PollReply::Idle => return StatusCode::NO_CONTENT.into_response(),
            PollReply::Close => String::new(),
            PollReply::Frame(message_id, data) => encode_longpoll_frame(message_id, &data),
        };
        match render_body(callback.as_deref(), body) {
            Ok(body) => with_content_type(
                StatusCode::OK,
                longpoll_content_type(&callback),
                Body::from(body),
            ),
            Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
    }

    fn abort(&self, params: &HashMap<String, String>) -> Response {
        if let Some(socket) = params.get(PARAM_ID).and_then(|id| self.registry.socket(id)) {
            debug!("Client aborted socket {}", socket.id());
            socket.close();
        }
        with_content_type(StatusCode::OK, JAVASCRIPT_CONTENT_TYPE, Body::empty())
    }

    fn deliver(&self, params: &HashMap<String, String>, headers: &HeaderMap, body: Bytes) -> Response {
        let id = params.get(PARAM_ID).map(String::as_str).unwrap_or("");
        let Some(entry) = self.registry.http(id) else {
            VibeError::UnknownSocket(id.to_string())
                .log_with_context(ErrorContext::new("upstream delivery").with_socket_id(id));
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        };

        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");

        let frame = if content_type.starts_with("text/plain") {
            match String::from_utf8(body.to_vec()) {
                Ok(text) => {
                    let text = match text.strip_prefix(POST_DATA_PREFIX) {
                        Some(data) => data.to_string(),
                        None => text,
                    };
                    Ok(Frame::Text(text))
                }
                Err(e) => Err(VibeError::malformed(format!("POST body is not UTF-8: {e}"))),
            }
        } else if content_type.starts_with(BINARY_CONTENT_TYPE) {
            Ok(Frame::Binary(body))
        } else {
            Err(VibeError::protocol(format!(
                "unsupported POST content type '{content_type}'"
            )))
        };

        match frame {
            Ok(frame) => {
                entry.deliver(frame);
                StatusCode::OK.into_response()
            }
            Err(e) => {
                entry.fail(e);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

async fn handle_exchange(
    State(shared): State<Arc<ServerShared>>,
    method: Method,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    body: Bytes,
) -> Response {
    let params = parse_query_string(query.as_deref().unwrap_or(""));

    match method {
        Method::GET => {
            if let Ok(ws) = ws {
                let heartbeat = shared.session_heartbeat(&params);
                return ws.on_upgrade(move |socket| shared.accept_websocket(socket, heartbeat));
            }
            match params.get(PARAM_WHEN).map(String::as_str) {
                Some(WHEN_OPEN) => shared.open_http(&params),
                Some(WHEN_POLL) => shared.poll(&params).await,
                Some(WHEN_ABORT) => shared.abort(&params),
                other => {
                    debug!("Unsupported when={:?}", other);
                    StatusCode::NOT_IMPLEMENTED.into_response()
                }
            }
        }
        Method::POST => shared.deliver(&params, &headers, body),
        Method::OPTIONS => StatusCode::OK.into_response(),
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

fn is_true(value: Option<&String>) -> bool {
    value.is_some_and(|value| value.eq_ignore_ascii_case("true"))
}

fn render_body(callback: Option<&str>, body: String) -> VibeResult<String> {
    match callback {
        Some(callback) => encode_jsonp(callback, &body),
        None => Ok(body),
    }
}

fn longpoll_content_type(callback: &Option<String>) -> &'static str {
    if callback.is_some() {
        JAVASCRIPT_CONTENT_TYPE
    } else {
        TEXT_CONTENT_TYPE
    }
}

fn with_content_type(status: StatusCode, content_type: &'static str, body: Body) -> Response {
    (
        status,
        [(
            CONTENT_TYPE,
            HeaderValue::from_static(content_type),
        )],
        body,
    )
        .into_response()
}
