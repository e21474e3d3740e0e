use std::sync::Arc;

use actix_web::http::header;
use actix_web::middleware::Logger;
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use anyhow::Result;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::TransportConfig;
use crate::session::{PendingError, SessionId, SessionRegistry, SessionTransport};
use crate::sse;
use crate::transport::{
    error_body, MCP_ENDPOINT_AVAILABLE_HEADER, MCP_SESSION_ID_HEADER,
};
use crate::types::ErrorCode;

/// Signals raised by the server-side adapter toward the MCP backend.
#[derive(Debug)]
pub enum ServerEvent {
    /// A session was created (SSE establishment, Streamable HTTP
    /// establishment, or an implicit direct-POST session)
    NewSession(SessionId),
    /// A parsed inbound JSON-RPC object, in per-session arrival order
    Received {
        session: SessionId,
        message: Value,
    },
}

/// Server transport speaking both MCP HTTP protocols on one listener.
///
/// The `ServerHttpTransport` runs an HTTP server that accepts connections
/// from clients using either the legacy SSE transport (`GET /sse` plus
/// `POST /messages/`) or the newer Streamable HTTP transport (`/mcp` with an
/// `Mcp-Session-Id` header). Inbound objects and session lifecycle signals
/// are delivered to the backend through the event channel returned by
/// [`ServerHttpTransport::new`]; outbound objects enter through
/// [`ServerHttpTransport::send`], which picks the wire framing from the
/// session's transport variant.
///
/// # Example
///
/// ```no_run
/// use mcp_http_transport::config::TransportConfig;
/// use mcp_http_transport::transport::{ServerEvent, ServerHttpTransport};
///
/// async fn example() {
///     let (server, mut events) = ServerHttpTransport::new(TransportConfig::default());
///     let backend = server.clone();
///     tokio::spawn(async move {
///         while let Some(event) = events.recv().await {
///             if let ServerEvent::Received { session, message } = event {
///                 // echo the request id back as an empty result
///                 if let Some(id) = message.get("id") {
///                     let reply = serde_json::json!({"jsonrpc": "2.0", "id": id, "result": {}});
///                     let _ = backend.send(session, reply);
///                 }
///             }
///         }
///     });
///     server.serve().await.expect("server failed");
/// }
/// ```
#[derive(Clone)]
pub struct ServerHttpTransport {
    registry: Arc<SessionRegistry>,
    events: mpsc::UnboundedSender<ServerEvent>,
    config: Arc<TransportConfig>,
}

impl ServerHttpTransport {
    /// Creates the transport and the backend's event receiver.
    pub fn new(config: TransportConfig) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let transport = Self {
            registry: Arc::new(SessionRegistry::new(config.pending_queue_max)),
            events,
            config: Arc::new(config),
        };
        (transport, receiver)
    }

    /// Route table shared by [`serve`](Self::serve) and test harnesses.
    pub fn service_config(&self) -> impl Fn(&mut web::ServiceConfig) + Clone + Send + 'static {
        let transport = self.clone();
        move |cfg: &mut web::ServiceConfig| {
            cfg.app_data(web::Data::new(transport.clone()))
                .route("/sse", web::get().to(sse_handler))
                .route("/messages/", web::post().to(messages_handler))
                .route("/messages", web::post().to(messages_handler))
                .service(
                    web::resource("/mcp")
                        .route(web::get().to(mcp_get_handler))
                        .route(web::head().to(mcp_head_handler))
                        .route(web::delete().to(mcp_delete_handler))
                        .route(web::post().to(mcp_post_handler)),
                )
                .route("/", web::post().to(root_post_handler))
                .default_service(web::route().to(not_found));
        }
    }

    /// Runs the HTTP server until it is shut down.
    pub async fn serve(&self) -> Result<()> {
        let configure = self.service_config();
        let server = HttpServer::new(move || {
            let configure = configure.clone();
            App::new()
                .wrap(Logger::default())
                .configure(|cfg| configure(cfg))
        })
        .bind((self.config.host.as_str(), self.config.port))?
        .run();
        info!(
            "MCP HTTP transport listening on {}:{}",
            self.config.host, self.config.port
        );
        server
            .await
            .map_err(|e| anyhow::anyhow!("Server error: {:?}", e))
    }

    /// Delivers a backend-originated object to the client of `session`.
    ///
    /// Legacy sessions receive it as an SSE `message` event; Streamable HTTP
    /// sessions pair it with the oldest pending request and complete that
    /// request's held socket. Objects that cannot be delivered (unknown
    /// session, no live stream, no pending request) are dropped with a
    /// warning and never surface as errors.
    pub fn send(&self, session: SessionId, message: Value) -> Result<()> {
        match self.registry.transport_of(session) {
            None => {
                warn!(%session, "dropping outbound message for unknown session");
            }
            Some(SessionTransport::LegacySse) => match self.registry.stream_of(session) {
                Some(stream) => {
                    debug!(%session, "writing outbound message to SSE stream");
                    stream.send(sse::event_frame("message", &message.to_string()));
                }
                None => {
                    warn!(%session, "session has no SSE stream, dropping outbound message");
                }
            },
            Some(SessionTransport::StreamableHttp) => match self.registry.pop_pending(session) {
                Some(pending) => {
                    debug!(%session, "pairing outbound message with oldest pending request");
                    if pending.responder.send(message).is_err() {
                        warn!(%session, "pending request vanished before the response was written");
                    }
                }
                None => {
                    warn!(
                        %session,
                        "no pending request for outbound message, dropping (server push unsupported)"
                    );
                }
            },
        }
        Ok(())
    }

    /// Number of live sessions, implicit included.
    pub fn active_sessions(&self) -> usize {
        self.registry.len()
    }

    fn emit(&self, event: ServerEvent) {
        if self.events.send(event).is_err() {
            warn!("backend event receiver dropped, discarding event");
        }
    }
}

/// Removes an unpaired pending entry when its handler is dropped.
///
/// actix drops the handler future when the client disconnects mid-wait, so
/// this is what keeps a vanished socket from ever being paired with a
/// backend response.
struct PendingGuard {
    registry: Arc<SessionRegistry>,
    session: SessionId,
    token: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.registry.remove_pending(self.session, self.token) {
            debug!(
                session = %self.session,
                "pending request abandoned before a response was paired"
            );
        }
    }
}

fn session_header(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get(MCP_SESSION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
}

fn accepts_event_stream(req: &HttpRequest) -> bool {
    req.headers()
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .map(|accept| accept.contains("text/event-stream"))
        .unwrap_or(false)
}

fn jsonrpc_error(code: ErrorCode, message: &str, data: Option<Value>) -> HttpResponse {
    HttpResponse::BadRequest()
        .content_type(header::ContentType::json())
        .body(error_body(code, message, data).to_string())
}

async fn not_found() -> HttpResponse {
    HttpResponse::NotFound().body("Not Found")
}

/// Handles legacy SSE establishment (`GET /sse`).
///
/// Creates a session, registers the event stream, writes the `endpoint`
/// event pointing the client at `/messages/?session_id=<id>`, and keeps the
/// socket open with periodic keepalive comments until the client goes away.
pub async fn sse_handler(
    req: HttpRequest,
    transport: web::Data<ServerHttpTransport>,
) -> HttpResponse {
    if !accepts_event_stream(&req) {
        warn!(headers = ?req.headers(), "SSE establishment without text/event-stream accept");
        return HttpResponse::BadRequest().body("Accept: text/event-stream required");
    }

    let session = SessionId::generate();
    let registry = transport.registry.clone();
    let (handle, stream) = sse::sse_channel(
        transport.config.write_highwater_bytes,
        Box::new(move || {
            if registry.remove(session).is_some() {
                debug!(%session, "SSE stream closed, session removed");
            }
        }),
    );

    // the endpoint event is the first thing on the wire after the headers
    handle.send(sse::event_frame(
        "endpoint",
        &format!("/messages/?session_id={session}"),
    ));
    transport.registry.insert_legacy(session, handle.clone());
    transport.emit(ServerEvent::NewSession(session));
    info!(%session, "legacy SSE session established");

    let interval = transport.config.sse_keepalive_interval;
    actix_web::rt::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if handle.is_closed() {
                break;
            }
            handle.send(Bytes::from_static(sse::KEEPALIVE_FRAME));
        }
    });

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header((header::CONNECTION, "keep-alive"))
        .streaming(stream)
}

#[derive(Deserialize)]
struct MessagesQuery {
    session_id: Option<String>,
}

/// Handles legacy message ingest (`POST /messages/?session_id=<id>`).
pub async fn messages_handler(
    query: web::Query<MessagesQuery>,
    body: web::Bytes,
    transport: web::Data<ServerHttpTransport>,
) -> HttpResponse {
    let Some(raw) = query.session_id.as_deref() else {
        warn!("legacy ingest without session_id query parameter");
        return HttpResponse::BadRequest().body("session_id query parameter required");
    };
    let Ok(session) = raw.parse::<SessionId>() else {
        warn!(session_id = raw, "legacy ingest with unparseable session id");
        return HttpResponse::BadRequest().body("invalid session_id");
    };
    if transport.registry.transport_of(session) != Some(SessionTransport::LegacySse) {
        warn!(%session, "legacy ingest for unknown session");
        return HttpResponse::BadRequest().body("unknown session");
    }

    match serde_json::from_slice::<Value>(&body) {
        Ok(message) if message.is_object() => {
            transport.emit(ServerEvent::Received { session, message });
        }
        _ => warn!(%session, body = ?body, "error parsing message body"),
    }

    // vestigial acknowledgement kept for wire compatibility
    HttpResponse::Ok()
        .content_type(header::ContentType::plaintext())
        .body("Accept")
}

/// Handles Streamable HTTP session establishment (`GET /mcp`).
pub async fn mcp_get_handler(
    req: HttpRequest,
    transport: web::Data<ServerHttpTransport>,
) -> HttpResponse {
    if accepts_event_stream(&req) {
        // server-initiated streams are not part of this revision
        return HttpResponse::MethodNotAllowed().body("event streams not supported on /mcp");
    }

    let (session, minted) = match session_header(&req) {
        Some(raw) => match raw.parse::<SessionId>() {
            // only a streamable session can be echoed; a legacy id is as
            // stale as an unknown one here
            Ok(id) if transport.registry.transport_of(id)
                == Some(SessionTransport::StreamableHttp) =>
            {
                (id, false)
            }
            Ok(stale) => {
                debug!(%stale, "stale session id on establishment, minting fresh");
                (SessionId::generate(), true)
            }
            Err(_) => {
                debug!(session_id = raw, "malformed session id on establishment, minting fresh");
                (SessionId::generate(), true)
            }
        },
        None => (SessionId::generate(), true),
    };

    if minted {
        transport.registry.insert_streamable(session);
        transport.emit(ServerEvent::NewSession(session));
        info!(%session, "streamable HTTP session established");
    }

    HttpResponse::NoContent()
        .insert_header((MCP_SESSION_ID_HEADER, session.to_string()))
        .insert_header((header::CONNECTION, "keep-alive"))
        .finish()
}

/// Handles the connectivity probe (`HEAD /mcp`).
pub async fn mcp_head_handler() -> HttpResponse {
    HttpResponse::Ok()
        .insert_header((MCP_ENDPOINT_AVAILABLE_HEADER, "true"))
        .finish()
}

/// Handles session termination (`DELETE /mcp`).
///
/// Draining the pending queue drops each held responder, which releases the
/// corresponding socket with a connection-close answer.
pub async fn mcp_delete_handler(
    req: HttpRequest,
    transport: web::Data<ServerHttpTransport>,
) -> HttpResponse {
    let Some(raw) = session_header(&req) else {
        return HttpResponse::BadRequest().body("Mcp-Session-Id header required");
    };
    let Ok(session) = raw.parse::<SessionId>() else {
        return HttpResponse::BadRequest().body("invalid Mcp-Session-Id");
    };

    match transport.registry.remove(session) {
        Some(pending) => {
            if !pending.is_empty() {
                debug!(%session, count = pending.len(), "dropping pending requests of terminated session");
            }
            info!(%session, "session terminated");
        }
        None => debug!(%session, "delete for unknown session"),
    }

    HttpResponse::Ok()
        .insert_header((MCP_SESSION_ID_HEADER, session.to_string()))
        .finish()
}

/// Handles Streamable HTTP ingest (`POST /mcp`).
pub async fn mcp_post_handler(
    req: HttpRequest,
    body: web::Bytes,
    transport: web::Data<ServerHttpTransport>,
) -> HttpResponse {
    streamable_post(&transport, &req, &body).await
}

/// Handles `POST /`: new-protocol when the session header is present,
/// otherwise the legacy implicit-session path for clients that never opened
/// an SSE stream.
pub async fn root_post_handler(
    req: HttpRequest,
    body: web::Bytes,
    transport: web::Data<ServerHttpTransport>,
) -> HttpResponse {
    if session_header(&req).is_some() {
        return streamable_post(&transport, &req, &body).await;
    }

    let (session, created) = transport.registry.root_fallback_session();
    if created {
        debug!(%session, "created implicit session for direct POST");
        transport.emit(ServerEvent::NewSession(session));
    }

    match serde_json::from_slice::<Value>(&body) {
        Ok(message) if message.is_object() => {
            debug!(%session, "root POST forwarded");
            transport.emit(ServerEvent::Received { session, message });
        }
        _ => warn!(body = ?body, "error parsing root POST body"),
    }

    HttpResponse::Ok()
        .content_type(header::ContentType::plaintext())
        .body("Accept")
}

async fn streamable_post(
    transport: &ServerHttpTransport,
    req: &HttpRequest,
    body: &[u8],
) -> HttpResponse {
    let Some(raw) = session_header(req) else {
        return jsonrpc_error(
            ErrorCode::InvalidRequest,
            "Missing Mcp-Session-Id header",
            None,
        );
    };
    let Ok(session) = raw.parse::<SessionId>() else {
        return jsonrpc_error(
            ErrorCode::InvalidRequest,
            "Invalid Mcp-Session-Id format",
            None,
        );
    };
    // the id must name a streamable session; a legacy id would enqueue a
    // pending request no outbound dispatch could ever answer
    if transport.registry.transport_of(session) != Some(SessionTransport::StreamableHttp) {
        return jsonrpc_error(
            ErrorCode::InvalidRequest,
            "Session not found",
            Some(json!({
                "sessionId": session.to_string(),
                "reason": "session_not_found",
            })),
        );
    }

    let message = match serde_json::from_slice::<Value>(body) {
        Ok(message) if message.is_object() => message,
        _ => {
            warn!(%session, "invalid JSON in POST body");
            return HttpResponse::BadRequest()
                .content_type(header::ContentType::json())
                .body(json!({"error": "Invalid JSON"}).to_string());
        }
    };

    if message.get("id").is_none() {
        // notification: acknowledge right away, then hand off
        transport.emit(ServerEvent::Received { session, message });
        return HttpResponse::Accepted()
            .insert_header((MCP_SESSION_ID_HEADER, session.to_string()))
            .finish();
    }

    // request: take custody of the socket until the backend answers; the
    // enqueue and the backend hand-off happen under one lock so queue
    // position matches delivery order
    let (responder, response) = oneshot::channel();
    let enqueued = transport.registry.push_pending_then(session, responder, || {
        transport.emit(ServerEvent::Received { session, message });
    });
    let token = match enqueued {
        Ok(token) => token,
        Err(PendingError::QueueFull) => {
            warn!(%session, "pending request queue full");
            return HttpResponse::ServiceUnavailable().body("pending request queue full");
        }
        Err(PendingError::UnknownSession) => {
            // lost a race with DELETE
            return jsonrpc_error(
                ErrorCode::InvalidRequest,
                "Session not found",
                Some(json!({
                    "sessionId": session.to_string(),
                    "reason": "session_not_found",
                })),
            );
        }
    };
    let _guard = PendingGuard {
        registry: transport.registry.clone(),
        session,
        token,
    };

    let outcome = match transport.config.pending_timeout {
        Some(limit) => match tokio::time::timeout(limit, response).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(%session, "backend silent past pending timeout");
                return HttpResponse::GatewayTimeout()
                    .insert_header((MCP_SESSION_ID_HEADER, session.to_string()))
                    .content_type(header::ContentType::json())
                    .body(
                        error_body(ErrorCode::RequestTimeout, "Backend did not respond", None)
                            .to_string(),
                    );
            }
        },
        None => response.await,
    };

    match outcome {
        Ok(message) => HttpResponse::Ok()
            .insert_header((MCP_SESSION_ID_HEADER, session.to_string()))
            .insert_header((header::CONNECTION, "keep-alive"))
            .content_type(header::ContentType::json())
            .body(message.to_string()),
        Err(_) => {
            // session torn down while the request was held; release the socket
            debug!(%session, "held request released by session teardown");
            HttpResponse::ServiceUnavailable()
                .insert_header((header::CONNECTION, "close"))
                .content_type(header::ContentType::json())
                .body(error_body(ErrorCode::ConnectionClosed, "Session terminated", None).to_string())
        }
    }
}
