use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context as _, Result};
use futures::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION, CACHE_CONTROL};
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use url::Url;

use crate::session::SessionId;
use crate::sse::{SseFrame, SseParser};
use crate::transport::{JsonRpcRequest, MCP_SESSION_ID_HEADER};

/// Signals raised by the client-side adapter.
#[derive(Debug)]
pub enum ClientEvent {
    /// Negotiation finished; the transport can send
    Started,
    /// A JSON-RPC object arrived from the server
    Received(Value),
    /// The server closed the event stream
    Finished,
    /// A transport-level failure (connection, TLS, stream errors)
    TransportError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProtocolMode {
    Streamable,
    Legacy,
}

#[derive(Default)]
struct ClientState {
    mode: Option<ProtocolMode>,
    session: Option<SessionId>,
    endpoint: Option<Url>,
}

/// Client transport that talks to an MCP server over HTTP.
///
/// On [`start`](ClientHttpTransport::start) the transport probes the server
/// for Streamable HTTP support and falls back to the legacy SSE protocol
/// when the probe is rejected. Inbound objects and lifecycle signals arrive
/// on the event channel returned by the builder; outbound objects go through
/// [`send`](ClientHttpTransport::send) and
/// [`notify`](ClientHttpTransport::notify).
///
/// # Example
///
/// ```no_run
/// use mcp_http_transport::transport::{ClientEvent, ClientHttpTransport};
///
/// async fn example() {
///     let (client, mut events) = ClientHttpTransport::builder("http://localhost:3000")
///         .with_header("User-Agent", "my-mcp-client")
///         .build()
///         .expect("valid server url");
///     client.start().await.expect("negotiation failed");
///     while let Some(event) = events.recv().await {
///         if let ClientEvent::Received(object) = event {
///             println!("server says: {object}");
///         }
///     }
/// }
/// ```
#[derive(Clone)]
pub struct ClientHttpTransport {
    http: reqwest::Client,
    base: Url,
    headers: HashMap<String, String>,
    bearer_token: Option<String>,
    state: Arc<Mutex<ClientState>>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

/// Builder for configuring and creating [`ClientHttpTransport`] instances.
pub struct ClientHttpTransportBuilder {
    url: String,
    bearer_token: Option<String>,
    headers: HashMap<String, String>,
    accept_invalid_certs: bool,
}

impl ClientHttpTransportBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            bearer_token: None,
            headers: HashMap::new(),
            accept_invalid_certs: false,
        }
    }

    /// Adds a bearer token sent as `Authorization: Bearer {token}`.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Adds a custom header to every outgoing request.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// TLS policy knob: proceed past invalid certificates instead of
    /// failing the connection. Off by default.
    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Builds the transport and the event receiver for its signals.
    pub fn build(
        self,
    ) -> Result<(ClientHttpTransport, mpsc::UnboundedReceiver<ClientEvent>)> {
        let base = Url::parse(&self.url).context("invalid server url")?;
        if self.accept_invalid_certs {
            warn!("TLS certificate validation disabled for MCP transport");
        }
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .build()?;
        let (events, receiver) = mpsc::unbounded_channel();
        Ok((
            ClientHttpTransport {
                http,
                base,
                headers: self.headers,
                bearer_token: self.bearer_token,
                state: Arc::new(Mutex::new(ClientState::default())),
                events,
            },
            receiver,
        ))
    }
}

impl ClientHttpTransport {
    /// Creates a new builder for the given server URL.
    pub fn builder(url: impl Into<String>) -> ClientHttpTransportBuilder {
        ClientHttpTransportBuilder::new(url)
    }

    /// Negotiates the wire protocol with the server.
    ///
    /// Probes `POST <base>/mcp` first; an HTTP success carrying a
    /// well-formed `Mcp-Session-Id` header selects the Streamable HTTP
    /// transport. Anything else falls back to the legacy SSE protocol.
    /// `Started` is signalled once a message endpoint is known — immediately
    /// for the new protocol, on the `endpoint` event for the legacy one.
    pub async fn start(&self) -> Result<()> {
        let probe_url = self.url_with_path("/mcp");
        debug!(%probe_url, "probing for streamable HTTP support");

        let probe = JsonRpcRequest {
            id: 0,
            method: "ping".to_string(),
            params: None,
            jsonrpc: Default::default(),
        };
        let request = self.apply_headers(self.http.post(probe_url.clone())).json(&probe);

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                let session = response
                    .headers()
                    .get(MCP_SESSION_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.parse::<SessionId>().ok());
                if let Some(session) = session {
                    debug!(%session, "server speaks streamable HTTP");
                    let mut state = self.state.lock().await;
                    state.mode = Some(ProtocolMode::Streamable);
                    state.session = Some(session);
                    state.endpoint = Some(probe_url);
                    drop(state);
                    self.emit(ClientEvent::Started);
                    return Ok(());
                }
                debug!("probe response carries no usable session id, falling back to SSE");
            }
            Ok(response) => {
                debug!(status = %response.status(), "probe rejected, falling back to SSE");
            }
            Err(e) => {
                debug!(error = %e, "probe failed, falling back to SSE");
            }
        }

        self.fallback_to_legacy().await
    }

    /// Sends a JSON-RPC object over the negotiated transport.
    ///
    /// Streamable HTTP: the POST response body carries the paired JSON-RPC
    /// response (or an empty ack for notifications) and is surfaced as a
    /// `Received` event. Legacy SSE: fire-and-forget; responses arrive on
    /// the event stream instead.
    pub async fn send(&self, object: Value) -> Result<()> {
        let (mode, session, endpoint) = {
            let state = self.state.lock().await;
            (state.mode, state.session, state.endpoint.clone())
        };
        let Some(mode) = mode else {
            return Err(anyhow!("transport not started"));
        };
        let endpoint = endpoint.ok_or_else(|| anyhow!("no message endpoint available"))?;
        debug!(%endpoint, "sending message");

        let mut request = self.apply_headers(self.http.post(endpoint)).json(&object);

        match mode {
            ProtocolMode::Streamable => {
                let session = session.ok_or_else(|| anyhow!("no session id recorded"))?;
                request = request.header(MCP_SESSION_ID_HEADER, session.to_string());

                let response = request.send().await?;
                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(anyhow!("request failed, status: {status}, body: {body}"));
                }
                let body = response.bytes().await?;
                if status == StatusCode::ACCEPTED || body.is_empty() {
                    // notification acknowledgement, nothing to surface
                    return Ok(());
                }
                match serde_json::from_slice::<Value>(&body) {
                    Ok(object) => self.emit(ClientEvent::Received(object)),
                    Err(e) => warn!(error = %e, "error parsing response body"),
                }
                Ok(())
            }
            ProtocolMode::Legacy => {
                let response = request.send().await?;
                if !response.status().is_success() {
                    warn!(status = %response.status(), "message POST rejected");
                }
                Ok(())
            }
        }
    }

    /// Sends a notification. Same wire action as [`send`](Self::send); in
    /// legacy mode it is fire-and-forget by construction.
    pub async fn notify(&self, object: Value) -> Result<()> {
        self.send(object).await
    }

    async fn fallback_to_legacy(&self) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            state.mode = Some(ProtocolMode::Legacy);
            state.session = None;
            state.endpoint = None;
        }

        let sse_url = self.url_with_path("/sse");
        debug!(%sse_url, "opening legacy SSE stream");
        let response = self
            .apply_headers(self.http.get(sse_url.clone()))
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .context("opening SSE stream")?;
        if !response.status().is_success() {
            return Err(anyhow!("SSE endpoint returned {}", response.status()));
        }

        let transport = self.clone();
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut parser = SseParser::new();
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        for frame in parser.push(&bytes) {
                            transport.handle_frame(&sse_url, frame).await;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "SSE stream error");
                        transport.emit(ClientEvent::TransportError(e.to_string()));
                        break;
                    }
                }
            }
            debug!("SSE stream ended");
            transport.emit(ClientEvent::Finished);
        });

        Ok(())
    }

    async fn handle_frame(&self, base: &Url, frame: SseFrame) {
        match frame {
            SseFrame::Keepalive => {}
            SseFrame::Event { name, data } => match name.as_str() {
                "endpoint" => {
                    let endpoint = resolve_endpoint(base, &data);
                    debug!(%endpoint, "message endpoint received");
                    self.state.lock().await.endpoint = Some(endpoint);
                    self.emit(ClientEvent::Started);
                }
                "message" => match serde_json::from_str::<Value>(&data) {
                    Ok(object) => self.emit(ClientEvent::Received(object)),
                    Err(e) => warn!(error = %e, "discarding unparseable message event"),
                },
                other => warn!(event = other, "skipping unknown SSE event"),
            },
            SseFrame::Invalid(raw) => warn!(raw = %raw, "skipping malformed SSE chunk"),
        }
    }

    fn url_with_path(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        url.set_path(path);
        url.set_query(None);
        url
    }

    fn apply_headers(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }
        if let Some(token) = &self.bearer_token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        request
    }

    fn emit(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            warn!("client event receiver dropped, discarding event");
        }
    }
}

/// Applies the relative path (and optional query) from an `endpoint` event
/// to the stream's own URL.
fn resolve_endpoint(base: &Url, data: &str) -> Url {
    let mut endpoint = base.clone();
    match data.split_once('?') {
        Some((path, query)) => {
            endpoint.set_path(path);
            endpoint.set_query(Some(query));
        }
        None => {
            endpoint.set_path(data);
            endpoint.set_query(None);
        }
    }
    endpoint
}
