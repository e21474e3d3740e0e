//! End-to-end exchanges over a real listener: the dual-protocol server on
//! one side, plain `reqwest` or the crate's own client transport on the
//! other.

use std::time::Duration;

use actix_web::{web, App, HttpRequest, HttpResponse};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use mcp_http_transport::config::TransportConfig;
use mcp_http_transport::transport::{
    ClientEvent, ClientHttpTransport, ServerEvent, ServerHttpTransport, MCP_SESSION_ID_HEADER,
};

fn spawn_server(
    config: TransportConfig,
) -> (
    actix_test::TestServer,
    ServerHttpTransport,
    mpsc::UnboundedReceiver<ServerEvent>,
) {
    let (transport, events) = ServerHttpTransport::new(config);
    let configure = transport.service_config();
    let srv = actix_test::start(move || {
        let configure = configure.clone();
        App::new().configure(|cfg| configure(cfg))
    });
    (srv, transport, events)
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

fn ping(id: u64) -> Value {
    json!({"jsonrpc": "2.0", "method": "ping", "id": id})
}

#[actix_web::test]
async fn legacy_sse_round_trip() {
    let (srv, server, mut server_events) = spawn_server(TransportConfig::default());

    let (client, mut client_events) = ClientHttpTransport::builder(srv.url("/"))
        .build()
        .unwrap();
    // the strict server rejects the probe, so the client lands on legacy SSE
    client.start().await.unwrap();

    assert!(matches!(recv(&mut client_events).await, ClientEvent::Started));
    let session = match recv(&mut server_events).await {
        ServerEvent::NewSession(session) => session,
        other => panic!("unexpected event: {other:?}"),
    };

    client.send(ping(1)).await.unwrap();

    match recv(&mut server_events).await {
        ServerEvent::Received {
            session: from,
            message,
        } => {
            assert_eq!(from, session);
            assert_eq!(message["method"], "ping");
            assert_eq!(message["id"], 1);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    server
        .send(session, json!({"jsonrpc": "2.0", "id": 1, "result": {}}))
        .unwrap();

    match recv(&mut client_events).await {
        ClientEvent::Received(object) => {
            assert_eq!(object["id"], 1);
            assert!(object["result"].is_object());
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[actix_web::test]
async fn legacy_session_removed_on_disconnect() {
    // a fast keepalive forces prompt detection of the dead socket
    let (srv, server, mut server_events) = spawn_server(
        TransportConfig::default().with_sse_keepalive_interval(Duration::from_millis(100)),
    );
    let http = reqwest::Client::new();

    let resp = http
        .get(srv.url("/sse"))
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .header(reqwest::header::CACHE_CONTROL, "no-cache")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()[reqwest::header::CONTENT_TYPE].to_str().unwrap(),
        "text/event-stream"
    );

    let session = match recv(&mut server_events).await {
        ServerEvent::NewSession(session) => session,
        other => panic!("unexpected event: {other:?}"),
    };
    assert_eq!(server.active_sessions(), 1);

    // the first frame on the wire is the endpoint event
    use futures::StreamExt as _;
    let mut body = resp.bytes_stream();
    let first = body.next().await.unwrap().unwrap();
    let first = String::from_utf8_lossy(&first).into_owned();
    assert!(first.starts_with("event: endpoint\r\ndata: /messages/?session_id="));
    assert!(first.contains(&session.to_string()));

    // dropping the body closes the socket; the session goes with it
    drop(body);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while server.active_sessions() != 0 {
        assert!(tokio::time::Instant::now() < deadline, "session never removed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // outbound for the vanished session is dropped quietly
    server
        .send(session, json!({"jsonrpc": "2.0", "id": 9, "result": {}}))
        .unwrap();
}

#[actix_web::test]
async fn streamable_http_lifecycle_over_the_wire() {
    let (srv, _server, mut server_events) = spawn_server(TransportConfig::default());
    let http = reqwest::Client::new();
    let mcp = srv.url("/mcp");

    // strict mode: a headerless POST is rejected before any session exists
    let resp = http.post(&mcp).json(&ping(0)).send().await.unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32600);

    // HEAD advertises the endpoint
    let resp = http.head(&mcp).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["Mcp-Endpoint-Available"], "true");

    // explicit establishment
    let resp = http.get(&mcp).send().await.unwrap();
    assert_eq!(resp.status(), 204);
    let session = resp.headers()[MCP_SESSION_ID_HEADER]
        .to_str()
        .unwrap()
        .to_string();
    assert!(matches!(
        recv(&mut server_events).await,
        ServerEvent::NewSession(_)
    ));

    // notification: immediate empty ack with the echoed header
    let resp = http
        .post(&mcp)
        .header(MCP_SESSION_ID_HEADER, session.as_str())
        .json(&json!({"jsonrpc": "2.0", "method": "notify/x", "params": {}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    assert_eq!(resp.headers()[MCP_SESSION_ID_HEADER].to_str().unwrap(), session);
    assert_eq!(resp.content_length(), Some(0));
    assert!(matches!(
        recv(&mut server_events).await,
        ServerEvent::Received { .. }
    ));

    // stale id: well-formed but unknown
    let resp = http
        .post(&mcp)
        .header(MCP_SESSION_ID_HEADER, "11111111-1111-1111-1111-111111111111")
        .json(&ping(1))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32600);
    assert_eq!(body["error"]["data"]["reason"], "session_not_found");
}

#[actix_web::test]
async fn streamable_request_paired_with_backend_response() {
    let (srv, server, mut server_events) = spawn_server(TransportConfig::default());
    let http = reqwest::Client::new();
    let mcp = srv.url("/mcp");

    let resp = http.get(&mcp).send().await.unwrap();
    let session = resp.headers()[MCP_SESSION_ID_HEADER]
        .to_str()
        .unwrap()
        .to_string();
    let _ = recv(&mut server_events).await;

    // backend answers each request as it arrives
    let backend = server.clone();
    tokio::spawn(async move {
        while let Some(event) = server_events.recv().await {
            if let ServerEvent::Received { session, message } = event {
                let reply = json!({
                    "jsonrpc": "2.0",
                    "id": message["id"],
                    "result": {"ok": true},
                });
                backend.send(session, reply).unwrap();
            }
        }
    });

    let resp = http
        .post(&mcp)
        .header(MCP_SESSION_ID_HEADER, session.as_str())
        .json(&ping(7))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()[MCP_SESSION_ID_HEADER].to_str().unwrap(), session);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["id"], 7);
    assert_eq!(body["result"]["ok"], true);
}

#[actix_web::test]
async fn delete_drains_held_requests() {
    let (srv, server, mut server_events) = spawn_server(TransportConfig::default());
    let http = reqwest::Client::new();
    let mcp = srv.url("/mcp");

    let resp = http.get(&mcp).send().await.unwrap();
    let session = resp.headers()[MCP_SESSION_ID_HEADER]
        .to_str()
        .unwrap()
        .to_string();
    let _ = recv(&mut server_events).await;

    // a request takes custody of its socket and waits
    let held_http = http.clone();
    let held_mcp = mcp.clone();
    let held_session = session.clone();
    let held = tokio::spawn(async move {
        held_http
            .post(&held_mcp)
            .header(MCP_SESSION_ID_HEADER, held_session.as_str())
            .json(&ping(1))
            .send()
            .await
            .unwrap()
            .status()
    });
    let _ = recv(&mut server_events).await;

    let resp = http
        .delete(&mcp)
        .header(MCP_SESSION_ID_HEADER, session.as_str())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()[MCP_SESSION_ID_HEADER].to_str().unwrap(), session);
    assert_eq!(resp.content_length(), Some(0));

    // the held socket was released, not answered
    let status = held.await.unwrap();
    assert_eq!(status, 503);
    assert_eq!(server.active_sessions(), 0);

    // a late backend response has nowhere to go and is dropped
    let parsed = session.parse().unwrap();
    server
        .send(parsed, json!({"jsonrpc": "2.0", "id": 1, "result": {}}))
        .unwrap();
}

#[actix_web::test]
async fn client_adopts_streamable_http_when_offered() {
    // A permissive peer in the style of the earlier protocol revision: it
    // mints a session for the probe and answers requests inline.
    async fn permissive_mcp(req: HttpRequest, body: web::Bytes) -> HttpResponse {
        let session = req
            .headers()
            .get(MCP_SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("22222222-2222-2222-2222-222222222222")
            .to_string();
        let message: Value = serde_json::from_slice(&body).unwrap_or_else(|_| json!({}));
        let reply = json!({
            "jsonrpc": "2.0",
            "id": message.get("id").cloned().unwrap_or(Value::Null),
            "result": {"pong": true},
        });
        HttpResponse::Ok()
            .insert_header((MCP_SESSION_ID_HEADER, session))
            .content_type("application/json")
            .body(reply.to_string())
    }

    let srv = actix_test::start(|| {
        App::new().route("/mcp", web::post().to(permissive_mcp))
    });

    let (client, mut client_events) = ClientHttpTransport::builder(srv.url("/"))
        .build()
        .unwrap();
    client.start().await.unwrap();
    assert!(matches!(recv(&mut client_events).await, ClientEvent::Started));

    client.send(ping(3)).await.unwrap();
    match recv(&mut client_events).await {
        ClientEvent::Received(object) => {
            assert_eq!(object["id"], 3);
            assert_eq!(object["result"]["pong"], true);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}
