//! # MCP HTTP Transport
//!
//! `mcp-http-transport` is a bidirectional HTTP transport layer for the
//! Model Context Protocol (MCP). It multiplexes JSON-RPC 2.0 exchanges
//! between MCP clients and an MCP application backend over HTTP, speaking
//! two wire protocols concurrently on the same listener:
//!
//! - the legacy Server-Sent Events transport (`GET /sse` establishment plus
//!   `POST /messages/` ingest), and
//! - the newer Streamable HTTP transport (`/mcp` with `Mcp-Session-Id`
//!   correlation headers).
//!
//! The crate provides both sides of the wire:
//!
//! - **Server**: [`transport::ServerHttpTransport`] accepts HTTP
//!   connections, maintains per-client sessions, streams server-to-client
//!   events, and pairs asynchronous backend responses with the request still
//!   holding its socket open.
//! - **Client**: [`transport::ClientHttpTransport`] probes a remote endpoint
//!   for Streamable HTTP support, falls back to legacy SSE, and exposes a
//!   symmetric send/receive interface.
//!
//! ## Architecture
//!
//! The library is organized into several main components:
//!
//! - **Transport**: the server- and client-side protocol adapters
//! - **Session**: session identifiers and the registry of in-flight state
//! - **SSE**: `event:`/`data:` wire framing and the incremental stream parser
//! - **Config**: listener address, keepalive, queue bounds, log level
//!
//! Method dispatch (tools, resources, prompts) is not part of this crate.
//! The backend consumes raw JSON-RPC objects from the adapters' event
//! channels and answers through their `send` sinks; framing is chosen per
//! session.
//!
//! ## Usage
//!
//! For runnable examples see the `demos/` directory:
//! - `demo_server.rs`: a dual-protocol MCP listener with an echo backend
//! - `demo_client.rs`: a client negotiating its way onto either protocol

pub mod config;
pub mod session;
pub mod sse;
pub mod transport;
pub mod types;
