//! Session tracking shared by the server-side protocol adapters.
//!
//! A session is one logical conversation with a client, identified by a
//! UUID. Legacy sessions own the SSE stream their responses are written to;
//! Streamable HTTP sessions own a FIFO of pending requests, each holding an
//! HTTP socket open until the backend produces the matching response.
//!
//! The registry is the only shared state in the server adapter. Every
//! mutation happens under its single lock; sockets themselves are owned by
//! whichever handler or stream has taken custody of them.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::sse::SseStreamHandle;

/// Opaque 128-bit session identifier.
///
/// Rendered as hyphenated lowercase hex without braces; parsing accepts both
/// the braced and unbraced forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Mints a fresh random session id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

/// Which wire protocol a session speaks.
///
/// Fixed at session creation; outbound dispatch branches on this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTransport {
    /// `GET /sse` + `POST /messages/`; responses flow over the event stream
    LegacySse,
    /// `/mcp` with `Mcp-Session-Id`; responses complete held POST sockets
    StreamableHttp,
}

/// A request whose HTTP socket is held open awaiting the backend.
///
/// Consumed exactly once: by a backend response, a session-shutdown sweep,
/// or a socket-disconnect sweep.
pub(crate) struct PendingRequest {
    /// Registry-unique token used by the disconnect sweep
    pub token: u64,
    /// Completing this releases the held socket with the response body;
    /// dropping it releases the socket empty-handed
    pub responder: oneshot::Sender<Value>,
}

struct Session {
    transport: SessionTransport,
    stream: Option<SseStreamHandle>,
    pending: VecDeque<PendingRequest>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, Session>,
    /// Fallback session for direct legacy POSTs; at most one exists
    implicit: Option<SessionId>,
}

/// Why a pending request could not be enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PendingError {
    UnknownSession,
    QueueFull,
}

/// Registry of live sessions and their in-flight state.
pub(crate) struct SessionRegistry {
    inner: Mutex<Inner>,
    next_token: AtomicU64,
    pending_limit: usize,
}

impl SessionRegistry {
    pub fn new(pending_limit: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            next_token: AtomicU64::new(0),
            pending_limit,
        }
    }

    /// Registers a legacy session together with its outbound event stream.
    pub fn insert_legacy(&self, id: SessionId, stream: SseStreamHandle) {
        let mut inner = self.inner.lock().unwrap();
        inner.sessions.insert(
            id,
            Session {
                transport: SessionTransport::LegacySse,
                stream: Some(stream),
                pending: VecDeque::new(),
            },
        );
    }

    /// Registers a Streamable HTTP session. Returns `false` if the id was
    /// already present (an echo of an established session).
    pub fn insert_streamable(&self, id: SessionId) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.sessions.contains_key(&id) {
            return false;
        }
        inner.sessions.insert(
            id,
            Session {
                transport: SessionTransport::StreamableHttp,
                stream: None,
                pending: VecDeque::new(),
            },
        );
        true
    }

    pub fn transport_of(&self, id: SessionId) -> Option<SessionTransport> {
        self.inner
            .lock()
            .unwrap()
            .sessions
            .get(&id)
            .map(|s| s.transport)
    }

    pub fn stream_of(&self, id: SessionId) -> Option<SseStreamHandle> {
        self.inner
            .lock()
            .unwrap()
            .sessions
            .get(&id)
            .and_then(|s| s.stream.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().sessions.len()
    }

    /// Removes a session, returning its residual pending requests so the
    /// caller can release their sockets. Clears the implicit marker when it
    /// pointed at the removed session.
    pub fn remove(&self, id: SessionId) -> Option<Vec<PendingRequest>> {
        let mut inner = self.inner.lock().unwrap();
        let session = inner.sessions.remove(&id)?;
        if inner.implicit == Some(id) {
            inner.implicit = None;
        }
        Some(session.pending.into())
    }

    /// Appends a pending request at the tail of the session's FIFO.
    ///
    /// The returned token identifies the entry for a later disconnect sweep.
    pub fn push_pending(
        &self,
        id: SessionId,
        responder: oneshot::Sender<Value>,
    ) -> Result<u64, PendingError> {
        self.push_pending_then(id, responder, || {})
    }

    /// Like [`push_pending`](Self::push_pending), but runs `deliver` while
    /// the lock is still held, so a request's queue position and its
    /// delivery order toward the backend cannot be interleaved by a
    /// concurrent ingest.
    pub fn push_pending_then(
        &self,
        id: SessionId,
        responder: oneshot::Sender<Value>,
        deliver: impl FnOnce(),
    ) -> Result<u64, PendingError> {
        let mut inner = self.inner.lock().unwrap();
        let session = inner
            .sessions
            .get_mut(&id)
            .ok_or(PendingError::UnknownSession)?;
        if session.pending.len() >= self.pending_limit {
            return Err(PendingError::QueueFull);
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        session.pending.push_back(PendingRequest { token, responder });
        deliver();
        Ok(token)
    }

    /// Dequeues the oldest pending request for the session.
    pub fn pop_pending(&self, id: SessionId) -> Option<PendingRequest> {
        let mut inner = self.inner.lock().unwrap();
        inner.sessions.get_mut(&id)?.pending.pop_front()
    }

    /// Removes one pending entry whose socket disconnected before pairing.
    ///
    /// The session itself survives. Returns `true` if the entry was still
    /// queued.
    pub fn remove_pending(&self, id: SessionId, token: u64) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(session) = inner.sessions.get_mut(&id) else {
            return false;
        };
        let before = session.pending.len();
        session.pending.retain(|p| p.token != token);
        session.pending.len() != before
    }

    /// Picks the session a direct legacy `POST /` should be bucketed under.
    ///
    /// Priority: any established legacy SSE session, else the existing
    /// implicit session, else a lazily created implicit session. The second
    /// tuple element reports whether a session was created by this call.
    pub fn root_fallback_session(&self) -> (SessionId, bool) {
        let mut inner = self.inner.lock().unwrap();
        if let Some((id, _)) = inner
            .sessions
            .iter()
            .find(|(_, s)| s.transport == SessionTransport::LegacySse && s.stream.is_some())
        {
            return (*id, false);
        }
        if let Some(id) = inner.implicit {
            return (id, false);
        }
        let id = SessionId::generate();
        inner.implicit = Some(id);
        inner.sessions.insert(
            id,
            Session {
                transport: SessionTransport::LegacySse,
                stream: None,
                pending: VecDeque::new(),
            },
        );
        (id, true)
    }
}
