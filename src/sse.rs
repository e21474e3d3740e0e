//! Server-Sent Events wire framing.
//!
//! The server side encodes `event:`/`data:` frames and buffers them toward
//! long-lived response sockets; the client side parses the same framing back
//! out of an arbitrarily chunked byte stream.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;
use tracing::warn;

/// Keepalive comment written between events to hold intermediaries open.
pub(crate) const KEEPALIVE_FRAME: &[u8] = b": ping\r\n\r\n";

/// Encodes one SSE frame: `event: <name>\r\ndata: <data>\r\n\r\n`.
pub(crate) fn event_frame(event: &str, data: &str) -> Bytes {
    Bytes::from(format!("event: {event}\r\ndata: {data}\r\n\r\n"))
}

/// Write side of a registered SSE stream.
///
/// Frames are buffered through a channel drained by the HTTP response body.
/// `queued` tracks how many bytes sit in that buffer; once the high-water
/// mark is crossed further frames are shed rather than buffered without
/// bound.
#[derive(Clone)]
pub(crate) struct SseStreamHandle {
    tx: mpsc::UnboundedSender<Bytes>,
    queued: Arc<AtomicUsize>,
    highwater: usize,
}

impl SseStreamHandle {
    /// Queues a frame for the stream. Returns `false` if the frame was shed
    /// (buffer over high water) or the client is gone.
    pub fn send(&self, frame: Bytes) -> bool {
        let len = frame.len();
        if self.queued.load(Ordering::Acquire) + len > self.highwater {
            warn!("SSE write buffer over high-water mark, dropping event");
            return false;
        }
        if self.tx.send(frame).is_err() {
            return false;
        }
        self.queued.fetch_add(len, Ordering::AcqRel);
        true
    }

    /// `true` once the read side (the response body) has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Response body for an SSE stream; yields the queued frames.
///
/// Dropped by the HTTP layer when the client disconnects, which runs the
/// close callback so the owning session can be torn down.
pub(crate) struct SseStream {
    rx: mpsc::UnboundedReceiver<Bytes>,
    queued: Arc<AtomicUsize>,
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

/// Creates the write handle and response body for one SSE stream.
pub(crate) fn sse_channel(
    highwater: usize,
    on_close: Box<dyn FnOnce() + Send>,
) -> (SseStreamHandle, SseStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    let queued = Arc::new(AtomicUsize::new(0));
    (
        SseStreamHandle {
            tx,
            queued: queued.clone(),
            highwater,
        },
        SseStream {
            rx,
            queued,
            on_close: Some(on_close),
        },
    )
}

impl Stream for SseStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(frame)) => {
                self.queued.fetch_sub(frame.len(), Ordering::AcqRel);
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for SseStream {
    fn drop(&mut self) {
        if let Some(on_close) = self.on_close.take() {
            on_close();
        }
    }
}

/// A parsed frame from an SSE byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// A named event and the payload of its `data:` line
    Event { name: String, data: String },
    /// A `: ping` keepalive comment
    Keepalive,
    /// A chunk the parser could not shape; callers log and skip it
    Invalid(String),
}

/// Incremental parser for an SSE event stream.
///
/// Events are delimited by a doubled line separator. Servers differ on which
/// separator they emit, so the first complete event pins it: `\r\n\r\n` when
/// seen, else `\n\n`, and that choice holds for the rest of the stream.
/// Within an event either line ending is accepted. The parser buffers
/// across `push` calls, so feeding it byte-by-byte yields the same frames as
/// one contiguous slice.
#[derive(Default)]
pub struct SseParser {
    buf: Vec<u8>,
    separator: Option<&'static str>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes and drains every complete frame they finish.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();
        loop {
            let separator = match self.separator {
                Some(separator) => separator,
                None => {
                    if find(&self.buf, b"\r\n\r\n").is_some() {
                        self.separator = Some("\r\n");
                        "\r\n"
                    } else if find(&self.buf, b"\n\n").is_some() {
                        self.separator = Some("\n");
                        "\n"
                    } else {
                        break;
                    }
                }
            };
            let delimiter = match separator {
                "\r\n" => &b"\r\n\r\n"[..],
                _ => &b"\n\n"[..],
            };
            let Some(end) = find(&self.buf, delimiter) else {
                break;
            };
            let chunk = String::from_utf8_lossy(&self.buf[..end]).into_owned();
            self.buf.drain(..end + delimiter.len());
            frames.push(parse_chunk(&chunk));
        }
        frames
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_chunk(chunk: &str) -> SseFrame {
    let lines: Vec<&str> = chunk.split('\n').map(|l| l.trim_end_matches('\r')).collect();
    let first = lines[0];
    let (kind, value) = match first.find(':') {
        Some(colon) => (&first[..colon], first[colon + 1..].trim_start()),
        None => (first, ""),
    };
    if kind.is_empty() {
        if value.starts_with("ping") {
            return SseFrame::Keepalive;
        }
        return SseFrame::Invalid(chunk.to_string());
    }
    if kind != "event" {
        return SseFrame::Invalid(chunk.to_string());
    }
    match lines
        .get(1)
        .and_then(|line| line.strip_prefix("data:"))
        .map(|data| data.trim_start())
    {
        Some(data) => SseFrame::Event {
            name: value.to_string(),
            data: data.to_string(),
        },
        None => SseFrame::Invalid(chunk.to_string()),
    }
}
