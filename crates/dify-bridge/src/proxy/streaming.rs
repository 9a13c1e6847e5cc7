//! Backend event stream → OpenAI chat-completion output
//!
//! The backend answers every turn with a line-delimited SSE stream:
//!
//! ```text
//! data: {"event": "workflow_started", "conversation_id": "...", ...}
//!
//! data: {"event": "message", "answer": "Hel", "conversation_id": "...", ...}
//!
//! event: ping
//!
//! data: {"event": "workflow_finished", ...}
//! ```
//!
//! [`StreamRelay`] reads it line by line and either re-emits each answer
//! fragment as an OpenAI chunk (streaming callers) or accumulates the answer
//! for a single completion object (buffered callers). Whatever happens, it
//! returns a [`RelayOutcome`] with the conversation id it discovered so the
//! caller can reap the conversation.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::openai::{ChatCompletionChunk, ResponseMeta};
use super::session::{ConversationId, SessionKey, SessionStore};

/// Lines shorter than this are keep-alive pings
pub const MIN_EVENT_LINE_LEN: usize = 16;

/// Terminal frame of every streamed response
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

const DATA_PREFIX: &str = "data:";

/// One decoded `data:` line from the backend
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct BackendEvent {
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub answer: Option<String>,
}

/// Event types the relay acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Incremental answer fragment
    Message,
    /// The turn is complete
    WorkflowFinished,
    /// Anything else (workflow_started, node_started, message_end, ...)
    Other,
}

impl BackendEvent {
    pub fn kind(&self) -> EventKind {
        match self.event.as_str() {
            "message" => EventKind::Message,
            "workflow_finished" => EventKind::WorkflowFinished,
            _ => EventKind::Other,
        }
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.conversation_id.clone().and_then(ConversationId::new)
    }
}

/// Classification of a single backend line
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    /// Too short to carry an event
    KeepAlive,
    /// Not a `data:` line (`event: ping`, comments, ...)
    NotData,
    /// `data:` line whose payload is not a valid event
    Malformed(String),
    Event(BackendEvent),
}

/// Classify and decode one line (without its terminator)
pub fn parse_line(line: &str) -> ParsedLine {
    if line.len() < MIN_EVENT_LINE_LEN {
        return ParsedLine::KeepAlive;
    }
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return ParsedLine::NotData;
    };
    let payload = payload.strip_prefix(' ').unwrap_or(payload);

    match serde_json::from_str::<BackendEvent>(payload) {
        Ok(event) => ParsedLine::Event(event),
        Err(e) => ParsedLine::Malformed(e.to_string()),
    }
}

/// Longest backend line the relay holds in memory
pub const MAX_LINE_LEN: usize = 1024 * 1024;

/// One line taken from a [`LineBuffer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Text(String),
    /// A line longer than the buffer's limit; its bytes were dropped
    Oversize(usize),
}

/// Reassembles lines from arbitrarily split body chunks
///
/// Bytes are held until a full line is available, so multi-byte characters
/// split across chunks decode correctly. A line that outgrows `max_len` is
/// dropped as it arrives and reported as [`Line::Oversize`].
#[derive(Debug)]
pub struct LineBuffer {
    pending: Vec<u8>,
    /// Prefix of `pending` known to contain no `\n`
    scanned: usize,
    /// Bytes already dropped from the current oversize line
    discarded: Option<usize>,
    max_len: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_max_len(MAX_LINE_LEN)
    }
}

impl LineBuffer {
    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            pending: Vec::new(),
            scanned: 0,
            discarded: None,
            max_len,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Next complete line, without `\n` or `\r\n`
    pub fn next_line(&mut self) -> Option<Line> {
        let Some(offset) = self.pending[self.scanned..]
            .iter()
            .position(|&b| b == b'\n')
        else {
            self.scanned = self.pending.len();
            self.shed_overflow();
            return None;
        };

        let mut line: Vec<u8> = self.pending.drain(..=self.scanned + offset).collect();
        self.scanned = 0;
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(self.complete(line))
    }

    /// Whatever is left once the body has ended
    pub fn finish(&mut self) -> Option<Line> {
        if self.pending.is_empty() && self.discarded.is_none() {
            return None;
        }
        let mut line = std::mem::take(&mut self.pending);
        self.scanned = 0;
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(self.complete(line))
    }

    fn shed_overflow(&mut self) {
        if self.pending.len() > self.max_len {
            *self.discarded.get_or_insert(0) += self.pending.len();
            self.pending.clear();
            self.scanned = 0;
        }
    }

    fn complete(&mut self, line: Vec<u8>) -> Line {
        match self.discarded.take() {
            Some(dropped) => Line::Oversize(dropped + line.len()),
            None if line.len() > self.max_len => Line::Oversize(line.len()),
            None => Line::Text(String::from_utf8_lossy(&line).into_owned()),
        }
    }
}

/// Item type of a streamed response body
pub type Frame = Result<Bytes, Infallible>;

/// Writes SSE frames to a streaming caller
#[derive(Debug, Clone)]
pub struct ChunkEmitter {
    tx: mpsc::Sender<Frame>,
    meta: ResponseMeta,
}

impl ChunkEmitter {
    /// Emitter plus the receiving end that becomes the response body
    pub fn channel(meta: ResponseMeta, capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, meta }, rx)
    }

    pub fn meta(&self) -> &ResponseMeta {
        &self.meta
    }

    /// Send one chunk as a `data:` frame. Returns false once the caller
    /// has gone away.
    pub async fn emit(&self, chunk: &ChatCompletionChunk) -> bool {
        match serde_json::to_string(chunk) {
            Ok(json) => self.send(format!("data: {json}\n\n")).await,
            Err(e) => {
                warn!("Failed to serialize chunk: {e}");
                !self.tx.is_closed()
            }
        }
    }

    /// Send the `[DONE]` sentinel
    pub async fn done(&self) -> bool {
        self.send(DONE_FRAME.to_string()).await
    }

    async fn send(&self, frame: String) -> bool {
        self.tx.send(Ok(Bytes::from(frame))).await.is_ok()
    }

    /// Resolves once the response body has been dropped
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Where the relay puts what it reads
#[derive(Debug)]
pub enum RelaySink {
    /// Emit a chunk per answer fragment
    Stream(ChunkEmitter),
    /// Accumulate answer fragments
    Buffer(String),
}

/// Why the relay stopped reading
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// `workflow_finished` was seen
    Finished,
    /// Backend closed the body without finishing
    BackendClosed,
    /// Reading the body failed
    Transport(String),
    /// No body data arrived within the idle timeout
    IdleTimeout,
    /// The caller disconnected
    CallerGone,
}

/// Result of relaying one turn
#[derive(Debug, Clone, PartialEq)]
pub struct RelayOutcome {
    /// First non-empty conversation id seen in the stream
    pub conversation_id: Option<ConversationId>,
    /// Accumulated answer (buffered mode only)
    pub content: Option<String>,
    pub termination: Termination,
    /// Decoded events
    pub events: usize,
    /// `data:` lines that failed to decode
    pub malformed: usize,
}

enum LineFlow {
    Continue,
    Finished,
    CallerGone,
}

#[derive(Default)]
struct TurnState {
    conversation_id: Option<ConversationId>,
    events: usize,
    malformed: usize,
}

/// Translates one backend event stream for one caller
#[derive(Debug)]
pub struct StreamRelay<'a> {
    sessions: &'a SessionStore,
    session_key: &'a SessionKey,
    idle_timeout: Duration,
}

impl<'a> StreamRelay<'a> {
    pub fn new(
        sessions: &'a SessionStore,
        session_key: &'a SessionKey,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            sessions,
            session_key,
            idle_timeout,
        }
    }

    /// Relay `body` into `sink` until the turn ends.
    ///
    /// `caller_gone` resolves when nobody is waiting for the output any more;
    /// the relay then stops reading. The discovered conversation id is
    /// written to the session store as soon as it is seen, and also returned.
    pub async fn run<S, B, E, C>(&self, body: S, sink: &mut RelaySink, caller_gone: C) -> RelayOutcome
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
        C: Future<Output = ()>,
    {
        tokio::pin!(body);
        tokio::pin!(caller_gone);

        let mut lines = LineBuffer::default();
        let mut state = TurnState::default();

        let termination = 'relay: loop {
            while let Some(line) = lines.next_line() {
                match self.handle_line(line, sink, &mut state).await {
                    LineFlow::Continue => {}
                    LineFlow::Finished => break 'relay Termination::Finished,
                    LineFlow::CallerGone => break 'relay Termination::CallerGone,
                }
            }

            let read = tokio::select! {
                biased;
                _ = &mut caller_gone => None,
                read = tokio::time::timeout(self.idle_timeout, body.next()) => Some(read),
            };

            match read {
                None => break 'relay Termination::CallerGone,
                Some(Err(_)) => {
                    warn!(
                        session = %self.session_key,
                        "No data from backend for {}s, ending turn",
                        self.idle_timeout.as_secs()
                    );
                    break 'relay Termination::IdleTimeout;
                }
                Some(Ok(None)) => {
                    if let Some(line) = lines.finish() {
                        match self.handle_line(line, sink, &mut state).await {
                            LineFlow::Continue => {}
                            LineFlow::Finished => break 'relay Termination::Finished,
                            LineFlow::CallerGone => break 'relay Termination::CallerGone,
                        }
                    }
                    break 'relay Termination::BackendClosed;
                }
                Some(Ok(Some(Err(e)))) => {
                    warn!(session = %self.session_key, "Backend stream failed: {e}");
                    break 'relay Termination::Transport(e.to_string());
                }
                Some(Ok(Some(Ok(bytes)))) => lines.push(bytes.as_ref()),
            }
        };

        let content = match sink {
            RelaySink::Buffer(acc) => Some(std::mem::take(acc)),
            RelaySink::Stream(_) => None,
        };

        debug!(
            session = %self.session_key,
            conversation = ?state.conversation_id.as_ref().map(|c| c.as_str()),
            termination = ?termination,
            events = state.events,
            malformed = state.malformed,
            "Relay finished"
        );

        RelayOutcome {
            conversation_id: state.conversation_id,
            content,
            termination,
            events: state.events,
            malformed: state.malformed,
        }
    }

    async fn handle_line(&self, line: Line, sink: &mut RelaySink, state: &mut TurnState) -> LineFlow {
        let line = match line {
            Line::Text(text) => text,
            Line::Oversize(len) => {
                warn!(session = %self.session_key, "Dropped oversize backend line ({len} bytes)");
                state.malformed += 1;
                return LineFlow::Continue;
            }
        };

        let event = match parse_line(&line) {
            ParsedLine::KeepAlive => return LineFlow::Continue,
            ParsedLine::NotData => {
                trace!("Skipping non-data line: {line}");
                return LineFlow::Continue;
            }
            ParsedLine::Malformed(err) => {
                warn!("Failed to parse event data: {line} ({err})");
                state.malformed += 1;
                return LineFlow::Continue;
            }
            ParsedLine::Event(event) => event,
        };
        state.events += 1;

        if state.conversation_id.is_none() {
            if let Some(id) = event.conversation_id() {
                self.sessions.put(self.session_key.clone(), id.clone()).await;
                state.conversation_id = Some(id);
            }
        }

        match event.kind() {
            EventKind::Message => {
                let answer = event.answer.unwrap_or_default();
                match sink {
                    RelaySink::Stream(emitter) => {
                        let chunk = emitter.meta().content_chunk(answer);
                        if !emitter.emit(&chunk).await {
                            return LineFlow::CallerGone;
                        }
                    }
                    RelaySink::Buffer(acc) => acc.push_str(&answer),
                }
                LineFlow::Continue
            }
            EventKind::WorkflowFinished => {
                if let RelaySink::Stream(emitter) = sink {
                    if !emitter.emit(&emitter.meta().stop_chunk()).await {
                        return LineFlow::CallerGone;
                    }
                }
                LineFlow::Finished
            }
            EventKind::Other => LineFlow::Continue,
        }
    }
}
