//! OpenAI-compatible chat relay in front of the portal backend

mod backend;
mod error;
mod openai;
mod reaper;
mod server;
mod session;
mod streaming;
mod translation;

pub use backend::BackendClient;
pub use error::ProxyError;
pub use openai::{
    AssistantMessage, ChatCompletion, ChatCompletionChunk, ChatCompletionRequest, ChatMessage,
    ChunkChoice, ChunkDelta, CompletionChoice, ContentPart, MessageContent, ResponseMeta, Usage,
};
pub use reaper::{ConversationReaper, ReapOutcome};
pub use server::{AppState, BridgeServer, create_router};
pub use session::{ConversationId, SessionKey, SessionStore};
pub use streaming::{
    BackendEvent, ChunkEmitter, DONE_FRAME, EventKind, Frame, Line, LineBuffer, MAX_LINE_LEN,
    MIN_EVENT_LINE_LEN, ParsedLine, RelayOutcome, RelaySink, StreamRelay, Termination,
    parse_line,
};
pub use translation::{BackendEnvelope, BackendTurn, RequestTranslator, extract_user_query};
