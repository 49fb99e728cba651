//! crates/rag_agent_core/src/events.rs
//!
//! The streaming event types and the encoder that projects them onto the
//! wire protocol.
//!
//! A streaming turn is a sequence of [`TurnEvent`]s produced by the
//! orchestrator. [`EventEncoder`] maps them to [`WireEvent`]s while enforcing
//! the protocol state machine: `INIT → STREAMING → TERMINAL`, with
//! `references` and `token_usage` each sent at most once and nothing emitted
//! after a terminal `done`/`error`.

use serde::{Deserialize, Serialize};

use crate::domain::{RetrievedDocument, TokenUsage};

/// One event of a streaming turn, as produced by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// An incremental fragment of the answer text.
    Content(String),
    /// The full retrieved documents backing the answer.
    References(Vec<RetrievedDocument>),
    /// Token accounting for the turn.
    Usage(TokenUsage),
    /// The turn finished and its exchange is durable.
    Done,
    /// The turn failed; no further events follow.
    Error(String),
}

/// The wire representation of a streaming event: one discrete JSON object
/// per event, discriminated by `event_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum WireEvent {
    Content { content: String },
    References { references: Vec<RetrievedDocument> },
    TokenUsage { token_usage: TokenUsage },
    Done,
    Error { error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncoderState {
    Init,
    Streaming,
    Terminal,
}

/// Projects orchestrator events onto the wire protocol.
///
/// The encoder introduces no failure modes of its own: events that would
/// violate the protocol (a second `references`, anything after a terminal
/// event) are swallowed and `None` is returned.
#[derive(Debug)]
pub struct EventEncoder {
    state: EncoderState,
    references_sent: bool,
    usage_sent: bool,
}

impl EventEncoder {
    pub fn new() -> Self {
        Self {
            state: EncoderState::Init,
            references_sent: false,
            usage_sent: false,
        }
    }

    /// Whether a terminal event has been emitted.
    pub fn is_terminal(&self) -> bool {
        self.state == EncoderState::Terminal
    }

    /// Encodes one event, or `None` when the protocol forbids emitting it.
    pub fn encode(&mut self, event: TurnEvent) -> Option<WireEvent> {
        if self.state == EncoderState::Terminal {
            return None;
        }

        match event {
            TurnEvent::Content(content) => {
                self.state = EncoderState::Streaming;
                Some(WireEvent::Content { content })
            }
            TurnEvent::References(references) => {
                if self.references_sent {
                    return None;
                }
                self.references_sent = true;
                self.state = EncoderState::Streaming;
                Some(WireEvent::References { references })
            }
            TurnEvent::Usage(token_usage) => {
                if self.usage_sent {
                    return None;
                }
                self.usage_sent = true;
                self.state = EncoderState::Streaming;
                Some(WireEvent::TokenUsage { token_usage })
            }
            TurnEvent::Done => {
                self.state = EncoderState::Terminal;
                Some(WireEvent::Done)
            }
            TurnEvent::Error(error) => {
                self.state = EncoderState::Terminal;
                Some(WireEvent::Error { error })
            }
        }
    }
}

impl Default for EventEncoder {
    fn default() -> Self {
        Self::new()
    }
}
