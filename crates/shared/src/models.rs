use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Opaque per-connection token minted by the gateway.
pub type ConnectionId = Uuid;

/// Identifier of a two-party session. Never reused within a process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// Which side of the handshake produced a connectivity candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateRole {
    Sender,
    Receiver,
}

// ---------- Inbound (client -> server) ----------

/// A frame received from a connection: `{"event": ..., "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    Join {
        #[serde(default)]
        display_name: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Offer { session_id: SessionId, sdp: Value },
    #[serde(rename_all = "camelCase")]
    Answer { session_id: SessionId, sdp: Value },
    #[serde(rename_all = "camelCase")]
    Candidate {
        session_id: SessionId,
        candidate: Value,
        role: CandidateRole,
    },
    #[serde(rename_all = "camelCase")]
    Chat { session_id: SessionId, text: String },
    Skip {},
}

impl ClientEvent {
    /// Parses one text frame. A missing or `null` `data` is read as `{}`, so
    /// `join` and `skip` decode with or without a payload.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let mut frame: Value = serde_json::from_str(text)?;
        if let Value::Object(fields) = &mut frame {
            if fields.get("data").map_or(true, Value::is_null) {
                fields.insert("data".to_string(), Value::Object(Map::new()));
            }
        }
        Ok(serde_json::from_value(frame)?)
    }

    /// Rejects chat text longer than `max_chat_chars` characters.
    pub fn validate(&self, max_chat_chars: usize) -> Result<(), ProtocolError> {
        if let ClientEvent::Chat { text, .. } = self {
            if text.chars().count() > max_chat_chars {
                return Err(ProtocolError::TooLarge {
                    field: "text",
                    max: max_chat_chars,
                });
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Join { .. } => "join",
            ClientEvent::Offer { .. } => "offer",
            ClientEvent::Answer { .. } => "answer",
            ClientEvent::Candidate { .. } => "candidate",
            ClientEvent::Chat { .. } => "chat",
            ClientEvent::Skip {} => "skip",
        }
    }

    /// Splits a handshake event into its session id and relayable signal.
    /// `join` and `skip` are handed back unchanged.
    pub fn into_signal(self) -> Result<(SessionId, Signal), ClientEvent> {
        match self {
            ClientEvent::Offer { session_id, sdp } => Ok((session_id, Signal::Offer { sdp })),
            ClientEvent::Answer { session_id, sdp } => Ok((session_id, Signal::Answer { sdp })),
            ClientEvent::Candidate {
                session_id,
                candidate,
                role,
            } => Ok((session_id, Signal::Candidate { candidate, role })),
            ClientEvent::Chat { session_id, text } => Ok((session_id, Signal::Chat { text })),
            other => Err(other),
        }
    }
}

/// Payload relayed between the two members of a session. The server never
/// looks inside `sdp` or `candidate`.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Offer { sdp: Value },
    Answer { sdp: Value },
    Candidate { candidate: Value, role: CandidateRole },
    Chat { text: String },
}

impl Signal {
    pub fn kind(&self) -> &'static str {
        match self {
            Signal::Offer { .. } => "offer",
            Signal::Answer { .. } => "answer",
            Signal::Candidate { .. } => "candidate",
            Signal::Chat { .. } => "chat",
        }
    }

    /// Builds the event delivered to the counterpart. Chat is stamped with
    /// `timestamp_ms`; the other kinds pass through untouched.
    pub fn into_event(self, session_id: SessionId, timestamp_ms: u64) -> ServerEvent {
        match self {
            Signal::Offer { sdp } => ServerEvent::Offer { session_id, sdp },
            Signal::Answer { sdp } => ServerEvent::Answer { session_id, sdp },
            Signal::Candidate { candidate, role } => ServerEvent::Candidate {
                session_id,
                candidate,
                role,
            },
            Signal::Chat { text } => ServerEvent::Chat {
                session_id,
                text,
                timestamp: timestamp_ms,
            },
        }
    }
}

// ---------- Outbound (server -> client) ----------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    QueueJoined,
    #[serde(rename_all = "camelCase")]
    SessionStart {
        session_id: SessionId,
        ice_servers: Vec<IceServer>,
        is_initiator: bool,
    },
    #[serde(rename_all = "camelCase")]
    Offer { session_id: SessionId, sdp: Value },
    #[serde(rename_all = "camelCase")]
    Answer { session_id: SessionId, sdp: Value },
    #[serde(rename_all = "camelCase")]
    Candidate {
        session_id: SessionId,
        candidate: Value,
        role: CandidateRole,
    },
    #[serde(rename_all = "camelCase")]
    Chat {
        session_id: SessionId,
        text: String,
        timestamp: u64,
    },
    PeerDisconnected,
    ConnectionTimeout,
    Error { code: ErrorCode, message: String },
}

impl ServerEvent {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn error(err: &ProtocolError) -> Self {
        ServerEvent::Error {
            code: err.code(),
            message: err.to_string(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::QueueJoined => "queue-joined",
            ServerEvent::SessionStart { .. } => "session-start",
            ServerEvent::Offer { .. } => "offer",
            ServerEvent::Answer { .. } => "answer",
            ServerEvent::Candidate { .. } => "candidate",
            ServerEvent::Chat { .. } => "chat",
            ServerEvent::PeerDisconnected => "peer-disconnected",
            ServerEvent::ConnectionTimeout => "connection-timeout",
            ServerEvent::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    MalformedPayload,
    PayloadTooLarge,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("binary frames are not supported")]
    UnsupportedFrame,
    #[error("field `{field}` exceeds {max} characters")]
    TooLarge { field: &'static str, max: usize },
}

impl ProtocolError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ProtocolError::Malformed(_) | ProtocolError::UnsupportedFrame => {
                ErrorCode::MalformedPayload
            }
            ProtocolError::TooLarge { .. } => ErrorCode::PayloadTooLarge,
        }
    }
}
