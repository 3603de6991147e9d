pub mod codec;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Unique identifier assigned to a client for the broker's lifetime.
pub type ClientId = u64;

/// Correlation id for a host-directed request/response pair.
pub type RequestId = u64;

/// Maximum size of an inbound JSON-lines frame, terminator included (5 MiB).
/// Exceeding this is fatal to the connection.
pub const MAX_FRAME_BYTES: usize = 5 * 1024 * 1024;

/// Per-client outbound queue depth. Frames beyond this are dropped.
pub const OUTBOX_CAPACITY: usize = 64;

/// How long the host gets to answer a forwarded request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Default TCP listen port.
pub const DEFAULT_PORT: u16 = 8080;

/// Event names the broker distinguishes. Anything else is relayed to the
/// host as a correlated request (or broadcast, when the host sent it).
pub mod event {
    pub const HANDSHAKE: &str = "handshake";
    pub const CURSOR_MOVE: &str = "cursor_move";
    pub const CURSOR_LEAVE: &str = "cursor_leave";
    pub const UPDATE_CONTENT: &str = "update_content";
    pub const USER_JOINED: &str = "user_joined";
    pub const USER_LEFT: &str = "user_left";
    pub const NEW_HOST: &str = "new_host";
    pub const ERROR: &str = "error";
}

/// Whether `event` fans out to every session except its sender.
pub fn is_broadcast_event(event: &str) -> bool {
    matches!(
        event,
        event::CURSOR_MOVE | event::CURSOR_LEAVE | event::UPDATE_CONTENT
    )
}

/// One JSON-lines frame on the wire.
///
/// Only the fields the broker reads or stamps are typed; everything else a
/// client sends rides in `extra` and is relayed byte-for-byte untouched.
/// The broker never interprets payload bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,

    /// Declared client name: asserted in `handshake`, stamped on broadcasts,
    /// and carried in `user_joined`/`user_left`/`new_host`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Assigned client id in `user_joined`/`user_left`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<ClientId>,

    /// Sender id stamped on broadcasts and forwarded requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_id: Option<ClientId>,

    /// Correlation id for host-directed request/response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,

    /// Newly elected host in `new_host`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_id: Option<ClientId>,

    /// Host flag in `user_joined`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_host: Option<bool>,

    /// Host-role claim a client may assert in its `handshake`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<bool>,

    /// Human-readable text in `error` frames.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Everything else: client payload the broker relays without looking.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Frame {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            name: None,
            id: None,
            from_id: None,
            request_id: None,
            host_id: None,
            is_host: None,
            host: None,
            message: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        let mut frame = Self::new(event::ERROR);
        frame.message = Some(message.into());
        frame
    }

    pub fn user_joined(id: ClientId, name: &str, is_host: bool) -> Self {
        let mut frame = Self::new(event::USER_JOINED);
        frame.id = Some(id);
        frame.name = Some(name.to_string());
        frame.is_host = Some(is_host);
        frame
    }

    pub fn user_left(id: ClientId, name: &str) -> Self {
        let mut frame = Self::new(event::USER_LEFT);
        frame.id = Some(id);
        frame.name = Some(name.to_string());
        frame
    }

    pub fn new_host(host_id: ClientId, name: &str) -> Self {
        let mut frame = Self::new(event::NEW_HOST);
        frame.host_id = Some(host_id);
        frame.name = Some(name.to_string());
        frame
    }

    /// Serialize to a single wire line (without the `\n` terminator).
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
