//! Push-channel frame parsing.
//!
//! The backend speaks Socket.IO over a WebSocket (engine.io v4 framing) but
//! plain JSON event objects are accepted as well so a bare WebSocket relay
//! can drive the dashboard.

use serde_json::Value;
use url::Url;

use crate::error::{PipePulseError, Result};

/// Engine.io reply to a server ping.
pub const PONG: &str = "3";
/// Socket.IO connect request for the default namespace.
pub const NAMESPACE_CONNECT: &str = "40";

const SOCKET_IO_PATH: &str = "socket.io/";
const SOCKET_IO_QUERY: &str = "EIO=4&transport=websocket";

/// Named events carried by the push channel. Payloads are not consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    Connect,
    Disconnect,
    PipelineUpdate,
    BuildUpdate,
    Other(String),
}

impl PushEvent {
    pub fn from_name(name: &str) -> Self {
        match name {
            "connect" => PushEvent::Connect,
            "disconnect" => PushEvent::Disconnect,
            "pipeline_update" => PushEvent::PipelineUpdate,
            "build_update" => PushEvent::BuildUpdate,
            other => PushEvent::Other(other.to_string()),
        }
    }

    /// Update events each request one full refresh cycle.
    pub fn triggers_refresh(&self) -> bool {
        matches!(self, PushEvent::PipelineUpdate | PushEvent::BuildUpdate)
    }
}

/// What a single text frame asks the connection to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushFrame {
    /// Engine.io handshake; answer with [`NAMESPACE_CONNECT`]
    Open,
    /// Engine.io ping; answer with [`PONG`]
    Ping,
    /// Engine.io close
    Close,
    Event(PushEvent),
    Ignored,
}

pub fn parse_frame(text: &str) -> PushFrame {
    let text = text.trim();
    if text.is_empty() {
        return PushFrame::Ignored;
    }

    if text.starts_with('{') {
        return parse_json_event(text);
    }

    let mut chars = text.chars();
    match chars.next() {
        Some('0') => PushFrame::Open,
        Some('1') => PushFrame::Close,
        Some('2') => PushFrame::Ping,
        Some('4') => parse_socket_io_packet(chars.as_str()),
        _ => PushFrame::Ignored,
    }
}

fn parse_json_event(text: &str) -> PushFrame {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return PushFrame::Ignored;
    };

    ["event", "type"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map_or(PushFrame::Ignored, |name| {
            PushFrame::Event(PushEvent::from_name(name))
        })
}

fn parse_socket_io_packet(packet: &str) -> PushFrame {
    let mut chars = packet.chars();
    match chars.next() {
        Some('0') => PushFrame::Event(PushEvent::Connect),
        Some('1') => PushFrame::Event(PushEvent::Disconnect),
        Some('2') => parse_socket_io_event(chars.as_str()),
        _ => PushFrame::Ignored,
    }
}

/// `42["build_update", {...}]`, optionally with a namespace or ack id
/// before the array.
fn parse_socket_io_event(body: &str) -> PushFrame {
    let Some(start) = body.find('[') else {
        return PushFrame::Ignored;
    };

    match serde_json::from_str::<Value>(&body[start..]) {
        Ok(Value::Array(items)) => items
            .first()
            .and_then(Value::as_str)
            .map_or(PushFrame::Ignored, |name| {
                PushFrame::Event(PushEvent::from_name(name))
            }),
        _ => PushFrame::Ignored,
    }
}

/// Derives the Socket.IO WebSocket endpoint from the REST base URL.
pub fn derive_push_url(base_url: &Url) -> Result<Url> {
    let mut url = base_url.clone();
    let scheme = match base_url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(PipePulseError::Config(format!(
                "Cannot derive push URL from '{other}' scheme"
            )))
        }
    };

    url.set_scheme(scheme)
        .map_err(|()| PipePulseError::Config(format!("Invalid push URL scheme for {base_url}")))?;

    let mut url = url
        .join(SOCKET_IO_PATH)
        .map_err(|e| PipePulseError::Config(format!("Invalid push URL: {e}")))?;
    url.set_query(Some(SOCKET_IO_QUERY));
    Ok(url)
}
