//! Typed gateway events.
//!
//! The gateway deserialises dispatch payloads into [`GatewayEvent`] so the bot
//! loop pattern-matches on typed data instead of raw `(op, t, Value)` tuples.

use serde::de::DeserializeOwned;
use tracing::warn;

use crate::types::*;

// ---------------------------------------------------------------------------
// The top-level event enum
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// Identified or resumed; carries the application id.
    Ready(ReadyEvent),

    /// A slash command (or other interaction) was invoked.
    InteractionCreate(Interaction),

    /// Op 11.
    HeartbeatAck,

    /// Op 1: heartbeat immediately.
    HeartbeatRequest,

    /// Op 7.
    Reconnect,

    /// Op 9. `true` when the session may be resumed.
    InvalidSession(bool),

    /// Anything without a typed variant. Kept so the loop can log it.
    Unknown {
        event_name: Option<String>,
        op: u8,
        data: Option<serde_json::Value>,
    },
}

impl GatewayEvent {
    /// Never fails; unrecognised or malformed events become
    /// [`GatewayEvent::Unknown`].
    pub fn from_payload(payload: GatewayPayload) -> Self {
        match payload.op {
            0 => Self::parse_dispatch(payload.t, payload.d),
            1 => GatewayEvent::HeartbeatRequest,
            7 => GatewayEvent::Reconnect,
            9 => GatewayEvent::InvalidSession(
                payload.d.as_ref().and_then(|v| v.as_bool()).unwrap_or(false),
            ),
            11 => GatewayEvent::HeartbeatAck,
            _ => GatewayEvent::Unknown {
                event_name: payload.t,
                op: payload.op,
                data: payload.d,
            },
        }
    }

    fn parse_dispatch(event_name: Option<String>, data: Option<serde_json::Value>) -> Self {
        let (Some(name), Some(d)) = (event_name.as_deref(), data.as_ref()) else {
            return GatewayEvent::Unknown {
                event_name,
                op: 0,
                data,
            };
        };

        let parsed = match name {
            "READY" => typed(name, d, GatewayEvent::Ready),
            "INTERACTION_CREATE" => typed(name, d, GatewayEvent::InteractionCreate),
            _ => None,
        };

        parsed.unwrap_or(GatewayEvent::Unknown {
            event_name,
            op: 0,
            data,
        })
    }

    /// Dispatch name for logging.
    pub fn name(&self) -> &str {
        match self {
            GatewayEvent::Ready(_) => "READY",
            GatewayEvent::InteractionCreate(_) => "INTERACTION_CREATE",
            GatewayEvent::HeartbeatAck => "HEARTBEAT_ACK",
            GatewayEvent::HeartbeatRequest => "HEARTBEAT",
            GatewayEvent::Reconnect => "RECONNECT",
            GatewayEvent::InvalidSession(_) => "INVALID_SESSION",
            GatewayEvent::Unknown { event_name, .. } => event_name.as_deref().unwrap_or("UNKNOWN"),
        }
    }
}

fn typed<T: DeserializeOwned>(
    name: &str,
    data: &serde_json::Value,
    wrap: impl FnOnce(T) -> GatewayEvent,
) -> Option<GatewayEvent> {
    match T::deserialize(data) {
        Ok(value) => Some(wrap(value)),
        Err(e) => {
            warn!(event = name, error = %e, "failed to parse dispatch payload");
            None
        }
    }
}
