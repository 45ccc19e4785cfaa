use axum::extract::ws::Message as WsMessage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One event as delivered to WebSocket clients.
///
/// `project_id` is the routing tag: connections that joined specific
/// projects only receive envelopes tagged with one of them. Untagged
/// envelopes go to everyone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub project_id: Option<Uuid>,
    #[serde(flatten)]
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventMsg {
    Event(EventEnvelope),
    Finished,
}

impl EventMsg {
    pub fn event(event_type: &str, project_id: Option<Uuid>, payload: Value) -> Self {
        EventMsg::Event(EventEnvelope {
            event_type: event_type.to_string(),
            project_id,
            payload,
        })
    }

    pub fn project_id(&self) -> Option<Uuid> {
        match self {
            EventMsg::Event(envelope) => envelope.project_id,
            EventMsg::Finished => None,
        }
    }

    /// Serialize for the wire. Only valid for variants that serialize
    /// cleanly, which all of ours do.
    pub fn to_ws_message_unchecked(&self) -> WsMessage {
        let text = match self {
            EventMsg::Event(envelope) => {
                serde_json::to_string(envelope).expect("event envelope serializes")
            }
            EventMsg::Finished => r#"{"type":"finished"}"#.to_string(),
        };
        WsMessage::Text(text.into())
    }

    pub fn approx_bytes(&self) -> usize {
        match self {
            EventMsg::Event(envelope) => {
                envelope.event_type.len()
                    + serde_json::to_string(&envelope.payload)
                        .map(|s| s.len())
                        .unwrap_or(2)
                    + 16
            }
            EventMsg::Finished => 8,
        }
    }
}
