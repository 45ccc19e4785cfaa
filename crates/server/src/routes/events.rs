use std::collections::HashSet;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use deployment::Deployment;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::DeploymentImpl;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    JoinProject {
        #[serde(alias = "projectId")]
        project_id: Uuid,
    },
    AgentMessage {
        #[serde(default)]
        #[allow(dead_code)]
        content: Option<String>,
    },
}

pub async fn stream_events_ws(
    ws: WebSocketUpgrade,
    State(deployment): State<DeploymentImpl>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = handle_events_ws(socket, deployment).await {
            tracing::warn!("events WS closed: {}", e);
        }
    })
}

/// Streams event history then live events. A connection that has joined
/// one or more projects only receives envelopes tagged with those
/// projects (untagged envelopes go to everyone); a connection that never
/// joins gets the firehose.
async fn handle_events_ws(socket: WebSocket, deployment: DeploymentImpl) -> anyhow::Result<()> {
    let mut stream = deployment.events().msg_store().history_plus_stream();
    let (mut sender, mut receiver) = socket.split();
    let mut joined: HashSet<Uuid> = HashSet::new();

    loop {
        tokio::select! {
            item = stream.next() => {
                match item {
                    Some(Ok(msg)) => {
                        let deliver = joined.is_empty()
                            || msg.project_id().is_none_or(|id| joined.contains(&id));
                        if deliver && sender.send(msg.to_ws_message_unchecked()).await.is_err() {
                            break; // client disconnected
                        }
                    }
                    Some(Err(e)) => {
                        tracing::error!("stream error: {}", e);
                        continue;
                    }
                    None => break,
                }
            }
            incoming = receiver.next() => {
                let Some(Ok(frame)) = incoming else {
                    break;
                };
                let Message::Text(text) = frame else {
                    continue;
                };
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::JoinProject { project_id }) => {
                        joined.insert(project_id);
                        let confirmation = json!({
                            "type": "connection_confirmed",
                            "project_id": project_id,
                        });
                        if sender
                            .send(Message::Text(confirmation.to_string().into()))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Ok(ClientMessage::AgentMessage { .. }) => {
                        let ack = json!({
                            "type": "agent_response",
                            "message": "Agent received your message",
                        });
                        if sender.send(Message::Text(ack.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::debug!("ignoring malformed WS message: {}", err);
                    }
                }
            }
        }
    }

    let _ = sender.close().await;
    Ok(())
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new().route("/events/ws", get(stream_events_ws))
}
