use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::state::AppState;
use crate::display::DisplayPriority;
use crate::error::RelayError;
use crate::hub::SessionHub;
use crate::proto::{CloudToGlassesMessage, CloudToTpaMessage, GlassesMessage, TpaMessage};

/// GET /ws/glasses
/// Glasses client channel: text control frames plus binary audio
pub async fn ws_glasses(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| glasses_connection(state.hub, socket))
}

/// GET /ws/tpa
/// TPA channel: one connection per (session, package) pair
pub async fn ws_tpa(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| tpa_connection(state.hub, socket))
}

async fn glasses_connection(hub: Arc<SessionHub>, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();

    // The first frame must be connection_init, within the handshake bound.
    let init = match tokio::time::timeout(hub.handshake_timeout(), stream.next()).await {
        Err(_) => Err(RelayError::HandshakeTimeout.to_string()),
        Ok(Some(Ok(Message::Text(text)))) => match serde_json::from_str::<GlassesMessage>(&text) {
            Ok(GlassesMessage::ConnectionInit { user_id, .. }) => {
                Ok(user_id.unwrap_or_else(|| "anonymous".to_string()))
            }
            _ => Err("expected connection_init as first frame".to_string()),
        },
        Ok(_) => Err("expected connection_init as first frame".to_string()),
    };

    let user_id = match init {
        Ok(user_id) => user_id,
        Err(message) => {
            warn!(%message, "glasses handshake failed");
            send_frame(&mut sink, &CloudToGlassesMessage::ConnectionError { message }).await;
            return;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let session_id = hub.create_session(&user_id, tx.clone()).await;
    let _ = tx.send(CloudToGlassesMessage::ConnectionAck {
        session_id: session_id.clone(),
    });
    // The hub's session row holds the only remaining sender.
    drop(tx);

    // Writer task: drains hub pushes into the socket. When the hub drops
    // its sender the channel closes and the socket is shut down.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match serde_json::to_string(&frame) {
                Ok(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(err) => error!(%err, "failed to encode glasses frame"),
            }
        }
        let _ = sink.close().await;
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => hub.dispatch_glasses_frame(&session_id, &text).await,
            Ok(Message::Binary(pcm)) => hub.handle_audio(&session_id, &pcm).await,
            Ok(Message::Close(_)) => break,
            Err(_) => {
                warn!(session_id, "{}", RelayError::TransportClosed);
                break;
            }
            Ok(_) => {}
        }
    }

    info!(session_id, "glasses connection closed");
    hub.end_session(&session_id).await;
    writer.abort();
}

async fn tpa_connection(hub: Arc<SessionHub>, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();

    let init = match tokio::time::timeout(hub.handshake_timeout(), stream.next()).await {
        Err(_) => Err(RelayError::HandshakeTimeout.to_string()),
        Ok(Some(Ok(Message::Text(text)))) => match serde_json::from_str::<TpaMessage>(&text) {
            Ok(TpaMessage::TpaConnectionInit {
                package_name,
                session_id,
                api_key,
            }) => Ok((package_name, session_id, api_key)),
            _ => Err("expected tpa_connection_init as first frame".to_string()),
        },
        Ok(_) => Err("expected tpa_connection_init as first frame".to_string()),
    };

    let (package_name, session_id, api_key) = match init {
        Ok(init) => init,
        Err(message) => {
            warn!(%message, "TPA handshake failed");
            send_frame(
                &mut sink,
                &CloudToTpaMessage::TpaConnectionError {
                    message,
                    code: None,
                },
            )
            .await;
            return;
        }
    };

    // The hub's AppSession row is the only sender: when the hub drops it
    // (stop, replacement, or session end), the writer sees the channel
    // close and shuts the socket down.
    let (tx, mut rx) = mpsc::unbounded_channel();
    if let Err(err) = hub
        .handle_tpa_init(&session_id, &package_name, &api_key, tx)
        .await
    {
        warn!(session_id, package_name, %err, "TPA init rejected");
        send_frame(
            &mut sink,
            &CloudToTpaMessage::TpaConnectionError {
                message: err.to_string(),
                code: error_code(&err),
            },
        )
        .await;
        return;
    }

    // The hub pushed tpa_connection_ack through the channel; the writer
    // delivers it first.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match serde_json::to_string(&frame) {
                Ok(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(err) => error!(%err, "failed to encode TPA frame"),
            }
        }
        let _ = sink.close().await;
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                handle_tpa_frame(&hub, &session_id, &package_name, &text).await;
            }
            Ok(Message::Close(_)) => break,
            Err(_) => {
                warn!(session_id, package_name, "{}", RelayError::TransportClosed);
                break;
            }
            Ok(_) => {}
        }
    }

    hub.handle_transport_close(&session_id, &package_name).await;
    writer.abort();
}

/// Frames after the handshake are attributed to the authenticated package;
/// the packageName field inside them is not trusted.
async fn handle_tpa_frame(hub: &Arc<SessionHub>, session_id: &str, package_name: &str, text: &str) {
    match serde_json::from_str::<TpaMessage>(text) {
        Ok(TpaMessage::DisplayEvent {
            layout,
            duration_ms,
            ..
        }) => {
            let accepted = hub
                .handle_display_request(
                    session_id,
                    package_name,
                    layout,
                    DisplayPriority::App,
                    duration_ms,
                )
                .await;
            if !accepted {
                debug!(session_id, package_name, "display request denied");
            }
        }
        Ok(TpaMessage::SubscriptionUpdate { subscriptions, .. }) => {
            // The hub sends the TPA its error frame on rejection.
            if let Err(err) = hub
                .handle_subscription_update(session_id, package_name, &subscriptions)
                .await
            {
                warn!(session_id, package_name, %err, "subscription update rejected");
            }
        }
        Ok(TpaMessage::TpaConnectionInit { .. }) => {
            debug!(session_id, package_name, "duplicate init ignored");
        }
        Err(err) => {
            warn!(session_id, package_name, %err, "malformed TPA frame");
        }
    }
}

fn error_code(err: &RelayError) -> Option<String> {
    let code = match err {
        RelayError::CredentialInvalid { .. } => "invalid_credentials",
        RelayError::NotPending { .. } => "not_pending",
        RelayError::SessionNotFound(_) => "session_not_found",
        RelayError::AppNotFound(_) => "app_not_found",
        _ => return None,
    };
    Some(code.to_string())
}

async fn send_frame<T, S>(sink: &mut S, frame: &T)
where
    T: serde::Serialize,
    S: SinkExt<Message> + Unpin,
{
    if let Ok(text) = serde_json::to_string(frame) {
        let _ = sink.send(Message::Text(text)).await;
    }
}
