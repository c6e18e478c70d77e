//! WebSocket front end.
//!
//! A socket client receives every broadcast of its hub verbatim and may send
//! frames of its own, which are broadcast to the whole hub, itself included.
//! The connection ends on the first read failure, remote close or write
//! failure; the registration guard then unregisters it.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::hub::{ClientKind, Hub, Message, Payload};

/// GET handler upgrading to a socket attached to the route's hub.
///
/// A request that cannot be upgraded is logged and answered with the
/// rejection; nothing is registered for it.
pub async fn upgrade(
    State(hub): State<Arc<Hub>>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match upgrade {
        Ok(ws) => {
            let name = hub.name().to_string();
            ws.on_failed_upgrade(move |e| {
                warn!(hub = %name, error = %e, "websocket upgrade failed");
            })
            .on_upgrade(move |socket| handle_socket(socket, hub))
        }
        Err(rejection) => {
            warn!(hub = hub.name(), error = %rejection, "rejected websocket upgrade");
            rejection.into_response()
        }
    }
}

fn to_ws_message(message: &Message) -> WsMessage {
    match &message.payload {
        Payload::Text(text) => WsMessage::Text(text.clone().into()),
        Payload::Binary(bytes) => WsMessage::Binary(bytes.clone().into()),
    }
}

async fn handle_socket(socket: WebSocket, hub: Arc<Hub>) {
    let (mut registration, mut outbox) = hub.attach(ClientKind::SendReceive);
    let client = registration.id().clone();
    info!(hub = hub.name(), client = %client, "client connected to socket");
    registration.begin_streaming();

    let (mut sink, mut stream) = socket.split();

    let writer = async {
        while let Some(message) = outbox.recv().await {
            if let Err(e) = sink.send(to_ws_message(&message)).await {
                debug!(client = %client, error = %e, "failed to write to socket");
                break;
            }
        }
    };

    let reader = async {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => {
                    hub.broadcast(text.as_str().to_owned());
                }
                Ok(WsMessage::Binary(bytes)) => {
                    hub.broadcast(bytes.to_vec());
                }
                Ok(WsMessage::Close(_)) => break,
                // ping/pong are answered by the protocol layer
                Ok(_) => {}
                Err(e) => {
                    debug!(client = %client, error = %e, "failed to read from socket");
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = writer => {}
        _ = reader => {}
    }

    drop(registration);
    let _ = sink.close().await;
    info!(hub = hub.name(), client = %client, "client disconnected from socket");
}
