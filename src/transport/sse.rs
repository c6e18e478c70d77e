//! Event-stream (server-sent events) front end.
//!
//! The delivery loop is the response body itself: every queued message is
//! framed and handed to the HTTP layer as its own chunk, so it goes out
//! immediately. The client's registration lives inside the body stream, so
//! it is released when the body is dropped: queue closed, client gone, or a
//! write failure.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use futures_util::stream;
use tracing::info;

use crate::hub::{ClientKind, Hub, Message};

/// Frames one message as an event-stream record.
///
/// Each line of the payload becomes its own `data:` field, so payloads with
/// line breaks survive the framing.
pub fn encode_frame(message: &Message) -> String {
    let data = message.payload.as_text();
    let mut frame = String::with_capacity(data.len() + message.event.len() + 40);

    frame.push_str("event: ");
    frame.push_str(&message.event);
    frame.push_str("\nid: ");
    frame.push_str(&message.id.to_string());
    frame.push('\n');

    let normalized = data.replace("\r\n", "\n");
    for line in normalized.split(['\r', '\n']) {
        frame.push_str("data: ");
        frame.push_str(line);
        frame.push('\n');
    }
    frame.push('\n');
    frame
}

/// GET handler attaching an event-stream client to the route's hub.
pub async fn event_stream(State(hub): State<Arc<Hub>>) -> Response {
    let (mut registration, outbox) = hub.attach(ClientKind::SendOnly);
    info!(hub = hub.name(), client = %registration.id(), "client connected to event stream");
    registration.begin_streaming();

    let frames = stream::unfold(
        (registration, outbox),
        |(registration, mut outbox)| async move {
            let message = outbox.recv().await?;
            let chunk = Bytes::from(encode_frame(&message));
            Some((Ok::<_, Infallible>(chunk), (registration, outbox)))
        },
    );

    (
        [
            (CONTENT_TYPE, "text/event-stream"),
            (CACHE_CONTROL, "no-cache"),
            (CONNECTION, "keep-alive"),
        ],
        Body::from_stream(frames),
    )
        .into_response()
}
