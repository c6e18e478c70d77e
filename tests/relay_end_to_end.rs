//! End-to-end: upstream channel -> listener -> hub -> event stream / socket.

use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use fanout_relay::config::Settings;
use fanout_relay::transport::{TopicRoute, build_router, serve};
use fanout_relay::upstream::{Backoff, Listener, MemoryUpstream};
use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tower::ServiceExt;

async fn start_listeners(upstream: &MemoryUpstream, routes: &[TopicRoute]) {
    let backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(10));
    for route in routes {
        let listener = Listener::subscribe(upstream, &route.settings.channel, route.hub.clone(), backoff)
            .await
            .expect("subscribe");
        tokio::spawn(listener.run());
    }
}

#[tokio::test]
async fn upstream_messages_reach_event_stream_clients_in_order() {
    let settings = Settings::default();
    let routes: Vec<TopicRoute> = settings
        .topics
        .into_iter()
        .map(|topic| TopicRoute::new(topic, settings.relay.queue_capacity))
        .collect();
    let upstream = MemoryUpstream::default();
    start_listeners(&upstream, &routes).await;

    let resp = build_router(&routes)
        .oneshot(Request::builder().uri("/sse/registration").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let mut body = resp.into_body().into_data_stream();

    upstream.publish("monitoring-patient", "{\"uid\":\"a1\"}");
    upstream.publish("monitoring-patient", "{\"uid\":\"a2\"}");

    let mut ids = Vec::new();
    for expected in ["{\"uid\":\"a1\"}", "{\"uid\":\"a2\"}"] {
        let chunk = timeout(Duration::from_secs(2), body.next())
            .await
            .expect("frame not delivered")
            .unwrap()
            .unwrap();
        let frame = String::from_utf8(chunk.to_vec()).unwrap();
        let mut lines = frame.lines();
        assert_eq!(lines.next(), Some("event: new-regis"));
        let id: u64 = lines
            .next()
            .and_then(|line| line.strip_prefix("id: "))
            .and_then(|id| id.parse().ok())
            .expect("id line");
        assert_eq!(lines.next(), Some(format!("data: {expected}").as_str()));
        assert!(frame.ends_with("\n\n"));
        ids.push(id);
    }
    assert!(ids[0] < ids[1]);
}

#[tokio::test]
async fn upstream_messages_reach_socket_clients_verbatim() {
    let settings = Settings::default();
    let routes: Vec<TopicRoute> = settings
        .topics
        .into_iter()
        .map(|topic| TopicRoute::new(topic, 8))
        .collect();
    let ws_hub = routes[1].hub.clone();
    let upstream = MemoryUpstream::default();
    start_listeners(&upstream, &routes).await;

    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    let server = tokio::spawn(serve(tcp, build_router(&routes)));

    let (mut ws, _) = connect_async(format!("ws://{addr}/ws").as_str()).await.unwrap();
    timeout(Duration::from_secs(2), async {
        while ws_hub.client_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("socket never registered");

    // Only the socket topic's channel reaches the socket.
    upstream.publish("monitoring-patient", "not for sockets");
    upstream.publish("ws-monitoring-patient", "{\"status\":\"done\"}");

    let msg = timeout(Duration::from_secs(2), ws.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(msg.to_text().unwrap(), "{\"status\":\"done\"}");

    server.abort();
}
