use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;

use super::{sse, websocket};
use crate::config::TopicSettings;
use crate::hub::{Hub, HubStats};
use crate::utils::error::RelayError;

/// A topic's settings paired with the hub serving it.
#[derive(Debug, Clone)]
pub struct TopicRoute {
    pub settings: TopicSettings,
    pub hub: Arc<Hub>,
}

impl TopicRoute {
    /// Creates the hub for `settings`.
    pub fn new(settings: TopicSettings, queue_capacity: usize) -> Self {
        let hub = Arc::new(Hub::new(
            settings.name.clone(),
            settings.event.as_str(),
            queue_capacity,
        ));
        Self { settings, hub }
    }
}

#[derive(Debug, Serialize)]
struct TopicHealth {
    channel: String,
    #[serde(flatten)]
    stats: HubStats,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    topics: Vec<TopicHealth>,
}

/// Build the router: every topic's endpoints plus `/health`.
///
/// CORS is fully permissive and socket upgrades accept any origin; access
/// control is expected in front of the relay.
pub fn build_router(topics: &[TopicRoute]) -> Router {
    let mut router = Router::new();

    for topic in topics {
        for path in &topic.settings.sse_paths {
            router = router.merge(
                Router::new()
                    .route(path, get(sse::event_stream))
                    .with_state(Arc::clone(&topic.hub)),
            );
        }
        if let Some(path) = &topic.settings.ws_path {
            router = router.merge(
                Router::new()
                    .route(path, get(websocket::upgrade))
                    .with_state(Arc::clone(&topic.hub)),
            );
        }
    }

    router
        .merge(
            Router::new()
                .route("/health", get(health_handler))
                .with_state(Arc::new(topics.to_vec())),
        )
        .layer(CorsLayer::permissive())
}

/// GET /health
async fn health_handler(State(topics): State<Arc<Vec<TopicRoute>>>) -> Json<HealthResponse> {
    let topics = topics
        .iter()
        .map(|topic| TopicHealth {
            channel: topic.settings.channel.clone(),
            stats: topic.hub.stats(),
        })
        .collect();
    Json(HealthResponse {
        status: "ok",
        topics,
    })
}

/// Serve `router` on `listener` until the server fails.
pub async fn serve(listener: TcpListener, router: Router) -> Result<(), RelayError> {
    let addr = listener.local_addr()?;
    info!(%addr, "relay listening");
    axum::serve(listener, router).await?;
    Ok(())
}
