//! Configuration loading.
//!
//! Sources are layered the same way for every deployment: built-in defaults,
//! then an optional `config/default.*` file, then `RELAY_`-prefixed
//! environment variables (`__` separates nesting, e.g. `RELAY_SERVER__PORT`).
//! A `.env` file in the working directory is loaded into the environment
//! first when present.

mod settings;

use std::collections::HashSet;

use crate::config::settings::PartialSettings;
use crate::utils::error::RelayError;
use config::{Config, Environment, File};

pub use settings::{RelaySettings, ServerSettings, Settings, TopicSettings, UpstreamSettings};

/// Loads the configuration from the default file and environment variables,
/// merges it over the default values and validates the result.
pub fn load_config() -> Result<Settings, RelayError> {
    let _ = dotenvy::dotenv();

    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("RELAY")
                .prefix_separator("_")
                .separator("__"),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    let settings = merge(partial, Settings::default());
    settings.validate()?;
    Ok(settings)
}

fn merge(partial: PartialSettings, default: Settings) -> Settings {
    let server = partial.server;
    let upstream = partial.upstream;
    let relay = partial.relay;

    Settings {
        server: ServerSettings {
            host: server
                .as_ref()
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            port: server
                .as_ref()
                .and_then(|s| s.port)
                .unwrap_or(default.server.port),
            log_level: server
                .as_ref()
                .and_then(|s| s.log_level.clone())
                .unwrap_or(default.server.log_level),
        },
        upstream: UpstreamSettings {
            url: upstream
                .as_ref()
                .and_then(|u| u.url.clone())
                .unwrap_or(default.upstream.url),
            retry_initial_ms: upstream
                .as_ref()
                .and_then(|u| u.retry_initial_ms)
                .unwrap_or(default.upstream.retry_initial_ms),
            retry_max_ms: upstream
                .as_ref()
                .and_then(|u| u.retry_max_ms)
                .unwrap_or(default.upstream.retry_max_ms),
        },
        relay: RelaySettings {
            queue_capacity: relay
                .as_ref()
                .and_then(|r| r.queue_capacity)
                .unwrap_or(default.relay.queue_capacity),
        },
        topics: partial.topics.unwrap_or(default.topics),
    }
}

impl Settings {
    /// Address the HTTP server binds to.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Rejects settings the relay cannot run with.
    ///
    /// Each upstream channel gets exactly one listener, so channels must be
    /// unique across topics, and every endpoint path must be unique across
    /// the router.
    pub fn validate(&self) -> Result<(), RelayError> {
        let invalid = |msg: String| Err(RelayError::InvalidSettings(msg));

        if self.relay.queue_capacity == 0 {
            return invalid("relay.queue_capacity must be at least 1".to_string());
        }
        if self.upstream.retry_initial_ms > self.upstream.retry_max_ms {
            return invalid(format!(
                "upstream.retry_initial_ms ({}) exceeds upstream.retry_max_ms ({})",
                self.upstream.retry_initial_ms, self.upstream.retry_max_ms
            ));
        }

        let mut channels = HashSet::new();
        let mut paths = HashSet::new();
        for topic in &self.topics {
            if topic.channel.is_empty() {
                return invalid(format!("topic '{}' has an empty channel", topic.name));
            }
            if !channels.insert(topic.channel.as_str()) {
                return invalid(format!("channel '{}' is used by more than one topic", topic.channel));
            }
            if topic.event.is_empty() || topic.event.contains(['\n', '\r']) {
                return invalid(format!("topic '{}' has an invalid event name", topic.name));
            }
            for path in topic.sse_paths.iter().chain(topic.ws_path.iter()) {
                if !path.starts_with('/') {
                    return invalid(format!("path '{path}' must start with '/'"));
                }
                if !is_static_path(path) {
                    return invalid(format!("path '{path}' must be a plain path without captures or wildcards"));
                }
                if path == "/health" || !paths.insert(path.as_str()) {
                    return invalid(format!("path '{path}' is already routed"));
                }
            }
        }
        Ok(())
    }
}

/// Endpoint paths are literal: no `:`/`*` segments and no `{}` captures,
/// which the router would either reject at start-up or treat as patterns.
fn is_static_path(path: &str) -> bool {
    !path.contains(['{', '}'])
        && path
            .split('/')
            .all(|segment| !segment.starts_with([':', '*']))
}
