use serde::Deserialize;

/// Top-level configuration settings for the relay.
///
/// Groups the HTTP server, the upstream pub/sub source, the fan-out queues
/// and the list of topics served.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub upstream: UpstreamSettings,
    pub relay: RelaySettings,
    pub topics: Vec<TopicSettings>,
}

/// Configuration settings for the HTTP server.
///
/// Defines the bind address and the default log level.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

/// Configuration of the upstream pub/sub connection and its receive retry.
#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamSettings {
    pub url: String,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
}

/// Fan-out tuning shared by every hub.
#[derive(Debug, Deserialize, Clone)]
pub struct RelaySettings {
    /// Capacity of each client's outbound queue. A broadcast that finds the
    /// queue full is dropped for that client only.
    pub queue_capacity: usize,
}

/// One logical topic: an upstream channel, the hub fed from it, and the
/// endpoints clients use to attach to that hub.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct TopicSettings {
    pub name: String,
    pub channel: String,
    #[serde(default = "default_event")]
    pub event: String,
    #[serde(default)]
    pub sse_paths: Vec<String>,
    #[serde(default)]
    pub ws_path: Option<String>,
}

fn default_event() -> String {
    "message".to_string()
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub upstream: Option<PartialUpstreamSettings>,
    pub relay: Option<PartialRelaySettings>,
    pub topics: Option<Vec<TopicSettings>>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub log_level: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialUpstreamSettings {
    pub url: Option<String>,
    pub retry_initial_ms: Option<u64>,
    pub retry_max_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialRelaySettings {
    pub queue_capacity: Option<usize>,
}

/// Provides default values for `Settings`.
///
/// The default topics are the two feeds of the monitoring service: the
/// registration feed pushed over two event-stream endpoints and the socket
/// feed served on `/ws`.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
                log_level: "info".to_string(),
            },
            upstream: UpstreamSettings {
                url: "redis://127.0.0.1:6379".to_string(),
                retry_initial_ms: 50,
                retry_max_ms: 5000,
            },
            relay: RelaySettings {
                queue_capacity: 1024,
            },
            topics: vec![
                TopicSettings {
                    name: "monitoring-patient".to_string(),
                    channel: "monitoring-patient".to_string(),
                    event: "new-regis".to_string(),
                    sse_paths: vec![
                        "/sse/registration".to_string(),
                        "/sse/patient-result".to_string(),
                    ],
                    ws_path: None,
                },
                TopicSettings {
                    name: "ws-monitoring-patient".to_string(),
                    channel: "ws-monitoring-patient".to_string(),
                    event: default_event(),
                    sse_paths: Vec::new(),
                    ws_path: Some("/ws".to_string()),
                },
            ],
        }
    }
}
