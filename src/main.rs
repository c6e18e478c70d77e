//! CLI for fanout-relay
//!
//! Subcommands:
//! - `server`: run the relay
//! - `client`: connect to a socket endpoint, send one message and print
//!   everything relayed back (useful for smoke tests)

use std::process::ExitCode;

use clap::Parser;
use fanout_relay::config::load_config;
use fanout_relay::transport::{TopicRoute, build_router, serve};
use fanout_relay::upstream::{Backoff, Listener, RedisUpstream};
use fanout_relay::utils::logging;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::connect_async;
use tracing::{error, info};
use tungstenite::Message as WsMessage;

#[derive(Parser)]
#[command(name = "fanout-relay")]
enum Command {
    /// Start the relay server
    Server,
    /// Run the example socket client
    Client {
        /// WebSocket endpoint to connect to
        #[arg(long, default_value = "ws://127.0.0.1:8080/ws")]
        url: String,
        /// Message to send once connected
        #[arg(long, default_value = "hello from client")]
        message: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cmd = Command::parse();

    let result = match cmd {
        Command::Server => run_server().await,
        Command::Client { url, message } => {
            logging::init("info");
            run_client(&url, &message).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fanout-relay failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            return Err(e.into());
        }
    };
    logging::init(&settings.server.log_level);

    let upstream = RedisUpstream::connect(&settings.upstream.url).await?;
    let backoff = Backoff::from_settings(&settings.upstream);

    let routes: Vec<TopicRoute> = settings
        .topics
        .iter()
        .cloned()
        .map(|topic| TopicRoute::new(topic, settings.relay.queue_capacity))
        .collect();

    for route in &routes {
        let listener = Listener::subscribe(
            &upstream,
            &route.settings.channel,
            route.hub.clone(),
            backoff,
        )
        .await?;
        tokio::spawn(listener.run());
    }

    let listener = TcpListener::bind(settings.bind_addr()).await?;

    tokio::select! {
        result = serve(listener, build_router(&routes)) => {
            result?;
            error!("HTTP server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting.");
        }
    }

    Ok(())
}

async fn run_client(url: &str, message: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (mut ws_stream, _response) = connect_async(url).await?;
    info!(url, "connected");

    ws_stream.send(WsMessage::text(message.to_string())).await?;

    loop {
        tokio::select! {
            frame = ws_stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => println!("{}", text.as_str()),
                Some(Ok(WsMessage::Binary(bytes))) => println!("<{} bytes>", bytes.len()),
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
            _ = tokio::signal::ctrl_c() => {
                ws_stream.close(None).await?;
                break;
            }
        }
    }

    Ok(())
}
