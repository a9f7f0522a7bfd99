// Copyright (c) 2025, The AMQP Relay Authors
// MIT License
// All rights reserved.

//! Demo publisher: publishes events to the main exchange with a
//! confirmation wait per message.

use amqp_relay::{
    admin, channel::new_amqp_channel, config::Config, message::Event,
    publisher::ConfirmedPublisher,
};
use clap::Parser;
use serde_json::json;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "relay-publisher", about = "Publish demo events with publisher confirms")]
struct Cli {
    /// Messages to publish
    #[arg(long, default_value_t = 1)]
    count: usize,

    /// Routing key override (defaults to the configured key)
    #[arg(long)]
    key: Option<String>,

    /// Per-message publish+confirm timeout override, in milliseconds
    #[arg(long = "timeout-ms")]
    timeout_ms: Option<u64>,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let cfg = Config::from_env();

    let routing_key = cli.key.unwrap_or_else(|| cfg.routing_key.clone());
    let timeout = Duration::from_millis(cli.timeout_ms.unwrap_or(cfg.publish_timeout_ms));

    let (_conn, channel) = match new_amqp_channel(&cfg, "relay-publisher").await {
        Ok(pair) => pair,
        Err(err) => {
            error!(error = err.to_string(), "broker unreachable");
            std::process::exit(1);
        }
    };

    // idempotent; makes the publisher safe to start first
    if let Err(err) = admin::declare_topology(channel.clone(), &cfg).await {
        error!(error = err.to_string(), "declare failed");
        std::process::exit(1);
    }

    let publisher = match ConfirmedPublisher::new(channel).await {
        Ok(p) => p,
        Err(err) => {
            error!(error = err.to_string(), "confirm mode failed");
            std::process::exit(1);
        }
    };

    for n in 0..cli.count {
        let event = Event::new(
            "demo",
            json!({"n": n, "ts": chrono::Utc::now().to_rfc3339()}),
        );

        match publisher
            .publish(&cfg.exchange, &routing_key, &event, timeout)
            .await
        {
            Ok(()) => info!(message_id = event.message_id, key = routing_key, "published"),
            Err(err) => {
                error!(
                    error = err.to_string(),
                    message_id = event.message_id,
                    "publish failed"
                );
                std::process::exit(1);
            }
        }
    }
}
