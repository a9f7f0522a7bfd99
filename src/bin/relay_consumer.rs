// Copyright (c) 2025, The AMQP Relay Authors
// MIT License
// All rights reserved.

//! Demo consumer: runs the relay dispatcher on the main queue with a
//! handler that logs each event.

use amqp_relay::{
    admin,
    channel::new_amqp_channel,
    config::Config,
    dispatcher::RelayDispatcher,
    handler::{HandlerError, MessageHandler},
    message::Event,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

struct LoggingHandler;

#[async_trait]
impl MessageHandler for LoggingHandler {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        info!(
            message_id = event.message_id,
            kind = event.kind,
            payload = event.payload.to_string(),
            "processed"
        );
        Ok(())
    }
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

    let cfg = Config::from_env();

    let (_conn, channel) = match new_amqp_channel(&cfg, "relay-consumer").await {
        Ok(pair) => pair,
        Err(err) => {
            error!(error = err.to_string(), "broker unreachable");
            std::process::exit(1);
        }
    };

    if let Err(err) = admin::declare_topology(channel.clone(), &cfg).await {
        error!(error = err.to_string(), "declare failed");
        std::process::exit(1);
    }

    info!(
        queue = cfg.queue,
        max_retries = cfg.max_retries,
        prefetch = cfg.prefetch_count,
        "consumer up"
    );

    let dispatcher = RelayDispatcher::new(channel, &cfg, Arc::new(LoggingHandler));

    tokio::select! {
        result = dispatcher.consume_blocking("relay-consumer") => {
            if let Err(err) = result {
                error!(error = err.to_string(), "consumer stopped");
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }
}
