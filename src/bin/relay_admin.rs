// Copyright (c) 2025, The AMQP Relay Authors
// MIT License
// All rights reserved.

//! One-shot admin tool: topology bootstrap and quarantine drain.

use amqp_relay::{admin, channel::new_amqp_channel, config::Config, publisher::ConfirmedPublisher};
use clap::{CommandFactory, Parser};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "relay-admin", about = "Relay topology and quarantine administration")]
struct Cli {
    /// Declare exchanges, queues and bindings, then exit
    #[arg(long)]
    setup: bool,

    /// Move messages from the quarantine queue back to the main exchange
    #[arg(long = "republish-dlq")]
    republish_dlq: bool,

    /// Maximum number of messages to republish
    #[arg(long, default_value_t = 50)]
    limit: usize,
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

    if !cli.setup && !cli.republish_dlq {
        let _ = Cli::command().print_help();
        std::process::exit(2);
    }

    let cfg = Config::from_env();

    let (_conn, channel) = match new_amqp_channel(&cfg, "relay-admin").await {
        Ok(pair) => pair,
        Err(err) => {
            error!(error = err.to_string(), "broker unreachable");
            std::process::exit(1);
        }
    };

    if cli.setup {
        if let Err(err) = admin::declare_topology(channel, &cfg).await {
            error!(error = err.to_string(), "declare failed");
            std::process::exit(1);
        }
        info!("topology set");
        return;
    }

    let publisher = match ConfirmedPublisher::new(channel.clone()).await {
        Ok(p) => p,
        Err(err) => {
            error!(error = err.to_string(), "confirm mode failed");
            std::process::exit(1);
        }
    };

    match admin::drain_quarantine(channel, &publisher, &cfg, cli.limit).await {
        Ok(drained) => info!(drained, "quarantine drain complete"),
        Err(err) => {
            error!(error = err.to_string(), "drain failed");
            std::process::exit(1);
        }
    }
}
