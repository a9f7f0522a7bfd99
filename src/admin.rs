// Copyright (c) 2025, The AMQP Relay Authors
// MIT License
// All rights reserved.

//! # One-Shot Admin Operations
//!
//! Idempotent operations safe to re-run: topology bootstrap, and draining
//! quarantined messages back to the main path. A drained message is only
//! removed from quarantine once its republish has been durably confirmed;
//! a failed republish returns the message to quarantine instead of losing
//! it.

use crate::{
    config::Config,
    errors::AmqpError,
    publisher::{ConfirmedPublisher, DELIVERY_MODE_PERSISTENT},
    topology::{AmqpTopology, RelayTopology},
};
use lapin::{
    options::{BasicAckOptions, BasicGetOptions, BasicNackOptions},
    Channel,
};
use std::{sync::Arc, time::Duration};
use tracing::{error, info};

/// Declares the relay topology derived from the configuration.
pub async fn declare_topology(channel: Arc<Channel>, cfg: &Config) -> Result<(), AmqpError> {
    AmqpTopology::new(channel, RelayTopology::from_config(cfg))
        .install()
        .await
}

/// Drains up to `limit` messages from the quarantine queue back to the
/// main exchange, preserving each message's body, headers and id.
///
/// Stops early once the queue is empty. Returns the number of messages
/// moved. The channel must be the one the publisher was built on, so the
/// fetch and the confirmed republish share a session.
pub async fn drain_quarantine(
    channel: Arc<Channel>,
    publisher: &ConfirmedPublisher,
    cfg: &Config,
    limit: usize,
) -> Result<usize, AmqpError> {
    let timeout = Duration::from_millis(cfg.publish_timeout_ms);
    let mut drained = 0;

    while drained < limit {
        let fetched = match channel
            .basic_get(&cfg.quarantine_queue, BasicGetOptions { no_ack: false })
            .await
        {
            Ok(m) => m,
            Err(err) => {
                error!(error = err.to_string(), "error to fetch from quarantine");
                return Err(AmqpError::GetMessageError(cfg.quarantine_queue.clone()));
            }
        };

        let Some(message) = fetched else {
            info!("quarantine empty");
            break;
        };

        let delivery = message.delivery;
        let properties = delivery
            .properties
            .clone()
            .with_delivery_mode(DELIVERY_MODE_PERSISTENT);

        if let Err(err) = publisher
            .publish_raw(
                &cfg.exchange,
                &cfg.routing_key,
                &delivery.data,
                properties,
                timeout,
            )
            .await
        {
            // not confirmed durable: put it back rather than lose it
            error!(error = err.to_string(), "republish failed, returning message to quarantine");
            if let Err(nack_err) = delivery
                .nack(BasicNackOptions {
                    multiple: false,
                    requeue: true,
                })
                .await
            {
                error!(error = nack_err.to_string(), "error whiling nack msg");
                return Err(AmqpError::NackMessageError);
            }
            return Err(err);
        }

        if let Err(err) = delivery.ack(BasicAckOptions { multiple: false }).await {
            error!(error = err.to_string(), "error whiling ack drained msg");
            return Err(AmqpError::AckMessageError);
        }

        info!(
            message_id = delivery
                .properties
                .message_id()
                .clone()
                .map(|id| id.to_string())
                .unwrap_or_default(),
            "republished"
        );
        drained += 1;
    }

    Ok(drained)
}
