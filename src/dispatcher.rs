// Copyright (c) 2025, The AMQP Relay Authors
// MIT License
// All rights reserved.

//! # Relay Dispatcher
//!
//! Runs the consuming loop on the main queue. The channel prefetch bounds
//! the number of unacknowledged deliveries held at once, providing
//! backpressure against the broker; within that bound each delivery is
//! handled by its own task, so one slow or failing delivery never blocks
//! the others and never stops the loop.

use crate::{config::Config, consumer::consume, errors::AmqpError, handler::MessageHandler};
use futures_util::StreamExt;
use lapin::{
    options::{BasicConsumeOptions, BasicQosOptions},
    types::FieldTable,
    Channel,
};
use std::sync::Arc;
use tracing::error;

/// Dispatcher tying the main queue to a message handler.
pub struct RelayDispatcher {
    channel: Arc<Channel>,
    queue: String,
    dead_letter_exchange: String,
    max_retries: i64,
    prefetch_count: u16,
    handler: Arc<dyn MessageHandler>,
}

impl RelayDispatcher {
    pub fn new(
        channel: Arc<Channel>,
        cfg: &Config,
        handler: Arc<dyn MessageHandler>,
    ) -> RelayDispatcher {
        RelayDispatcher {
            channel,
            queue: cfg.queue.clone(),
            dead_letter_exchange: cfg.dead_letter_exchange.clone(),
            max_retries: cfg.max_retries,
            prefetch_count: cfg.prefetch_count,
            handler,
        }
    }

    /// Consumes the main queue until the channel closes.
    ///
    /// Per-delivery failures are logged and the loop continues; only
    /// setup failures (qos, consumer declaration) are returned.
    pub async fn consume_blocking(&self, consumer_tag: &str) -> Result<(), AmqpError> {
        if let Err(err) = self
            .channel
            .basic_qos(self.prefetch_count, BasicQosOptions { global: false })
            .await
        {
            error!(error = err.to_string(), "error to configure qos");
            return Err(AmqpError::QoSDeclarationError(self.queue.clone()));
        }

        let mut consumer = match self
            .channel
            .basic_consume(
                &self.queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to create the consumer");
                return Err(AmqpError::CreatingConsumerError(self.queue.clone()));
            }
            Ok(c) => c,
        };

        while let Some(result) = consumer.next().await {
            match result {
                Ok(delivery) => {
                    let handler = self.handler.clone();
                    let channel = self.channel.clone();
                    let dead_letter_exchange = self.dead_letter_exchange.clone();
                    let max_retries = self.max_retries;

                    tokio::spawn(async move {
                        if let Err(err) = consume(
                            &delivery,
                            handler.as_ref(),
                            channel,
                            &dead_letter_exchange,
                            max_retries,
                        )
                        .await
                        {
                            error!(error = err.to_string(), "error consume msg");
                        }
                    });
                }

                Err(err) => error!(error = err.to_string(), "errors consume msg"),
            }
        }

        Ok(())
    }
}
