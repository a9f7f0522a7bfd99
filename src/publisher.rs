// Copyright (c) 2025, The AMQP Relay Authors
// MIT License
// All rights reserved.

//! # Confirmed Publisher
//!
//! Publishes messages in publisher-confirm mode: a publish only counts
//! as sent once the broker has acknowledged durable acceptance, within a
//! deadline. Every message is published persistent so it survives a
//! broker restart once stored.
//!
//! Confirmations are correlated to their publish by delivery tag inside
//! lapin, one confirm future per publish, so concurrent publishes on the
//! same channel cannot be matched to the wrong confirmation.

use crate::{
    errors::AmqpError,
    message::{Event, JSON_CONTENT_TYPE, SCHEMA_VERSION, SCHEMA_VERSION_HEADER},
};
use lapin::{
    options::{BasicPublishOptions, ConfirmSelectOptions},
    publisher_confirm::Confirmation,
    types::{AMQPValue, FieldTable, LongInt, ShortString},
    BasicProperties, Channel,
};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tracing::{debug, error, warn};

/// AMQP delivery mode for messages persisted to disk
pub const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// Publisher that waits for broker confirmation of every publish.
pub struct ConfirmedPublisher {
    channel: Arc<Channel>,
}

impl ConfirmedPublisher {
    /// Creates a new confirmed publisher, switching the channel into
    /// confirm mode. The switch happens once per channel lifetime; do not
    /// construct two publishers over the same channel.
    pub async fn new(channel: Arc<Channel>) -> Result<Arc<ConfirmedPublisher>, AmqpError> {
        if let Err(err) = channel
            .confirm_select(ConfirmSelectOptions { nowait: false })
            .await
        {
            error!(error = err.to_string(), "error to enable confirm mode");
            return Err(AmqpError::ConfirmSelectError);
        }

        Ok(Arc::new(ConfirmedPublisher { channel }))
    }

    /// Publishes an event and waits for its confirmation.
    ///
    /// Returns `Ok(())` only on a positive confirm. `NotAcknowledged`
    /// means the broker refused the message and it is safe to treat it as
    /// unsent; `ConfirmTimeout` means the outcome is unknown and callers
    /// re-publishing should use a fresh message id.
    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        event: &Event,
        timeout: Duration,
    ) -> Result<(), AmqpError> {
        let data = match serde_json::to_vec(event) {
            Ok(d) => d,
            Err(err) => {
                error!(error = err.to_string(), "error to serialize event");
                return Err(AmqpError::PublishingError);
            }
        };

        let mut headers = BTreeMap::<ShortString, AMQPValue>::default();
        headers.insert(
            ShortString::from(SCHEMA_VERSION_HEADER),
            AMQPValue::LongInt(LongInt::from(SCHEMA_VERSION)),
        );

        let properties = BasicProperties::default()
            .with_content_type(ShortString::from(JSON_CONTENT_TYPE))
            .with_delivery_mode(DELIVERY_MODE_PERSISTENT)
            .with_message_id(ShortString::from(event.message_id.clone()))
            .with_kind(ShortString::from(event.kind.clone()))
            .with_headers(FieldTable::from(headers));

        self.publish_raw(exchange, routing_key, &data, properties, timeout)
            .await?;

        debug!(message_id = event.message_id, exchange, "publish confirmed");
        Ok(())
    }

    /// Publishes pre-encoded bytes with caller-supplied properties and
    /// waits for the confirmation. The body and properties pass through
    /// untouched; the quarantine drain relies on this to preserve the
    /// original message exactly.
    pub async fn publish_raw(
        &self,
        exchange: &str,
        routing_key: &str,
        data: &[u8],
        properties: BasicProperties,
        timeout: Duration,
    ) -> Result<(), AmqpError> {
        let confirm = match self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                data,
                properties,
            )
            .await
        {
            Ok(c) => c,
            Err(err) => {
                // the frame never went out; the message is known unsent
                error!(error = err.to_string(), "error publishing message");
                return Err(AmqpError::PublishingError);
            }
        };

        match tokio::time::timeout(timeout, confirm).await {
            Err(_) => {
                warn!(exchange, "no confirmation before the deadline, outcome unknown");
                Err(AmqpError::ConfirmTimeout)
            }
            Ok(Err(err)) => {
                warn!(error = err.to_string(), "confirmation could not be observed");
                Err(AmqpError::ConfirmTimeout)
            }
            Ok(Ok(Confirmation::Ack(_))) => Ok(()),
            Ok(Ok(Confirmation::Nack(_))) => {
                error!(exchange, "broker refused the publish");
                Err(AmqpError::NotAcknowledged)
            }
            Ok(Ok(Confirmation::NotRequested)) => {
                // confirm_select ran in the constructor, so this state is
                // a channel misuse by the caller
                error!("channel is not in confirm mode");
                Err(AmqpError::PublishingError)
            }
        }
    }
}
