// Copyright (c) 2025, The AMQP Relay Authors
// MIT License
// All rights reserved.

//! # Per-Delivery Retry Coordination
//!
//! Each delivery moves through RECEIVED -> {ACKED, RETRIED, QUARANTINED}:
//!
//! - processing succeeded: ack, removing the message permanently
//! - processing failed below the retry budget: nack without requeue, so
//!   the broker dead-letters the message into the retry path and it
//!   re-enters the main path after the delay
//! - processing failed with the budget exhausted: explicitly publish the
//!   original body and headers to the dead-letter exchange, then ack the
//!   delivery, so exactly one copy lands in quarantine
//!
//! A malformed body counts as a processing failure and follows the same
//! policy; it is never silently dropped. The retry count is derived from
//! the broker-populated `x-death` audit trail, which is opaque and
//! append-only — only the first entry's count is trusted.

use crate::{errors::AmqpError, handler::MessageHandler, message::Event};
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicNackOptions, BasicPublishOptions},
    protocol::basic::AMQPProperties,
    types::FieldTable,
    Channel,
};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Header populated by the broker on every dead-letter cycle
pub const AMQP_HEADERS_X_DEATH: &str = "x-death";
/// Count field inside an x-death entry
pub const AMQP_HEADERS_COUNT: &str = "count";

/// Terminal state for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    Ack,
    Retry,
    Quarantine,
}

impl Verdict {
    /// Decides the terminal state from the processing outcome and the
    /// number of dead-letter cycles already undergone.
    pub(crate) fn decide(processing_ok: bool, retry_count: i64, max_retries: i64) -> Verdict {
        if processing_ok {
            Verdict::Ack
        } else if retry_count < max_retries {
            Verdict::Retry
        } else {
            Verdict::Quarantine
        }
    }
}

/// Decodes the delivery body and runs the handler, reducing both to a
/// verdict. Decoding failure is a processing failure.
pub(crate) async fn decide_delivery(
    handler: &dyn MessageHandler,
    data: &[u8],
    retry_count: i64,
    max_retries: i64,
) -> Verdict {
    let processing_ok = match serde_json::from_slice::<Event>(data) {
        Ok(event) => match handler.handle(&event).await {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    error = err.to_string(),
                    message_id = event.message_id,
                    retry_count,
                    "processing failed"
                );
                false
            }
        },
        Err(err) => {
            warn!(error = err.to_string(), retry_count, "malformed message body");
            false
        }
    };

    Verdict::decide(processing_ok, retry_count, max_retries)
}

/// Consumes one delivery: decide, then ack / nack / escalate.
pub(crate) async fn consume(
    delivery: &Delivery,
    handler: &dyn MessageHandler,
    channel: Arc<Channel>,
    dead_letter_exchange: &str,
    max_retries: i64,
) -> Result<(), AmqpError> {
    let count = retry_count(&delivery.properties);

    debug!(
        exchange = delivery.exchange.to_string(),
        retry_count = count,
        "received delivery"
    );

    match decide_delivery(handler, &delivery.data, count, max_retries).await {
        Verdict::Ack => {
            debug!("message successfully processed");
            match delivery.ack(BasicAckOptions { multiple: false }).await {
                Err(err) => {
                    error!(error = err.to_string(), "error whiling ack msg");
                    Err(AmqpError::AckMessageError)
                }
                _ => Ok(()),
            }
        }
        Verdict::Retry => {
            warn!("error whiling handling msg, sending to retry queue");
            match delivery
                .nack(BasicNackOptions {
                    multiple: false,
                    requeue: false,
                })
                .await
            {
                Err(err) => {
                    error!(error = err.to_string(), "error whiling nack msg");
                    Err(AmqpError::NackMessageError)
                }
                _ => Ok(()),
            }
        }
        Verdict::Quarantine => {
            error!(retry_count = count, "too many attempts, sending to dlq");

            // deliberate escalation: publish the original bytes and
            // headers, then ack, so exactly one copy reaches quarantine
            match channel
                .basic_publish(
                    dead_letter_exchange,
                    "",
                    BasicPublishOptions::default(),
                    &delivery.data,
                    delivery.properties.clone(),
                )
                .await
            {
                Err(err) => {
                    error!(error = err.to_string(), "error whiling sending to dlq");
                    Err(AmqpError::PublishingToDlqError)
                }
                _ => match delivery.ack(BasicAckOptions { multiple: false }).await {
                    Err(err) => {
                        error!(error = err.to_string(), "error whiling ack quarantined msg");
                        Err(AmqpError::AckMessageError)
                    }
                    _ => Ok(()),
                },
            }
        }
    }
}

/// Extracts the number of prior dead-letter cycles from the properties.
///
/// Reads `x-death[0].count`; a missing or unexpectedly-shaped header
/// counts as zero.
pub(crate) fn retry_count(props: &AMQPProperties) -> i64 {
    let headers = match props.headers() {
        Some(val) => val.to_owned(),
        None => FieldTable::default(),
    };

    match headers.inner().get(AMQP_HEADERS_X_DEATH) {
        Some(value) => match value.as_array() {
            Some(arr) => match arr.as_slice().first() {
                Some(value) => match value.as_field_table() {
                    Some(table) => match table.inner().get(AMQP_HEADERS_COUNT) {
                        Some(value) => value.as_long_long_int().unwrap_or_default(),
                        _ => 0,
                    },
                    _ => 0,
                },
                _ => 0,
            },
            _ => 0,
        },
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{HandlerError, MockMessageHandler};
    use lapin::types::{AMQPValue, FieldArray, LongLongInt, ShortString};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn body(id: &str) -> Vec<u8> {
        serde_json::to_vec(&Event {
            message_id: id.to_owned(),
            kind: "demo".to_owned(),
            version: 1,
            payload: json!({"n": 1}),
        })
        .unwrap()
    }

    fn props_with_death_count(count: i64) -> AMQPProperties {
        let mut entry = BTreeMap::new();
        entry.insert(
            ShortString::from(AMQP_HEADERS_COUNT),
            AMQPValue::LongLongInt(LongLongInt::from(count)),
        );

        let mut deaths = FieldArray::default();
        deaths.push(AMQPValue::FieldTable(FieldTable::from(entry)));

        let mut headers = BTreeMap::new();
        headers.insert(
            ShortString::from(AMQP_HEADERS_X_DEATH),
            AMQPValue::FieldArray(deaths),
        );

        AMQPProperties::default().with_headers(FieldTable::from(headers))
    }

    #[test]
    fn verdict_acks_success_regardless_of_count() {
        assert_eq!(Verdict::decide(true, 0, 3), Verdict::Ack);
        assert_eq!(Verdict::decide(true, 3, 3), Verdict::Ack);
        assert_eq!(Verdict::decide(true, 99, 3), Verdict::Ack);
    }

    #[test]
    fn verdict_retries_failures_below_the_budget() {
        assert_eq!(Verdict::decide(false, 0, 3), Verdict::Retry);
        assert_eq!(Verdict::decide(false, 2, 3), Verdict::Retry);
    }

    #[test]
    fn verdict_quarantines_once_the_budget_is_exhausted() {
        assert_eq!(Verdict::decide(false, 3, 3), Verdict::Quarantine);
        assert_eq!(Verdict::decide(false, 7, 3), Verdict::Quarantine);
    }

    #[test]
    fn retry_count_defaults_to_zero_without_headers() {
        assert_eq!(retry_count(&AMQPProperties::default()), 0);
    }

    #[test]
    fn retry_count_reads_first_death_entry() {
        assert_eq!(retry_count(&props_with_death_count(2)), 2);
    }

    #[test]
    fn retry_count_tolerates_malformed_death_header() {
        let mut headers = BTreeMap::new();
        headers.insert(
            ShortString::from(AMQP_HEADERS_X_DEATH),
            AMQPValue::LongLongInt(LongLongInt::from(5)),
        );
        let props = AMQPProperties::default().with_headers(FieldTable::from(headers));
        assert_eq!(retry_count(&props), 0);
    }

    #[tokio::test]
    async fn handler_receives_the_decoded_event() {
        let mut handler = MockMessageHandler::new();
        handler
            .expect_handle()
            .withf(|e| e.message_id == "msg-7" && e.kind == "demo")
            .once()
            .returning(|_| Ok(()));

        let verdict = decide_delivery(&handler, &body("msg-7"), 0, 3).await;
        assert_eq!(verdict, Verdict::Ack);
    }

    #[tokio::test]
    async fn failed_processing_is_retried_below_the_budget() {
        let mut handler = MockMessageHandler::new();
        handler
            .expect_handle()
            .once()
            .returning(|_| Err(HandlerError::ProcessingFailure("boom".to_owned())));

        let verdict = decide_delivery(&handler, &body("msg-7"), 1, 3).await;
        assert_eq!(verdict, Verdict::Retry);
    }

    #[tokio::test]
    async fn failed_processing_is_quarantined_at_the_budget() {
        let mut handler = MockMessageHandler::new();
        handler
            .expect_handle()
            .once()
            .returning(|_| Err(HandlerError::ProcessingFailure("boom".to_owned())));

        let verdict = decide_delivery(&handler, &body("msg-7"), 3, 3).await;
        assert_eq!(verdict, Verdict::Quarantine);
    }

    #[tokio::test]
    async fn malformed_body_follows_the_retry_policy() {
        let handler = MockMessageHandler::new();

        let verdict = decide_delivery(&handler, b"not json", 0, 3).await;
        assert_eq!(verdict, Verdict::Retry);

        let verdict = decide_delivery(&handler, b"not json", 3, 3).await;
        assert_eq!(verdict, Verdict::Quarantine);
    }
}
