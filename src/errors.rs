// Copyright (c) 2025, The AMQP Relay Authors
// MIT License
// All rights reserved.

//! # Error Types for the AMQP Relay
//!
//! This module provides the error taxonomy for broker operations. The
//! `AmqpError` enum covers connection and channel setup, topology
//! declaration, publishing with confirms, and message acknowledgment.
//!
//! Two publish failures are deliberately kept apart: `NotAcknowledged`
//! means the broker explicitly refused the message (it is not stored),
//! while `ConfirmTimeout` means no confirmation was observed in time and
//! the outcome is unknown — the message may or may not have been durably
//! stored. Callers must not collapse the two.

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmqpError {
    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// An existing exchange or queue was declared with incompatible
    /// parameters. This is a configuration error and is never resolved
    /// automatically.
    #[error("declare conflict on `{0}`: existing definition is incompatible")]
    DeclareConflict(String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding a queue to an exchange
    #[error("failure to bind queue `{1}` to exchange `{0}`")]
    BindingExchangeToQueueError(String, String),

    /// Error enabling publisher-confirm mode on a channel
    #[error("failure to enable confirm mode")]
    ConfirmSelectError,

    /// Error transmitting a publish. The message was not sent.
    #[error("failure to publish")]
    PublishingError,

    /// The broker negatively confirmed a publish. The message was not
    /// enqueued and must be treated as unsent.
    #[error("publish not acknowledged by the broker")]
    NotAcknowledged,

    /// No confirmation arrived before the deadline. The publish was
    /// transmitted, so the outcome is unknown; re-publishing should use a
    /// fresh message id.
    #[error("timed out waiting for publisher confirm")]
    ConfirmTimeout,

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// Error publishing a message to the quarantine queue
    #[error("failure to publish to dlq")]
    PublishingToDlqError,

    /// Error fetching a single message from a queue
    #[error("failure to get message from `{0}`")]
    GetMessageError(String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error declaring a consumer
    #[error("failure to declare consumer `{0}`")]
    CreatingConsumerError(String),
}

/// AMQP reply code for precondition-failed, raised when a declare does
/// not match the existing definition.
const PRECONDITION_FAILED: u16 = 406;

pub(crate) fn is_precondition_failed(err: &lapin::Error) -> bool {
    match err {
        lapin::Error::ProtocolError(amqp) => amqp.get_id() == PRECONDITION_FAILED,
        _ => false,
    }
}
