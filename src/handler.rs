// Copyright (c) 2025, The AMQP Relay Authors
// MIT License
// All rights reserved.

//! # Message Handler Seam
//!
//! The processing collaborator behind the consumer. Anything that turns
//! an event into a side effect (an LLM call, a database write, ...) sits
//! behind `MessageHandler`; the relay imposes no retry contract on the
//! collaborator itself — a failure simply drives the delivery through
//! the retry/quarantine state machine.

use crate::message::Event;
use async_trait::async_trait;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

/// A processing failure. Never escalated as process-fatal: it feeds the
/// retry decision for the one delivery that produced it.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum HandlerError {
    /// The collaborator failed to process the event
    #[error("processing failed: {0}")]
    ProcessingFailure(String),
}

/// Processes decoded events delivered from the main queue.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError>;
}
