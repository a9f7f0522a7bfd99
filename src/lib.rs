// Copyright (c) 2025, The AMQP Relay Authors
// MIT License
// All rights reserved.

mod consumer;

pub mod admin;
pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod exchange;
pub mod handler;
pub mod message;
pub mod publisher;
pub mod queue;
pub mod topology;
