// Copyright (c) 2025, The AMQP Relay Authors
// MIT License
// All rights reserved.

//! # Topology Management
//!
//! Declares the exchanges, queues, and bindings of the relay. The wiring
//! forms three paths:
//!
//! - main: direct exchange -> main queue, dead-lettering into the retry
//!   exchange on rejection
//! - retry: direct exchange -> retry queue, holding messages for the
//!   retry TTL and dead-lettering them back into the main exchange
//! - quarantine: fanout dead-letter exchange -> quarantine queue, with no
//!   further routing (terminal)
//!
//! Declaration is idempotent: installing the same topology twice succeeds
//! and changes nothing. A declare that conflicts with an existing
//! definition surfaces as `DeclareConflict` and is never papered over.

use crate::{
    config::Config,
    errors::{is_precondition_failed, AmqpError},
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::FieldTable,
    Channel,
};
use std::sync::Arc;
use tracing::{debug, error};

/// The relay's three-path topology, derived from configuration.
///
/// Invariants: the main queue dead-letters to the retry exchange; the
/// retry queue carries the configured TTL and dead-letters back to the
/// main exchange; the quarantine queue is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayTopology {
    pub exchanges: Vec<ExchangeDefinition>,
    pub queues: Vec<QueueDefinition>,
    pub bindings: Vec<QueueBinding>,
}

impl RelayTopology {
    pub fn from_config(cfg: &Config) -> RelayTopology {
        RelayTopology {
            exchanges: vec![
                ExchangeDefinition::new(&cfg.exchange).direct().durable(),
                ExchangeDefinition::new(&cfg.retry_exchange).direct().durable(),
                ExchangeDefinition::new(&cfg.dead_letter_exchange)
                    .fanout()
                    .durable(),
            ],
            queues: vec![
                QueueDefinition::new(&cfg.queue)
                    .durable()
                    .dead_letter_to(&cfg.retry_exchange),
                QueueDefinition::new(&cfg.retry_queue)
                    .durable()
                    .ttl(cfg.retry_ttl_ms)
                    .dead_letter_to(&cfg.exchange),
                QueueDefinition::new(&cfg.quarantine_queue).durable(),
            ],
            bindings: vec![
                QueueBinding::new(&cfg.queue)
                    .exchange(&cfg.exchange)
                    .routing_key(&cfg.routing_key),
                QueueBinding::new(&cfg.retry_queue)
                    .exchange(&cfg.retry_exchange)
                    .routing_key(&cfg.routing_key),
                QueueBinding::new(&cfg.quarantine_queue).exchange(&cfg.dead_letter_exchange),
            ],
        }
    }
}

/// Installs a topology onto a channel.
///
/// Performs, in order: exchange declares, queue declares, queue-to-
/// exchange bindings. Any step failing aborts the sequence; the caller
/// must re-attempt the whole install rather than resume mid-way.
pub struct AmqpTopology {
    channel: Arc<Channel>,
    topology: RelayTopology,
}

impl AmqpTopology {
    pub fn new(channel: Arc<Channel>, topology: RelayTopology) -> AmqpTopology {
        AmqpTopology { channel, topology }
    }

    pub async fn install(&self) -> Result<(), AmqpError> {
        self.install_exchanges().await?;
        self.install_queues().await?;
        self.install_bindings().await
    }

    async fn install_exchanges(&self) -> Result<(), AmqpError> {
        for exch in &self.topology.exchanges {
            debug!("creating exchange: {}", exch.name);

            match self
                .channel
                .exchange_declare(
                    &exch.name,
                    exch.kind.into(),
                    ExchangeDeclareOptions {
                        passive: false,
                        durable: exch.durable,
                        auto_delete: false,
                        internal: false,
                        nowait: false,
                    },
                    FieldTable::default(),
                )
                .await
            {
                Err(err) if is_precondition_failed(&err) => {
                    error!(
                        error = err.to_string(),
                        name = exch.name,
                        "existing exchange has incompatible parameters"
                    );
                    Err(AmqpError::DeclareConflict(exch.name.clone()))
                }
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        name = exch.name,
                        "error to declare the exchange"
                    );
                    Err(AmqpError::DeclareExchangeError(exch.name.clone()))
                }
                _ => Ok(()),
            }?;

            debug!("exchange: {} was created", exch.name);
        }

        Ok(())
    }

    async fn install_queues(&self) -> Result<(), AmqpError> {
        for def in &self.topology.queues {
            debug!("creating queue: {}", def.name);

            match self
                .channel
                .queue_declare(
                    &def.name,
                    QueueDeclareOptions {
                        passive: false,
                        durable: def.durable,
                        exclusive: false,
                        auto_delete: false,
                        nowait: false,
                    },
                    FieldTable::from(def.arguments()),
                )
                .await
            {
                Err(err) if is_precondition_failed(&err) => {
                    error!(
                        error = err.to_string(),
                        name = def.name,
                        "existing queue has incompatible parameters"
                    );
                    Err(AmqpError::DeclareConflict(def.name.clone()))
                }
                Err(err) => {
                    error!(error = err.to_string(), name = def.name, "error to declare the queue");
                    Err(AmqpError::DeclareQueueError(def.name.clone()))
                }
                _ => {
                    debug!("queue: {} was created", def.name);
                    Ok(())
                }
            }?;
        }

        Ok(())
    }

    async fn install_bindings(&self) -> Result<(), AmqpError> {
        for binding in &self.topology.bindings {
            debug!(
                "binding queue: {} to the exchange: {} with the key: {}",
                binding.queue_name, binding.exchange_name, binding.routing_key
            );

            match self
                .channel
                .queue_bind(
                    &binding.queue_name,
                    &binding.exchange_name,
                    &binding.routing_key,
                    QueueBindOptions { nowait: false },
                    FieldTable::default(),
                )
                .await
            {
                Err(err) => {
                    error!(error = err.to_string(), "error to bind queue to exchange");

                    Err(AmqpError::BindingExchangeToQueueError(
                        binding.exchange_name.clone(),
                        binding.queue_name.clone(),
                    ))
                }
                _ => Ok(()),
            }?;
        }

        debug!("queues were bound");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ExchangeKind;

    #[test]
    fn main_queue_dead_letters_to_retry_exchange() {
        let cfg = Config::default();
        let topology = RelayTopology::from_config(&cfg);

        let main = &topology.queues[0];
        assert_eq!(main.name(), cfg.queue);
        assert_eq!(main.dead_letter_exchange.as_deref(), Some(cfg.retry_exchange.as_str()));
        assert_eq!(main.ttl, None);
    }

    #[test]
    fn retry_queue_delays_then_returns_to_main_exchange() {
        let cfg = Config::default();
        let topology = RelayTopology::from_config(&cfg);

        let retry = &topology.queues[1];
        assert_eq!(retry.name(), cfg.retry_queue);
        assert_eq!(retry.ttl, Some(cfg.retry_ttl_ms));
        assert_eq!(retry.dead_letter_exchange.as_deref(), Some(cfg.exchange.as_str()));
    }

    #[test]
    fn quarantine_queue_is_terminal() {
        let cfg = Config::default();
        let topology = RelayTopology::from_config(&cfg);

        let quarantine = &topology.queues[2];
        assert_eq!(quarantine.name(), cfg.quarantine_queue);
        assert_eq!(quarantine.dead_letter_exchange, None);
        assert_eq!(quarantine.ttl, None);
    }

    #[test]
    fn dead_letter_exchange_broadcasts() {
        let cfg = Config::default();
        let topology = RelayTopology::from_config(&cfg);

        assert_eq!(topology.exchanges[0].kind, ExchangeKind::Direct);
        assert_eq!(topology.exchanges[1].kind, ExchangeKind::Direct);
        assert_eq!(topology.exchanges[2].kind, ExchangeKind::Fanout);
        assert!(topology.exchanges.iter().all(|e| e.durable));
    }

    #[test]
    fn main_and_retry_bindings_share_the_routing_key() {
        let cfg = Config::default();
        let topology = RelayTopology::from_config(&cfg);

        assert_eq!(topology.bindings[0].routing_key, cfg.routing_key);
        assert_eq!(topology.bindings[1].routing_key, cfg.routing_key);
        // fanout binding ignores the key
        assert_eq!(topology.bindings[2].routing_key, "");
    }

    #[test]
    fn derivation_is_deterministic() {
        let cfg = Config::default();
        assert_eq!(RelayTopology::from_config(&cfg), RelayTopology::from_config(&cfg));
    }
}
