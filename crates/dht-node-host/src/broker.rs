//! Broker that logs instead of sending anything.

use std::convert::Infallible;

use log::info;

use dht_node_core::config::BrokerConfig;
use dht_node_core::telemetry::{Broker, InboundMessage};

pub struct LogBroker {
    address: String,
}

impl LogBroker {
    pub fn new(config: &BrokerConfig) -> Self {
        Self {
            address: format!("{}:{} (log only)", config.host, config.port),
        }
    }
}

impl Broker for LogBroker {
    type Error = Infallible;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Self::Error> {
        info!(
            "mqtt(LOG): topic='{}' payload='{}'",
            topic,
            String::from_utf8_lossy(payload)
        );
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), Self::Error> {
        info!("mqtt(LOG): subscribed to '{}'", topic);
        Ok(())
    }

    async fn poll_inbound(&mut self) -> Result<Option<InboundMessage>, Self::Error> {
        Ok(None)
    }

    fn describe(&self) -> &str {
        &self.address
    }
}
