use crate::{Channel, Error};
use lapin::types::ShortString;
use lapin::BasicProperties;
use std::marker::PhantomData;
use std::time::Duration;

const SEND_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Transient,
    Persistent,
}

impl DeliveryMode {
    fn as_amqp(self) -> u8 {
        match self {
            Self::Transient => 1,
            Self::Persistent => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub exchange: String,
    pub routing_key: String,
    pub mode: DeliveryMode,
}

/// Publisher serializes messages of one type to JSON and publishes
/// them to a fixed (exchange, routing key) with the configured
/// delivery mode. Transient publish failures are retried a few times
/// before surfacing.
pub struct Publisher<T> {
    channel: Channel,
    cfg: PublisherConfig,
    _marker: PhantomData<fn(T)>,
}

impl<T: serde::Serialize> Publisher<T> {
    pub fn new(channel: Channel, cfg: PublisherConfig) -> Self {
        Self {
            channel,
            cfg,
            _marker: PhantomData,
        }
    }

    pub async fn send(&self, message: &T) -> crate::Result<()> {
        let body = serde_json::to_vec(message).map_err(Error::Encode)?;
        let properties = BasicProperties::default()
            .with_content_type(ShortString::from("application/json"))
            .with_delivery_mode(self.cfg.mode.as_amqp());

        let mut last = None;
        for attempt in 1..=SEND_ATTEMPTS {
            match self
                .channel
                .publish(
                    &self.cfg.exchange,
                    &self.cfg.routing_key,
                    properties.clone(),
                    &body,
                )
                .await
            {
                Ok(()) => return Ok(()),
                Err(Error::Closed) => return Err(Error::Closed),
                Err(err) => {
                    tracing::warn!(
                        exchange = self.cfg.exchange,
                        routing_key = self.cfg.routing_key,
                        attempt,
                        ?err,
                        "failed to publish message"
                    );
                    last = Some(err);
                    if attempt != SEND_ATTEMPTS {
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            }
        }
        Err(Error::PublishExhausted {
            attempts: SEND_ATTEMPTS,
            last: Box::new(last.expect("at least one attempt was made")),
        })
    }
}
