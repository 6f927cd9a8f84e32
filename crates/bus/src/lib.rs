mod connection;
mod consumer;
mod publisher;

pub use connection::{Channel, ConnectConfig, Connection};
pub use consumer::Consumer;
pub use publisher::{DeliveryMode, Publisher, PublisherConfig};

pub use lapin::message::Delivery;
pub use lapin::options::{BasicAckOptions, BasicRejectOptions};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("broker client is closed")]
    Closed,
    #[error("no broker URIs configured")]
    NoUris,
    #[error(transparent)]
    Amqp(#[from] lapin::Error),
    #[error("failed to encode message body")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode message body")]
    Decode(#[source] serde_json::Error),
    #[error("publish failed after {attempts} attempts")]
    PublishExhausted {
        attempts: u32,
        #[source]
        last: Box<Error>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
