use crate::{Channel, Error};
use lapin::message::Delivery;
use lapin::options::BasicRejectOptions;
use std::future::Future;
use std::marker::PhantomData;

/// Consumer subscribes to a fixed queue and feeds JSON-decoded
/// messages of one type to a handler. Each delivery is handled on its
/// own task so a panicking handler is caught and logged without
/// stopping consumption. Acking (or rejecting) is the handler's
/// responsibility.
pub struct Consumer<T> {
    channel: Channel,
    queue: String,
    _marker: PhantomData<fn(T)>,
}

impl<T> Consumer<T>
where
    T: serde::de::DeserializeOwned + Send + 'static,
{
    pub fn new(channel: Channel, queue: String) -> Self {
        Self {
            channel,
            queue,
            _marker: PhantomData,
        }
    }

    /// Consume until `shutdown` resolves or the channel is closed by
    /// the user. Broker-side interruptions are absorbed by the channel
    /// wrapper underneath.
    pub async fn serve<H, F>(
        &self,
        handler: H,
        shutdown: impl Future<Output = ()>,
    ) -> crate::Result<()>
    where
        H: Fn(T, Delivery) -> F + Send + Sync + 'static,
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mut deliveries = self.channel.consume(&self.queue)?;
        tracing::info!(queue = self.queue, "consumer subscribed");
        tokio::pin!(shutdown);

        loop {
            let delivery = tokio::select! {
                () = &mut shutdown => {
                    tracing::info!(queue = self.queue, "consumer stopped");
                    return Ok(());
                }
                delivery = deliveries.recv() => delivery,
            };
            let Some(delivery) = delivery else {
                // Channel was closed by the user.
                tracing::info!(queue = self.queue, "consumer stream closed");
                return if self.channel.is_closed() {
                    Ok(())
                } else {
                    Err(Error::Closed)
                };
            };

            let message: T = match serde_json::from_slice(&delivery.data) {
                Ok(message) => message,
                Err(err) => {
                    tracing::error!(queue = self.queue, ?err, "failed to decode message");
                    if let Err(err) = delivery
                        .acker
                        .reject(BasicRejectOptions { requeue: false })
                        .await
                    {
                        tracing::error!(?err, "failed to reject undecodable message");
                    }
                    continue;
                }
            };

            let queue = self.queue.clone();
            let handling = tokio::spawn(handler(message, delivery));
            tokio::spawn(async move {
                match handling.await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        tracing::error!(queue, ?err, "message handler failed");
                    }
                    Err(join_err) if join_err.is_panic() => {
                        tracing::error!(queue, ?join_err, "message handler panicked");
                    }
                    Err(_) => {}
                }
            });
        }
    }
}
