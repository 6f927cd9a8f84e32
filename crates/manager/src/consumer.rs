use crate::service::{CrackService, DispatchSink};
use crate::store::Store;
use anyhow::Context;
use bus::{BasicAckOptions, BasicRejectOptions};
use models::TaskResult;
use std::future::Future;

/// Feed worker results into the service. Domain rejections (unknown
/// task or part, late results for timed out tasks) are acked and
/// dropped; infrastructure failures requeue the delivery.
pub async fn serve_results<S: Store, P: DispatchSink>(
    consumer: bus::Consumer<TaskResult>,
    service: CrackService<S, P>,
    shutdown: impl Future<Output = ()>,
) -> bus::Result<()> {
    consumer
        .serve(
            move |result: TaskResult, delivery| {
                let service = service.clone();
                async move {
                    match service.save_result_subtask(&result).await {
                        Ok(()) => {
                            delivery
                                .acker
                                .ack(BasicAckOptions::default())
                                .await
                                .context("failed to ack result")?;
                        }
                        Err(err) if err.is_rejection() => {
                            tracing::warn!(
                                id = result.request_id,
                                part_number = result.part_number,
                                ?err,
                                "dropping rejected result"
                            );
                            delivery
                                .acker
                                .ack(BasicAckOptions::default())
                                .await
                                .context("failed to ack rejected result")?;
                        }
                        Err(err) => {
                            tracing::error!(
                                id = result.request_id,
                                ?err,
                                "failed to save result, requeueing"
                            );
                            delivery
                                .acker
                                .reject(BasicRejectOptions { requeue: true })
                                .await
                                .context("failed to requeue result")?;
                        }
                    }
                    Ok(())
                }
            },
            shutdown,
        )
        .await
}
