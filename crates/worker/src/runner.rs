use crate::config::TaskConfig;
use anyhow::Context;
use bus::{BasicAckOptions, BasicRejectOptions};
use keyspace::{Chunk, Progress, ProgressStatus};
use models::{Answer, ResultStatus, TaskDispatch, TaskResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Seam through which results leave the worker; the AMQP publisher in
/// production, a scripted fake in tests.
pub trait ResultSink: Send + Sync + 'static {
    fn send(&self, message: &TaskResult) -> impl Future<Output = Result<(), bus::Error>> + Send;
}

impl ResultSink for bus::Publisher<TaskResult> {
    async fn send(&self, message: &TaskResult) -> Result<(), bus::Error> {
        bus::Publisher::send(self, message).await
    }
}

/// Runner owns no persistent state: it turns one dispatch message into
/// one engine run, forwarding every progress snapshot as a result
/// message. A semaphore bounds concurrently executing chunks.
pub struct Runner<P> {
    publisher: Arc<P>,
    chunk_size: u64,
    progress_period: Duration,
    permits: Arc<Semaphore>,
}

impl<P: ResultSink> Runner<P> {
    pub fn new(publisher: Arc<P>, cfg: &TaskConfig) -> Self {
        Self {
            publisher,
            chunk_size: cfg.chunk_size,
            progress_period: cfg.progress_period,
            permits: Arc::new(Semaphore::new(cfg.concurrency)),
        }
    }

    /// Run the engine for one dispatched chunk and stream its
    /// snapshots back. An error from here is an infrastructure fault
    /// (the engine reports its own failures in-band as ERROR results).
    pub async fn execute(&self, dispatch: TaskDispatch) -> Result<(), bus::Error> {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .expect("runner semaphore closed");

        tracing::info!(
            id = dispatch.request_id,
            part_number = dispatch.part_number,
            "start brute force"
        );

        let chunk = Chunk {
            hash: dispatch.hash.clone(),
            symbols: dispatch.alphabet.symbols.clone(),
            max_length: dispatch.max_length,
            part_number: dispatch.part_number,
            chunk_size: self.chunk_size,
        };
        let mut progress = keyspace::run(chunk, self.progress_period);

        while let Some(snapshot) = progress.recv().await {
            let message = result_message(&dispatch, &snapshot);
            self.publisher.send(&message).await?;
        }

        tracing::info!(
            id = dispatch.request_id,
            part_number = dispatch.part_number,
            "end brute force"
        );
        Ok(())
    }
}

fn result_message(dispatch: &TaskDispatch, progress: &Progress) -> TaskResult {
    let (status, answer, error) = match progress.status {
        ProgressStatus::Error => (
            ResultStatus::Error,
            None,
            Some(
                progress
                    .reason
                    .clone()
                    .unwrap_or_else(|| "brute force failed".to_string()),
            ),
        ),
        ProgressStatus::InProgress => (
            ResultStatus::InProgress,
            Some(Answer {
                words: progress.answers.clone(),
                percent: progress.percent,
            }),
            None,
        ),
        ProgressStatus::Success => (
            ResultStatus::Success,
            Some(Answer {
                words: progress.answers.clone(),
                percent: progress.percent,
            }),
            None,
        ),
    };
    TaskResult {
        request_id: dispatch.request_id.clone(),
        part_number: dispatch.part_number,
        status,
        answer,
        error,
    }
}

/// Consume dispatch messages until shutdown. The delivery is acked
/// once the engine stream has fully drained (engine-side failures are
/// reported in-band); only a failed result publish requeues it.
pub async fn serve_dispatches<P: ResultSink>(
    consumer: bus::Consumer<TaskDispatch>,
    runner: Arc<Runner<P>>,
    shutdown: impl Future<Output = ()>,
) -> bus::Result<()> {
    consumer
        .serve(
            move |dispatch: TaskDispatch, delivery| {
                let runner = runner.clone();
                async move {
                    let id = dispatch.request_id.clone();
                    match runner.execute(dispatch).await {
                        Ok(()) => {
                            delivery
                                .acker
                                .ack(BasicAckOptions::default())
                                .await
                                .context("failed to ack dispatch")?;
                        }
                        Err(err) => {
                            tracing::error!(id, ?err, "failed to publish results, requeueing");
                            delivery
                                .acker
                                .reject(BasicRejectOptions { requeue: true })
                                .await
                                .context("failed to requeue dispatch")?;
                        }
                    }
                    Ok(())
                }
            },
            shutdown,
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use models::Alphabet;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeSink {
        sent: Mutex<Vec<TaskResult>>,
        failing: Mutex<bool>,
    }

    impl FakeSink {
        fn sent(&self) -> Vec<TaskResult> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl ResultSink for FakeSink {
        async fn send(&self, message: &TaskResult) -> Result<(), bus::Error> {
            if *self.failing.lock().unwrap() {
                return Err(bus::Error::Closed);
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn test_runner(sink: Arc<FakeSink>, chunk_size: u64) -> Runner<FakeSink> {
        Runner::new(
            sink,
            &TaskConfig {
                chunk_size,
                progress_period: Duration::from_secs(3600),
                concurrency: 2,
            },
        )
    }

    fn dispatch(hash: String) -> TaskDispatch {
        TaskDispatch {
            request_id: "67e55044f0df4f1a00000000".to_string(),
            part_number: 0,
            part_count: 1,
            hash,
            max_length: 3,
            alphabet: Alphabet {
                symbols: ["a", "b", "c"].map(String::from).to_vec(),
            },
        }
    }

    #[tokio::test]
    async fn forwards_the_final_snapshot_as_success() {
        let sink = Arc::new(FakeSink::default());
        let runner = test_runner(sink.clone(), 39);

        let hash = format!("{:x}", md5::compute(b"cab"));
        runner.execute(dispatch(hash)).await.unwrap();

        let sent = sink.sent();
        let last = sent.last().unwrap();
        assert_eq!(last.request_id, "67e55044f0df4f1a00000000");
        assert_eq!(last.part_number, 0);
        assert_eq!(last.status, ResultStatus::Success);
        let answer = last.answer.as_ref().unwrap();
        assert_eq!(answer.words, vec!["cab".to_string()]);
        assert_eq!(answer.percent, 100.0);
        assert!(last.error.is_none());
    }

    #[tokio::test]
    async fn engine_failure_becomes_one_error_result() {
        let sink = Arc::new(FakeSink::default());
        let runner = test_runner(sink.clone(), 39);

        runner
            .execute(dispatch("not-a-digest".to_string()))
            .await
            .unwrap();

        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].status, ResultStatus::Error);
        assert!(sent[0].answer.is_none());
        assert!(sent[0].error.is_some());
    }

    #[tokio::test]
    async fn publish_failure_surfaces_as_infrastructure_fault() {
        let sink = Arc::new(FakeSink::default());
        *sink.failing.lock().unwrap() = true;
        let runner = test_runner(sink.clone(), 39);

        let hash = format!("{:x}", md5::compute(b"cab"));
        let err = runner.execute(dispatch(hash)).await.unwrap_err();
        assert!(matches!(err, bus::Error::Closed));
        assert!(sink.sent().is_empty());
    }
}
