use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

/// Drive a service sweep on a fixed cadence until shutdown. Each tick
/// runs to completion before the next delay starts, so a slow sweep
/// never overlaps itself. The period is jittered by ±10% to spread
/// load across manager replicas.
pub async fn run_periodic<F, Fut, E>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: std::fmt::Debug,
{
    tracing::info!(job = name, ?period, "periodic job started");
    loop {
        let jitter = 0.9 + rand::random::<f64>() * 0.2; // [0.9, 1.1)
        tokio::select! {
            () = tokio::time::sleep(period.mul_f64(jitter)) => {
                tracing::debug!(job = name, "running periodic job");
                if let Err(err) = tick().await {
                    tracing::error!(job = name, ?err, "periodic job failed");
                }
            }
            () = wait_shutdown(&mut shutdown) => {
                tracing::info!(job = name, "periodic job stopped");
                return;
            }
        }
    }
}

/// Resolve once the shutdown flag flips (or its sender is dropped).
pub async fn wait_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn ticks_and_stops_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let ticks = Arc::new(AtomicUsize::new(0));

        let job = tokio::spawn(run_periodic("test-job", Duration::from_secs(10), rx, {
            let ticks = ticks.clone();
            move || {
                let ticks = ticks.clone();
                async move {
                    ticks.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), std::convert::Infallible>(())
                }
            }
        }));

        // Paused time auto-advances whenever the runtime is idle, so
        // several jittered periods elapse quickly.
        while ticks.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }

        tx.send(true).unwrap();
        job.await.unwrap();
    }
}
