use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Run `tick` every `every` until `cancel` fires
///
/// The first tick runs immediately. A failing tick is logged and the loop
/// carries on; a slow tick delays the next one instead of bursting.
pub async fn poll<F, Fut>(every: Duration, cancel: CancellationToken, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = tick() => {
                if let Err(e) = result {
                    tracing::warn!(error = %format!("{:#}", e), "poll tick failed");
                }
            }
        }
    }
}

/// Cancellation token that fires on Ctrl-C
pub fn ctrl_c_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("interrupt received, stopping");
        }
        token.cancel();
    });
    cancel
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_ticks_until_cancelled_and_survives_errors() {
        let cancel = CancellationToken::new();
        let ticks = Arc::new(AtomicUsize::new(0));

        let handle = tokio::spawn({
            let cancel = cancel.clone();
            let ticks = Arc::clone(&ticks);
            poll(Duration::from_secs(5), cancel, move || {
                let ticks = Arc::clone(&ticks);
                async move {
                    let n = ticks.fetch_add(1, Ordering::SeqCst);
                    if n == 1 {
                        anyhow::bail!("backend down");
                    }
                    Ok(())
                }
            })
        });

        // ticks at 0s, 5s, 10s
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let counter = AtomicUsize::new(0);
        let ticks = &counter;

        poll(Duration::from_secs(1), cancel, move || async move {
            ticks.fetch_add(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>(())
        })
        .await;

        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
