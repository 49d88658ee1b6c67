//! Periodic playback-position sampling

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::SyncStore;

/// Anything that knows how far playback has advanced
#[async_trait]
pub trait PositionSource: Send + Sync {
    /// Play head of the clip being narrated, or `None` when nothing is playing
    async fn position(&self) -> Option<Duration>;
}

/// Sample `source` every `period` and feed the store until `cancel` fires
pub fn spawn_ticker(
    source: Arc<dyn PositionSource>,
    store: Arc<Mutex<SyncStore>>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let Some(position) = source.position().await else {
                continue;
            };
            let ms = u64::try_from(position.as_millis()).unwrap_or(u64::MAX);
            store
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .update_time(ms);
        }

        tracing::debug!("highlight ticker stopped");
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;
    use crate::highlight::WordInterval;

    struct Clock(AtomicU64);

    #[async_trait]
    impl PositionSource for Clock {
        async fn position(&self) -> Option<Duration> {
            Some(Duration::from_millis(self.0.load(Ordering::SeqCst)))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_feeds_store_until_cancelled() {
        let clock = Arc::new(Clock(AtomicU64::new(0)));
        let store = Arc::new(Mutex::new(SyncStore::new()));
        store.lock().unwrap().switch_segment(
            "p1",
            vec![
                WordInterval::new("cây", 0, 500),
                WordInterval::new("xanh", 600, 1000),
            ],
        );
        let cancel = CancellationToken::new();
        let handle = spawn_ticker(
            Arc::clone(&clock) as Arc<dyn PositionSource>,
            Arc::clone(&store),
            Duration::from_millis(50),
            cancel.clone(),
        );

        clock.0.store(300, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(store.lock().unwrap().active_index(), Some(0));

        clock.0.store(800, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(store.lock().unwrap().active_index(), Some(1));

        cancel.cancel();
        handle.await.unwrap();

        clock.0.store(300, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(store.lock().unwrap().active_index(), Some(1));
    }
}
