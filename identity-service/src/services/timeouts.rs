use dashmap::DashMap;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Keyed one-shot timers. Scheduling a key again replaces its timer.
#[derive(Default)]
pub struct TimeoutScheduler {
    tokens: DashMap<String, CancellationToken>,
}

impl TimeoutScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule<F>(&self, key: impl Into<String>, delay: Duration, on_expiry: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        if let Some(previous) = self.tokens.insert(key.into(), token.clone()) {
            previous.cancel();
        }

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => on_expiry.await,
            }
        });
    }

    pub fn cancel(&self, key: &str) {
        if let Some((_, token)) = self.tokens.remove(key) {
            token.cancel();
        }
    }

    pub fn is_scheduled(&self, key: &str) -> bool {
        self.tokens.contains_key(key)
    }

    pub fn cancel_all(&self) {
        for entry in self.tokens.iter() {
            entry.value().cancel();
        }
        self.tokens.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fires_after_delay() {
        let scheduler = TimeoutScheduler::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();

        scheduler.schedule("req", Duration::from_millis(10), async move {
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancelled_timer_does_not_fire() {
        let scheduler = TimeoutScheduler::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();

        scheduler.schedule("req", Duration::from_millis(20), async move {
            flag.store(true, Ordering::SeqCst);
        });
        scheduler.cancel("req");
        assert!(!scheduler.is_scheduled("req"));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }
}
