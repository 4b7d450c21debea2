//! Playback cancel flag

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Raised to abort the rest of a sequence
///
/// Checked between sequence items and awaited next to every audio wait.
#[derive(Debug, Default)]
pub struct CancelFlag {
    raised: AtomicBool,
    notify: Notify,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        self.raised.store(false, Ordering::SeqCst);
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Resolve once the flag is raised
    pub async fn raised(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_raised() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_raise_wakes_waiter() {
        let flag = Arc::new(CancelFlag::new());
        let waiter = {
            let flag = flag.clone();
            tokio::spawn(async move { flag.raised().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        flag.raise();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_reset_clears() {
        let flag = CancelFlag::new();
        flag.raise();
        assert!(flag.is_raised());
        // Already raised resolves at once
        flag.raised().await;
        flag.reset();
        assert!(!flag.is_raised());
        assert!(
            tokio::time::timeout(Duration::from_millis(20), flag.raised())
                .await
                .is_err()
        );
    }
}
