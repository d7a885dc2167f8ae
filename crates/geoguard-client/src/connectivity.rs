//! Polls store reachability and reports online/offline transitions.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Remembers the last observed state and only reports changes.
#[derive(Debug, Default)]
pub struct ConnectivityWatch {
    last: Option<bool>,
}

impl ConnectivityWatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `Some(online)` when the state differs from the previous
    /// observation. The first observation is always reported.
    pub fn observe(&mut self, online: bool) -> Option<bool> {
        if self.last == Some(online) {
            return None;
        }
        self.last = Some(online);
        Some(online)
    }
}

/// Run `check` every `interval` and send each transition on the returned
/// channel. The task ends once the receiver is dropped.
pub fn spawn_monitor<F, Fut>(
    interval: Duration,
    check: F,
) -> (mpsc::Receiver<bool>, JoinHandle<()>)
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = bool> + Send,
{
    let (tx, rx) = mpsc::channel(4);
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut watch = ConnectivityWatch::new();
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                _ = ticker.tick() => {}
            }
            let online = check().await;
            if let Some(changed) = watch.observe(online) {
                debug!(online = changed, "Connectivity changed");
                if tx.send(changed).await.is_err() {
                    break;
                }
            }
        }
    });
    (rx, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_watch_reports_only_changes() {
        let mut watch = ConnectivityWatch::new();
        assert_eq!(watch.observe(true), Some(true));
        assert_eq!(watch.observe(true), None);
        assert_eq!(watch.observe(false), Some(false));
        assert_eq!(watch.observe(false), None);
        assert_eq!(watch.observe(true), Some(true));
    }

    #[tokio::test]
    async fn test_monitor_emits_transitions() {
        let up = Arc::new(AtomicBool::new(true));
        let flag = up.clone();
        let (mut rx, task) = spawn_monitor(Duration::from_millis(20), move || {
            let flag = flag.clone();
            async move { flag.load(Ordering::SeqCst) }
        });

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(first, Some(true));

        up.store(false, Ordering::SeqCst);
        let second = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(second, Some(false));

        drop(rx);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
