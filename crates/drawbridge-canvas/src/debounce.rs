//! Last-value-wins debounce.

use std::time::Duration;

use tokio::time::Instant;

/// Holds only the most recent value and releases it once no new value has
/// arrived for `window`, or immediately on [`Debouncer::flush`].
#[derive(Debug)]
pub struct Debouncer<T> {
    window: Duration,
    pending: Option<T>,
    deadline: Option<Instant>,
}

impl<T> Debouncer<T> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
            deadline: None,
        }
    }

    /// Queue `value`, replacing anything queued and restarting the window.
    pub fn push(&mut self, value: T) {
        self.pending = Some(value);
        self.deadline = Some(Instant::now() + self.window);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Take the queued value right away.
    pub fn flush(&mut self) -> Option<T> {
        self.deadline = None;
        self.pending.take()
    }

    /// Wait out the quiescence window and take the value.
    ///
    /// Never resolves while nothing is queued. Cancel-safe: dropping the
    /// future leaves the queued value in place.
    pub async fn ready(&mut self) -> T {
        loop {
            match self.deadline {
                Some(deadline) if self.pending.is_some() => {
                    tokio::time::sleep_until(deadline).await;
                    if let Some(value) = self.flush() {
                        return value;
                    }
                }
                _ => std::future::pending::<()>().await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_only_last_value_survives_window() {
        let mut debouncer = Debouncer::new(Duration::from_millis(50));
        debouncer.push("rectangle");
        debouncer.push("diamond");
        debouncer.push("ellipse");

        let start = Instant::now();
        assert_eq!(debouncer.ready().await, "ellipse");
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_restarts_window() {
        let mut debouncer = Debouncer::new(Duration::from_millis(50));
        let start = Instant::now();
        debouncer.push(1);
        tokio::time::sleep(Duration::from_millis(30)).await;
        debouncer.push(2);

        assert_eq!(debouncer.ready().await, 2);
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_never_resolves() {
        let mut debouncer: Debouncer<u8> = Debouncer::new(Duration::from_millis(10));
        let result = tokio::time::timeout(Duration::from_secs(1), debouncer.ready()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_flush_skips_the_wait() {
        let mut debouncer = Debouncer::new(Duration::from_secs(60));
        assert!(debouncer.flush().is_none());
        debouncer.push("laser");
        assert_eq!(debouncer.flush(), Some("laser"));
        assert!(debouncer.flush().is_none());
    }
}
