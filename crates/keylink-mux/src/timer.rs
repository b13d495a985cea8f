use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

/// A deadline with an optional expiry callback.
///
/// Remaining time is derived from the deadline, so a timer can be queried
/// or cloned at any point without drift. The callback, if any, runs on a
/// tokio task once the deadline passes; [`CountdownTimer::clear`] or dropping
/// the timer cancels it.
#[derive(Debug)]
pub struct CountdownTimer {
    deadline: Instant,
    task: Option<JoinHandle<()>>,
}

impl CountdownTimer {
    /// A timer without a callback.
    pub fn new(duration: Duration) -> Self {
        Self {
            deadline: Instant::now() + duration,
            task: None,
        }
    }

    /// A timer that runs `callback` on expiry. Must be called within a tokio
    /// runtime.
    pub fn with_callback<F>(duration: Duration, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::until(Instant::now() + duration, callback)
    }

    fn until<F>(deadline: Instant, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            callback();
        });
        Self {
            deadline,
            task: Some(task),
        }
    }

    /// A timer with the same deadline and a different callback.
    pub fn clone_with<F>(&self, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::until(self.deadline, callback)
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Resolves once the deadline has passed.
    pub async fn wait(&self) {
        tokio::time::sleep_until(self.deadline).await;
    }

    /// Expire now and cancel the callback.
    pub fn clear(&mut self) {
        self.deadline = Instant::now();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for CountdownTimer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
