//! # Periodic Task
//!
//! A cancellable repeating task running on its own thread.
//!
//! The worker sleeps on a channel with a timeout, so `cancel()` wakes it
//! immediately instead of waiting out the interval. Cancellation never joins
//! the worker: a tick that is already running finishes on its own, and callers
//! guard their state with a generation token so that late tick is a no-op.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Handle to a running periodic task. Dropping the handle cancels the task.
pub struct PeriodicTask {
    name: String,
    interval: Duration,
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Spawn a worker that calls `f` every `interval` until cancelled.
    ///
    /// The first call happens one full interval after spawning.
    pub fn spawn<F>(name: &str, interval: Duration, mut f: F) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => f(),
                    // Explicit stop, or the handle was dropped
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        log::debug!("[PeriodicTask] Spawned '{}' every {:?}", name, interval);

        Ok(Self {
            name: name.to_string(),
            interval,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stop the task. Safe to call repeatedly and from inside the task itself.
    pub fn cancel(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            tx.send(()).ok();
            // Detach; the worker exits at its next wakeup.
            self.handle.take();
            log::debug!("[PeriodicTask] Cancelled '{}'", self.name);
        }
    }

    /// Whether `cancel()` has been called on this handle.
    pub fn is_cancelled(&self) -> bool {
        self.stop_tx.is_none()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_periodic_task_fires() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let mut task = PeriodicTask::spawn("test-fires", Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while count.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        task.cancel();
        assert!(count.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut task = PeriodicTask::spawn("test-cancel", Duration::from_secs(3600), || {}).unwrap();
        assert!(!task.is_cancelled());
        task.cancel();
        task.cancel();
        assert!(task.is_cancelled());
        assert_eq!(task.interval(), Duration::from_secs(3600));
    }

    #[test]
    fn test_no_ticks_after_cancel() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let task = PeriodicTask::spawn("test-drop", Duration::from_millis(50), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        drop(task);

        thread::sleep(Duration::from_millis(150));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
