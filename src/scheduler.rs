//! Delayed, fire-and-forget work.
//!
//! Used for the settle-then-refresh step after a rating write: the write goes
//! out immediately, the cache refresh runs later on its own thread.

use log::{debug, warn};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait Scheduler: Send + Sync {
    /// Run `task` once after `delay` without blocking the caller
    fn schedule(&self, delay: Duration, task: Task);
}

/// Runs each task on its own thread after sleeping for the delay
#[derive(Debug, Default)]
pub struct DelayedTasks {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl DelayedTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks scheduled and not yet waited for
    pub fn pending(&self) -> usize {
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        handles.retain(|handle| !handle.is_finished());
        handles.len()
    }

    /// Block until every scheduled task has run.
    ///
    /// Short-lived processes call this before exiting so a pending refresh
    /// isn't cut off.
    pub fn wait_all(&self) {
        let handles: Vec<_> = {
            let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
            handles.drain(..).collect()
        };
        for handle in handles {
            if handle.join().is_err() {
                warn!("Delayed task panicked");
            }
        }
    }
}

impl Scheduler for DelayedTasks {
    fn schedule(&self, delay: Duration, task: Task) {
        debug!("Scheduling task in {delay:?}");
        let handle = thread::spawn(move || {
            thread::sleep(delay);
            task();
        });
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        handles.retain(|handle| !handle.is_finished());
        handles.push(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_task_runs_after_delay() {
        let tasks = DelayedTasks::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let start = Instant::now();

        let counter = ran.clone();
        tasks.schedule(Duration::from_millis(20), Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        tasks.wait_all();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(tasks.pending(), 0);
    }

    #[test]
    fn test_schedule_does_not_block() {
        let tasks = DelayedTasks::new();
        let start = Instant::now();

        tasks.schedule(Duration::from_millis(200), Box::new(|| {}));

        assert!(start.elapsed() < Duration::from_millis(200));
        assert_eq!(tasks.pending(), 1);
        tasks.wait_all();
    }
}
