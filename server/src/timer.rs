//! The maintenance timer (spec §4.12): a single background thread that
//! wakes once a second and runs any due named task — store optimization,
//! the nightly change digest — each gated by its own due-time so the
//! thread's wake frequency is independent of any one task's period.

use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;

/// A maintenance task that runs at most once per `period_seconds`.
pub struct MaintenanceTask {
    pub name: &'static str,
    pub period_seconds: i64,
    next_due_unix: AtomicI64,
    run: Box<dyn Fn() + Send + Sync>,
}

impl MaintenanceTask {
    pub fn new(
        name: &'static str,
        period_seconds: i64,
        run: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            period_seconds,
            next_due_unix: AtomicI64::new(0),
            run: Box::new(run),
        }
    }

    fn run_if_due(&self, now_unix: i64) {
        let due = self.next_due_unix.load(Ordering::Acquire);
        if now_unix < due {
            return;
        }
        if self
            .next_due_unix
            .compare_exchange(
                due,
                now_unix + self.period_seconds,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            tracing::debug!(task = self.name, "running maintenance task");
            (self.run)();
        }
    }
}

/// Spawns the background maintenance thread. Returns a handle whose
/// `JoinHandle` callers can ignore (the thread runs for the life of the
/// process) or join during a graceful shutdown test.
pub fn spawn(tasks: Vec<MaintenanceTask>) -> thread::JoinHandle<()> {
    let tasks = Arc::new(tasks);
    thread::Builder::new()
        .name("scriptura-maintenance".to_string())
        .spawn(move || loop {
            let now_unix = Utc::now().timestamp();
            for task in tasks.iter() {
                task.run_if_due(now_unix);
            }
            thread::sleep(Duration::from_secs(1));
        })
        .expect("failed to spawn maintenance thread")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn task_runs_once_per_period_not_every_tick() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let task = MaintenanceTask::new("count", 10, move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        task.run_if_due(0);
        task.run_if_due(1);
        task.run_if_due(5);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        task.run_if_due(11);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
