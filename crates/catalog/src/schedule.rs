use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::Catalog;

/// Whether a background task wants to be invoked again.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    Again,
    Done,
}

/// A unit-of-work background task driven by cooperative ticks. Each
/// tick must complete or fail atomically before yielding; no task
/// suspends mid-mutation.
pub trait CatalogTask: Send {
    fn name(&self) -> &'static str;
    fn tick(&mut self, catalog: &mut Catalog) -> TaskStatus;
}

/// Drives registered tasks one tick at a time, dropping each task when
/// it reports completion.
#[derive(Default)]
pub struct Scheduler {
    tasks: Vec<Box<dyn CatalogTask>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(&mut self, task: Box<dyn CatalogTask>) {
        debug!(task = task.name(), "task scheduled");
        self.tasks.push(task);
    }

    pub fn has_task(&self, name: &str) -> bool {
        self.tasks.iter().any(|t| t.name() == name)
    }

    pub fn is_idle(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Runs one tick of every registered task.
    pub fn tick(&mut self, catalog: &mut Catalog) {
        let mut index = 0;
        while index < self.tasks.len() {
            match self.tasks[index].tick(catalog) {
                TaskStatus::Again => index += 1,
                TaskStatus::Done => {
                    let task = self.tasks.remove(index);
                    debug!(task = task.name(), "task finished");
                }
            }
        }
    }
}

/// Periodic commit: flushes pending mutations every interval, but only
/// when the dirty counter says there is something to flush. Runs
/// forever.
pub struct CommitTask {
    interval: Duration,
    last_commit: Instant,
}

impl CommitTask {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_commit: Instant::now(),
        }
    }
}

impl CatalogTask for CommitTask {
    fn name(&self) -> &'static str {
        "commit"
    }

    fn tick(&mut self, catalog: &mut Catalog) -> TaskStatus {
        if self.last_commit.elapsed() < self.interval {
            return TaskStatus::Again;
        }
        self.last_commit = Instant::now();
        if catalog.is_dirty() || catalog.has_zombies() {
            debug!("periodic commit");
            if !catalog.force_commit() {
                warn!("periodic commit failed, will retry next interval");
            }
        }
        TaskStatus::Again
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_catalog;

    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct CountedTask {
        remaining: u32,
        ticks: Arc<AtomicU32>,
    }

    impl CatalogTask for CountedTask {
        fn name(&self) -> &'static str {
            "counted"
        }

        fn tick(&mut self, _catalog: &mut Catalog) -> TaskStatus {
            self.ticks.fetch_add(1, Ordering::Relaxed);
            self.remaining -= 1;
            if self.remaining == 0 {
                TaskStatus::Done
            } else {
                TaskStatus::Again
            }
        }
    }

    #[test]
    fn tasks_run_until_done_then_drop_off() {
        let (mut catalog, _dir) = test_catalog();
        let ticks = Arc::new(AtomicU32::new(0));
        let mut scheduler = Scheduler::new();
        scheduler.add_task(Box::new(CountedTask {
            remaining: 3,
            ticks: ticks.clone(),
        }));
        assert!(scheduler.has_task("counted"));

        for _ in 0..5 {
            scheduler.tick(&mut catalog);
        }
        assert_eq!(ticks.load(Ordering::Relaxed), 3);
        assert!(scheduler.is_idle());
    }
}
