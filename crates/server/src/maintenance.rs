use std::time::{Duration, Instant};

use catalog::{CommitTask, CompilationClassifier, GarbageCollector};
use tracing::debug;

use crate::state::{AppState, ScanStatus};

/// Drives the cooperative scheduler: one tick per interval, with the
/// garbage collector and compilation classifier re-seeded after each
/// rest period. Periodic commits run as a scheduler task from startup.
pub fn start_maintenance(state: AppState) {
    let (tick_ms, rest_secs, throttle, commit_secs) = {
        let config = state.config.read();
        (
            config.maintenance_tick_ms.max(1),
            config.maintenance_rest_secs,
            config.catalog.maintenance_throttle_ticks,
            config.catalog.commit_interval_secs,
        )
    };
    state
        .scheduler
        .lock()
        .add_task(Box::new(CommitTask::new(Duration::from_secs(commit_secs))));

    tokio::spawn(async move {
        let rest = Duration::from_secs(rest_secs);
        let mut last_sweep = Instant::now();
        let mut interval = tokio::time::interval(Duration::from_millis(tick_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            {
                let mut scheduler = state.scheduler.lock();
                let mut catalog = state.catalog.lock();
                scheduler.tick(&mut catalog);

                let scanning = matches!(*state.scan.read(), ScanStatus::Scanning { .. });
                if !scanning
                    && !scheduler.has_task("gc")
                    && !scheduler.has_task("classify")
                    && last_sweep.elapsed() >= rest
                {
                    debug!("seeding maintenance sweep");
                    scheduler.add_task(Box::new(GarbageCollector::new(throttle)));
                    scheduler.add_task(Box::new(CompilationClassifier::new(throttle)));
                    last_sweep = Instant::now();
                }
            }
        }
    });
}
