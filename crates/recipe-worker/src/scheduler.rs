//! Periodic job scheduler (beat).
//!
//! Each entry fires at a fixed UTC wall-clock time, optionally only on one
//! weekday. Jobs carry their fire time, and the queue's idempotency key is
//! derived from it, so running several schedulers enqueues each slot once.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc, Weekday};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use recipe_queue::{
    CleanupOldExportsJob, ExportUserDataJob, QueueError, QueueJob, SendDailyEmailJob, TaskQueue,
};

use crate::retry::{retry_async, FailureTracker, RetryPolicy};

/// Which job an entry produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledTask {
    DailyEmail,
    ExportUserData,
    CleanupOldExports,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub task: ScheduledTask,
    /// Fire only on this weekday; every day when `None`
    pub weekday: Option<Weekday>,
    pub time: NaiveTime,
}

impl ScheduleEntry {
    /// Returns `None` for an out-of-range hour or minute.
    pub fn new(task: ScheduledTask, weekday: Option<Weekday>, hour: u32, minute: u32) -> Option<Self> {
        Some(Self {
            task,
            weekday,
            time: NaiveTime::from_hms_opt(hour, minute, 0)?,
        })
    }

    /// First fire time strictly after `after`.
    pub fn next_fire(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        let mut candidate = Utc.from_utc_datetime(&after.date_naive().and_time(self.time));
        if candidate <= after {
            candidate += Duration::days(1);
        }
        if let Some(weekday) = self.weekday {
            let ahead = (weekday.num_days_from_monday() + 7
                - candidate.weekday().num_days_from_monday())
                % 7;
            candidate += Duration::days(i64::from(ahead));
        }
        candidate
    }

    pub fn job(&self, at: DateTime<Utc>, retention_days: u32) -> QueueJob {
        match self.task {
            ScheduledTask::DailyEmail => QueueJob::SendDailyEmail(SendDailyEmailJob::new(at)),
            ScheduledTask::ExportUserData => QueueJob::ExportUserData(ExportUserDataJob::new(at)),
            ScheduledTask::CleanupOldExports => QueueJob::CleanupOldExports(
                CleanupOldExportsJob::new(at).with_retention_days(retention_days),
            ),
        }
    }
}

/// Daily digest at 06:00, export Sunday 02:00, cleanup Sunday 03:00.
pub fn default_schedule() -> Vec<ScheduleEntry> {
    [
        (ScheduledTask::DailyEmail, None, 6),
        (ScheduledTask::ExportUserData, Some(Weekday::Sun), 2),
        (ScheduledTask::CleanupOldExports, Some(Weekday::Sun), 3),
    ]
    .into_iter()
    .filter_map(|(task, weekday, hour)| ScheduleEntry::new(task, weekday, hour, 0))
    .collect()
}

pub struct Scheduler {
    entries: Vec<ScheduleEntry>,
    queue: Arc<dyn TaskQueue>,
    retention_days: u32,
    policy: RetryPolicy,
}

impl Scheduler {
    pub fn new(entries: Vec<ScheduleEntry>, queue: Arc<dyn TaskQueue>, retention_days: u32) -> Self {
        Self {
            entries,
            queue,
            retention_days,
            policy: RetryPolicy::new("schedule_enqueue"),
        }
    }

    /// Earliest upcoming slot across all entries and the entries due then.
    pub fn next_slot(&self, after: DateTime<Utc>) -> Option<(DateTime<Utc>, Vec<ScheduleEntry>)> {
        let at = self.entries.iter().map(|e| e.next_fire(after)).min()?;
        let due = self
            .entries
            .iter()
            .filter(|e| e.next_fire(after) == at)
            .copied()
            .collect();
        Some((at, due))
    }

    /// Enqueue one entry's job for slot `at`.
    ///
    /// Returns false when another scheduler already enqueued this slot.
    pub async fn fire(&self, entry: &ScheduleEntry, at: DateTime<Utc>) -> Result<bool, QueueError> {
        let job = entry.job(at, self.retention_days);
        let kind = job.kind();
        let result = retry_async(&self.policy, || {
            let job = job.clone();
            async move {
                match self.queue.enqueue(job).await {
                    Err(e) if e.is_duplicate() => Ok(false),
                    Err(e) => Err(e),
                    Ok(_) => Ok(true),
                }
            }
        })
        .await
        .map_err(|(e, _)| e)?;

        if result {
            info!(kind, fire_time = %at, "Scheduled job enqueued");
            metrics::counter!("recipe_jobs_scheduled_total", "kind" => kind).increment(1);
        } else {
            debug!(kind, fire_time = %at, "Slot already enqueued elsewhere");
        }
        Ok(result)
    }

    /// Sleep until each slot and enqueue its jobs, until `shutdown` flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        if self.entries.is_empty() {
            warn!("Scheduler started with no entries");
            return Ok(());
        }
        info!("Scheduler started with {} entries", self.entries.len());
        let mut failures = FailureTracker::new(3);
        let mut after = Utc::now();

        while let Some((at, due)) = self.next_slot(after) {
            let wait = (at - Utc::now()).to_std().unwrap_or_default();
            debug!("Next scheduled slot {} in {:?}", at, wait);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            for entry in &due {
                match self.fire(entry, at).await {
                    Ok(_) => failures.record_success(),
                    Err(e) => {
                        if failures.record_failure() {
                            warn!("Failed to enqueue {:?} for {}: {}", entry.task, at, e);
                        }
                    }
                }
            }
            after = at;
        }

        info!("Scheduler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use recipe_queue::InMemoryQueue;

    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn entry(task: ScheduledTask, weekday: Option<Weekday>, hour: u32) -> ScheduleEntry {
        ScheduleEntry::new(task, weekday, hour, 0).unwrap()
    }

    #[test]
    fn daily_entry_fires_today_or_tomorrow() {
        let daily = entry(ScheduledTask::DailyEmail, None, 6);
        // 2024-03-06 is a Wednesday
        assert_eq!(daily.next_fire(utc(2024, 3, 6, 5, 59)), utc(2024, 3, 6, 6, 0));
        assert_eq!(daily.next_fire(utc(2024, 3, 6, 6, 0)), utc(2024, 3, 7, 6, 0));
        assert_eq!(daily.next_fire(utc(2024, 3, 6, 23, 0)), utc(2024, 3, 7, 6, 0));
    }

    #[test]
    fn weekly_entry_waits_for_its_weekday() {
        let export = entry(ScheduledTask::ExportUserData, Some(Weekday::Sun), 2);
        assert_eq!(export.next_fire(utc(2024, 3, 6, 12, 0)), utc(2024, 3, 10, 2, 0));
        assert_eq!(export.next_fire(utc(2024, 3, 10, 1, 0)), utc(2024, 3, 10, 2, 0));
        assert_eq!(export.next_fire(utc(2024, 3, 10, 2, 0)), utc(2024, 3, 17, 2, 0));
    }

    #[test]
    fn rejects_invalid_times() {
        assert!(ScheduleEntry::new(ScheduledTask::DailyEmail, None, 24, 0).is_none());
        assert!(ScheduleEntry::new(ScheduledTask::DailyEmail, None, 6, 60).is_none());
    }

    #[test]
    fn default_schedule_order_of_a_sunday() {
        let scheduler = Scheduler::new(default_schedule(), Arc::new(InMemoryQueue::default()), 28);
        let saturday_night = utc(2024, 3, 9, 23, 0);

        let (at, due) = scheduler.next_slot(saturday_night).unwrap();
        assert_eq!(at, utc(2024, 3, 10, 2, 0));
        assert_eq!(due[0].task, ScheduledTask::ExportUserData);

        let (at, due) = scheduler.next_slot(at).unwrap();
        assert_eq!(at, utc(2024, 3, 10, 3, 0));
        assert_eq!(due[0].task, ScheduledTask::CleanupOldExports);

        let (at, due) = scheduler.next_slot(at).unwrap();
        assert_eq!(at, utc(2024, 3, 10, 6, 0));
        assert_eq!(due[0].task, ScheduledTask::DailyEmail);
    }

    #[tokio::test]
    async fn two_schedulers_enqueue_a_slot_once() {
        let queue = Arc::new(InMemoryQueue::default());
        let a = Scheduler::new(default_schedule(), queue.clone(), 28);
        let b = Scheduler::new(default_schedule(), queue.clone(), 28);
        let cleanup = entry(ScheduledTask::CleanupOldExports, Some(Weekday::Sun), 3);
        let at = utc(2024, 3, 10, 3, 0);

        assert!(a.fire(&cleanup, at).await.unwrap());
        assert!(!b.fire(&cleanup, at).await.unwrap());

        let jobs = queue.queued_jobs().await;
        assert_eq!(jobs.len(), 1);
        match &jobs[0] {
            QueueJob::CleanupOldExports(job) => {
                assert_eq!(job.scheduled_for, at);
                assert_eq!(job.retention_days, 28);
            }
            other => panic!("unexpected job {other:?}"),
        }
    }

    #[tokio::test]
    async fn run_returns_on_shutdown() {
        let scheduler = Scheduler::new(default_schedule(), Arc::new(InMemoryQueue::default()), 28);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(rx));
        tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
