//! Job types for the queue.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use recipe_models::{RecipeId, UserId};

/// Days an export file is kept before cleanup removes it.
pub const DEFAULT_EXPORT_RETENTION_DAYS: u32 = 28;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fire time formatted for idempotency keys.
fn slot(at: &DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M").to_string()
}

/// Resize and re-encode an uploaded recipe image in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRecipeImageJob {
    pub job_id: JobId,
    pub image_id: Uuid,
    pub recipe_id: RecipeId,
    pub created_at: DateTime<Utc>,
}

impl ProcessRecipeImageJob {
    pub fn new(image_id: Uuid, recipe_id: RecipeId) -> Self {
        Self {
            job_id: JobId::new(),
            image_id,
            recipe_id,
            created_at: Utc::now(),
        }
    }

    pub fn idempotency_key(&self) -> String {
        format!("image:{}", self.image_id)
    }
}

/// Greet a newly registered user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendWelcomeEmailJob {
    pub job_id: JobId,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
}

impl SendWelcomeEmailJob {
    pub fn new(user_id: UserId) -> Self {
        Self {
            job_id: JobId::new(),
            user_id,
            created_at: Utc::now(),
        }
    }

    pub fn idempotency_key(&self) -> String {
        format!("welcome:{}", self.user_id)
    }
}

/// Weekday digest of new and featured recipes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendDailyEmailJob {
    pub job_id: JobId,
    /// Fire time the scheduler computed for this run
    pub scheduled_for: DateTime<Utc>,
}

impl SendDailyEmailJob {
    pub fn new(scheduled_for: DateTime<Utc>) -> Self {
        Self {
            job_id: JobId::new(),
            scheduled_for,
        }
    }

    pub fn idempotency_key(&self) -> String {
        format!("daily_email:{}", slot(&self.scheduled_for))
    }
}

/// Weekly CSV export of user activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportUserDataJob {
    pub job_id: JobId,
    pub scheduled_for: DateTime<Utc>,
}

impl ExportUserDataJob {
    pub fn new(scheduled_for: DateTime<Utc>) -> Self {
        Self {
            job_id: JobId::new(),
            scheduled_for,
        }
    }

    pub fn idempotency_key(&self) -> String {
        format!("export_user_data:{}", slot(&self.scheduled_for))
    }
}

fn default_retention_days() -> u32 {
    DEFAULT_EXPORT_RETENTION_DAYS
}

/// Remove export files past their retention period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupOldExportsJob {
    pub job_id: JobId,
    pub scheduled_for: DateTime<Utc>,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl CleanupOldExportsJob {
    pub fn new(scheduled_for: DateTime<Utc>) -> Self {
        Self {
            job_id: JobId::new(),
            scheduled_for,
            retention_days: DEFAULT_EXPORT_RETENTION_DAYS,
        }
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    pub fn idempotency_key(&self) -> String {
        format!("cleanup_old_exports:{}", slot(&self.scheduled_for))
    }
}

/// Generic job wrapper for queue storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueJob {
    ProcessRecipeImage(ProcessRecipeImageJob),
    SendWelcomeEmail(SendWelcomeEmailJob),
    SendDailyEmail(SendDailyEmailJob),
    ExportUserData(ExportUserDataJob),
    CleanupOldExports(CleanupOldExportsJob),
}

impl QueueJob {
    pub fn job_id(&self) -> &JobId {
        match self {
            QueueJob::ProcessRecipeImage(j) => &j.job_id,
            QueueJob::SendWelcomeEmail(j) => &j.job_id,
            QueueJob::SendDailyEmail(j) => &j.job_id,
            QueueJob::ExportUserData(j) => &j.job_id,
            QueueJob::CleanupOldExports(j) => &j.job_id,
        }
    }

    pub fn idempotency_key(&self) -> String {
        match self {
            QueueJob::ProcessRecipeImage(j) => j.idempotency_key(),
            QueueJob::SendWelcomeEmail(j) => j.idempotency_key(),
            QueueJob::SendDailyEmail(j) => j.idempotency_key(),
            QueueJob::ExportUserData(j) => j.idempotency_key(),
            QueueJob::CleanupOldExports(j) => j.idempotency_key(),
        }
    }

    /// Stable name used in logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            QueueJob::ProcessRecipeImage(_) => "process_recipe_image",
            QueueJob::SendWelcomeEmail(_) => "send_welcome_email",
            QueueJob::SendDailyEmail(_) => "send_daily_email",
            QueueJob::ExportUserData(_) => "export_user_data",
            QueueJob::CleanupOldExports(_) => "cleanup_old_exports",
        }
    }

    /// True for jobs enqueued by the scheduler rather than a request.
    pub fn is_scheduled(&self) -> bool {
        matches!(
            self,
            QueueJob::SendDailyEmail(_) | QueueJob::ExportUserData(_) | QueueJob::CleanupOldExports(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let job = QueueJob::SendWelcomeEmail(SendWelcomeEmailJob::new(UserId::new()));
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["type"], "send_welcome_email");

        let decoded: QueueJob = serde_json::from_value(json).unwrap();
        assert_eq!(decoded.job_id(), job.job_id());
        assert_eq!(decoded.kind(), "send_welcome_email");
    }

    #[test]
    fn scheduled_keys_depend_only_on_fire_time() {
        let at = Utc.with_ymd_and_hms(2024, 3, 4, 6, 0, 0).unwrap();
        let a = QueueJob::SendDailyEmail(SendDailyEmailJob::new(at));
        let b = QueueJob::SendDailyEmail(SendDailyEmailJob::new(at));
        assert_ne!(a.job_id(), b.job_id());
        assert_eq!(a.idempotency_key(), b.idempotency_key());
        assert_eq!(a.idempotency_key(), "daily_email:20240304T0600");
        assert!(a.is_scheduled());
    }

    #[test]
    fn cleanup_retention_defaults_when_missing() {
        let json = serde_json::json!({
            "type": "cleanup_old_exports",
            "job_id": "abc",
            "scheduled_for": "2024-03-03T03:00:00Z"
        });
        match serde_json::from_value::<QueueJob>(json).unwrap() {
            QueueJob::CleanupOldExports(j) => {
                assert_eq!(j.retention_days, DEFAULT_EXPORT_RETENTION_DAYS)
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
