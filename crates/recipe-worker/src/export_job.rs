//! Weekly user data export and retention cleanup.

use chrono::{DateTime, Duration, Utc};

use recipe_db::UserExportRow;
use recipe_queue::{CleanupOldExportsJob, ExportUserDataJob};
use recipe_storage::{export_key, EXPORTS_PREFIX, EXPORT_FILE_PREFIX};

use crate::context::JobContext;
use crate::error::WorkerResult;
use crate::logging::JobLogger;
use crate::mailer::Email;

pub const EXPORT_COLUMNS: [&str; 12] = [
    "user_id",
    "username",
    "email",
    "role",
    "is_active",
    "full_name",
    "created_at",
    "last_login",
    "total_recipes",
    "total_ratings_given",
    "total_favorites",
    "avg_rating_received",
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Quote a field when it contains a separator, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains(|c: char| matches!(c, ',' | '"' | '\n' | '\r')) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn push_record<I, S>(out: &mut String, fields: I)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let line: Vec<String> = fields.into_iter().map(|f| csv_field(f.as_ref())).collect();
    out.push_str(&line.join(","));
    out.push_str("\r\n");
}

fn timestamp(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_default()
}

/// Render the export. Non-sellers report an average of 0; sellers get two
/// decimals.
pub fn render_csv(rows: &[UserExportRow]) -> String {
    let mut out = String::new();
    push_record(&mut out, EXPORT_COLUMNS);
    for row in rows {
        let user = &row.user;
        let full_name = [user.first_name.as_deref(), user.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let avg = match row.avg_rating_received {
            Some(avg) => format!("{avg:.2}"),
            None => "0".to_string(),
        };
        push_record(
            &mut out,
            [
                user.id.to_string(),
                user.username.clone(),
                user.email.clone(),
                user.role.to_string(),
                if user.is_active { "True" } else { "False" }.to_string(),
                full_name,
                timestamp(Some(user.created_at)),
                timestamp(user.last_login),
                row.total_recipes.to_string(),
                row.total_ratings_given.to_string(),
                row.total_favorites.to_string(),
                avg,
            ],
        );
    }
    out
}

/// Result of an export run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub key: String,
    pub users_exported: usize,
    pub notified: usize,
}

/// Write every user's activity counters to a CSV under the exports
/// directory and tell the superusers where it is.
///
/// The file name comes from the scheduled fire time, so a retried run
/// overwrites its own earlier attempt.
pub async fn export_user_data(
    ctx: &JobContext,
    job: &ExportUserDataJob,
    logger: &JobLogger,
) -> WorkerResult<ExportReport> {
    let rows = ctx.db.users().export_rows().await?;
    let csv = render_csv(&rows);
    let key = export_key(job.scheduled_for);
    ctx.storage.upload_bytes(csv.as_bytes(), &key).await?;
    logger.log_progress(&format!("exported {} users to {}", rows.len(), key));

    let admins = ctx.db.users().list_superusers().await?;
    let mut notified = 0;
    if !admins.is_empty() {
        let filename = key.rsplit('/').next().unwrap_or(&key);
        let location = ctx.storage.path_for(&key)?;
        let email = Email::new(
            admins.iter().map(|u| u.email.clone()).collect(),
            "Weekly User Data Export Completed",
            format!(
                "Weekly user data export has been completed.\n\nFile: {}\nUsers exported: {}\nLocation: {}",
                filename,
                rows.len(),
                location.display()
            ),
        );
        match ctx.mailer.send(&email).await {
            Ok(()) => notified = admins.len(),
            Err(e) => logger.log_warning(&format!("export notification failed: {e}")),
        }
    }

    logger.log_completion(&format!("{} users, {} admins notified", rows.len(), notified));
    Ok(ExportReport {
        key,
        users_exported: rows.len(),
        notified,
    })
}

fn is_export_file(key: &str) -> bool {
    key.rsplit('/')
        .next()
        .is_some_and(|name| name.starts_with(EXPORT_FILE_PREFIX) && name.ends_with(".csv"))
}

/// Delete export files last modified before `scheduled_for - retention_days`.
/// Returns how many were removed.
pub async fn cleanup_old_exports(
    ctx: &JobContext,
    job: &CleanupOldExportsJob,
    logger: &JobLogger,
) -> WorkerResult<usize> {
    let cutoff = job.scheduled_for - Duration::days(i64::from(job.retention_days));
    let mut deleted = 0;

    for object in ctx.storage.list_objects(EXPORTS_PREFIX).await? {
        if !is_export_file(&object.key) {
            continue;
        }
        let Some(modified) = object.last_modified else {
            continue;
        };
        if modified >= cutoff {
            continue;
        }
        match ctx.storage.delete_object(&object.key).await {
            Ok(_) => {
                deleted += 1;
                logger.log_progress(&format!("deleted {}", object.key));
            }
            Err(e) => logger.log_warning(&format!("could not delete {}: {}", object.key, e)),
        }
    }

    logger.log_completion(&format!("removed {deleted} export files older than {cutoff}"));
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::TimeZone;
    use recipe_db::{Database, NewAccount, NewSellerProfile, RatingUpsert};
    use recipe_models::{Role, User, UserId};
    use recipe_queue::QueueJob;
    use recipe_storage::{MediaConfig, MediaStorage};

    use super::*;
    use crate::config::WorkerConfig;
    use crate::mailer::MockMailer;

    fn user(first: Option<&str>, last: Option<&str>, role: Role) -> User {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        User {
            id: UserId::new(),
            username: "chef".to_string(),
            email: "chef@example.com".to_string(),
            first_name: first.map(str::to_string),
            last_name: last.map(str::to_string),
            role,
            password_hash: String::new(),
            is_active: true,
            is_staff: false,
            is_superuser: false,
            auth_provider: "email".to_string(),
            created_at: at,
            updated_at: at,
            last_login: None,
        }
    }

    async fn context(mailer: MockMailer) -> (tempfile::TempDir, JobContext) {
        let dir = tempfile::tempdir().unwrap();
        let storage = MediaStorage::new(MediaConfig {
            root: dir.path().to_path_buf(),
            base_url: "/media/".to_string(),
        })
        .await
        .unwrap();
        let db = Database::in_memory().await.unwrap();
        (dir, JobContext::new(WorkerConfig::default(), db, storage, Arc::new(mailer)))
    }

    fn account(username: &str, role: Role) -> NewAccount {
        NewAccount {
            username: username.to_string(),
            email: format!("{username}@example.com"),
            first_name: None,
            last_name: None,
            role,
            password_hash: "x".to_string(),
            seller: (role == Role::Seller).then(|| NewSellerProfile {
                gst_number: "29ABCDE1234F1Z5".to_string(),
                business_name: "Spice Route".to_string(),
            }),
        }
    }

    #[test]
    fn fields_with_commas_and_quotes_are_quoted() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("Rao, Asha"), "\"Rao, Asha\"");
        assert_eq!(csv_field("the \"chef\""), "\"the \"\"chef\"\"\"");
    }

    #[test]
    fn renders_header_and_rows() {
        let rows = vec![
            UserExportRow {
                user: user(Some("Asha"), Some("Rao, Jr"), Role::Seller),
                total_recipes: 2,
                total_ratings_given: 0,
                total_favorites: 1,
                avg_rating_received: Some(4.5),
            },
            UserExportRow {
                user: user(None, None, Role::Customer),
                total_recipes: 0,
                total_ratings_given: 3,
                total_favorites: 0,
                avg_rating_received: None,
            },
        ];
        let csv = render_csv(&rows);
        let lines: Vec<&str> = csv.split("\r\n").collect();
        assert_eq!(lines[0], EXPORT_COLUMNS.join(","));
        assert!(lines[1].ends_with(
            ",chef,chef@example.com,seller,True,\"Asha Rao, Jr\",2024-01-02 03:04:05,,2,0,1,4.50"
        ));
        assert!(lines[2].ends_with(",customer,True,,2024-01-02 03:04:05,,0,3,0,0"));
        assert_eq!(lines[3], "");
    }

    #[test]
    fn only_export_csvs_are_cleanup_candidates() {
        assert!(is_export_file("exports/user_data_export_20240303_020000.csv"));
        assert!(!is_export_file("exports/notes.csv"));
        assert!(!is_export_file("exports/user_data_export_20240303_020000.txt"));
    }

    #[tokio::test]
    async fn export_writes_file_and_notifies_superusers() {
        let sent = Arc::new(Mutex::new(Vec::<Email>::new()));
        let outbox = Arc::clone(&sent);
        let mut mailer = MockMailer::new();
        mailer.expect_send().times(1).returning(move |email| {
            outbox.lock().unwrap().push(email.clone());
            Ok(())
        });
        let (_dir, ctx) = context(mailer).await;

        let users = ctx.db.users();
        let seller = users.create(&account("ravi", Role::Seller)).await.unwrap();
        let customer = users.create(&account("asha", Role::Customer)).await.unwrap();
        let admin = users.create(&account("root", Role::Customer)).await.unwrap();
        users.set_superuser(&admin.id, true).await.unwrap();

        let recipe = ctx
            .db
            .recipes()
            .create(
                &seller.id,
                &recipe_db::NewRecipe {
                    title: "Upma".to_string(),
                    description: "breakfast".to_string(),
                    ingredients: "semolina".to_string(),
                    instructions: "stir".to_string(),
                    prep_time: 5,
                    cook_time: 10,
                    servings: 2,
                    difficulty: recipe_models::Difficulty::Easy,
                    category_id: None,
                    is_published: true,
                    is_featured: false,
                    tags: Vec::new(),
                },
            )
            .await
            .unwrap();
        ctx.db
            .ratings()
            .upsert(&RatingUpsert {
                recipe_id: recipe.id,
                user_id: customer.id,
                rating: 4,
                review: None,
            })
            .await
            .unwrap();

        let at = Utc.with_ymd_and_hms(2024, 3, 3, 2, 0, 0).unwrap();
        let job = ExportUserDataJob::new(at);
        let logger = JobLogger::new(&QueueJob::ExportUserData(job.clone()));
        let report = export_user_data(&ctx, &job, &logger).await.unwrap();

        assert_eq!(report.key, "exports/user_data_export_20240303_020000.csv");
        assert_eq!(report.users_exported, 3);
        assert_eq!(report.notified, 1);

        let csv = String::from_utf8(ctx.storage.download_bytes(&report.key).await.unwrap()).unwrap();
        let ravi = csv.lines().find(|l| l.contains("ravi@example.com")).unwrap();
        assert!(ravi.ends_with(",1,0,0,4.00"));
        let asha = csv.lines().find(|l| l.contains("asha@example.com")).unwrap();
        assert!(asha.ends_with(",0,1,0,0"));

        let sent = sent.lock().unwrap();
        assert_eq!(sent[0].to, vec!["root@example.com".to_string()]);
        assert_eq!(sent[0].subject, "Weekly User Data Export Completed");
        assert!(sent[0]
            .text
            .contains("File: user_data_export_20240303_020000.csv\nUsers exported: 3\nLocation: "));
    }

    #[tokio::test]
    async fn cleanup_removes_only_expired_exports() {
        let mut mailer = MockMailer::new();
        mailer.expect_send().never();
        let (_dir, ctx) = context(mailer).await;
        ctx.storage
            .upload_bytes(b"a", "exports/user_data_export_20240101_020000.csv")
            .await
            .unwrap();
        ctx.storage.upload_bytes(b"b", "exports/keep-me.csv").await.unwrap();

        // Files written just now are inside the retention window.
        let job = CleanupOldExportsJob::new(Utc::now());
        let logger = JobLogger::new(&QueueJob::CleanupOldExports(job.clone()));
        assert_eq!(cleanup_old_exports(&ctx, &job, &logger).await.unwrap(), 0);

        // A run 29 days from now sees them as expired.
        let job = CleanupOldExportsJob::new(Utc::now() + Duration::days(29));
        assert_eq!(cleanup_old_exports(&ctx, &job, &logger).await.unwrap(), 1);
        assert!(!ctx
            .storage
            .exists("exports/user_data_export_20240101_020000.csv")
            .await
            .unwrap());
        assert!(ctx.storage.exists("exports/keep-me.csv").await.unwrap());
    }

    #[tokio::test]
    async fn cleanup_without_exports_directory_is_a_no_op() {
        let (_dir, ctx) = context(MockMailer::new()).await;
        let job = CleanupOldExportsJob::new(Utc::now()).with_retention_days(0);
        let logger = JobLogger::new(&QueueJob::CleanupOldExports(job.clone()));
        assert_eq!(cleanup_old_exports(&ctx, &job, &logger).await.unwrap(), 0);
    }
}
