//! Welcome mail and the weekday recipe digest.

use std::fmt::Write;

use chrono::{DateTime, Datelike, Duration, Utc, Weekday};

use recipe_models::{RecipeSummary, Role, User};
use recipe_queue::{SendDailyEmailJob, SendWelcomeEmailJob};

use crate::context::JobContext;
use crate::error::WorkerResult;
use crate::logging::JobLogger;
use crate::mailer::Email;

pub const RECENT_LIMIT: i64 = 5;
pub const FEATURED_LIMIT: i64 = 3;
pub const RECENT_WINDOW_DAYS: i64 = 7;

fn role_label(role: Role) -> &'static str {
    match role {
        Role::Customer => "Customer",
        Role::Seller => "Seller",
    }
}

pub fn welcome_email(user: &User) -> Email {
    let text = format!(
        "Hello {name},\n\n\
         Welcome to our platform! Your account has been created successfully.\n\n\
         Account Details:\n\
         - Email: {email}\n\
         - Role: {role}\n\n\
         Thank you for joining us!\n\n\
         Best regards,\n\
         The Team",
        name = user.full_name(),
        email = user.email,
        role = role_label(user.role),
    );
    Email::new(vec![user.email.clone()], "Welcome to Our Platform!", text)
}

pub async fn send_welcome_email(
    ctx: &JobContext,
    job: &SendWelcomeEmailJob,
    logger: &JobLogger,
) -> WorkerResult<()> {
    let Some(user) = ctx.db.users().get(&job.user_id).await? else {
        logger.log_warning(&format!("user {} no longer exists", job.user_id));
        return Ok(());
    };
    ctx.mailer.send(&welcome_email(&user)).await?;
    logger.log_completion(&format!("welcome mail sent to {}", user.email));
    Ok(())
}

/// Outcome of one digest run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DigestReport {
    pub skipped_weekend: bool,
    pub sent: usize,
    pub failed: usize,
}

pub fn is_weekend(at: DateTime<Utc>) -> bool {
    matches!(at.weekday(), Weekday::Sat | Weekday::Sun)
}

fn digest_date(at: DateTime<Utc>) -> String {
    at.format("%B %d, %Y").to_string()
}

pub fn digest_subject(at: DateTime<Utc>) -> String {
    format!("Daily Recipe Updates - {}", digest_date(at))
}

fn list_line(out: &mut String, recipe: &RecipeSummary) {
    let _ = writeln!(out, "- {} by {}", recipe.title, recipe.author.full_name);
}

pub fn digest_text(
    user: &User,
    at: DateTime<Utc>,
    recent: &[RecipeSummary],
    featured: &[RecipeSummary],
) -> String {
    let mut text = format!(
        "Dear {},\n\nHere are your daily recipe updates for {}:\n\nRecent Recipes:\n",
        user.full_name(),
        digest_date(at)
    );
    for recipe in recent {
        list_line(&mut text, recipe);
    }
    if !featured.is_empty() {
        text.push_str("\nFeatured Recipes:\n");
        for recipe in featured {
            list_line(&mut text, recipe);
        }
    }
    text.push_str(
        "\n\nVisit our platform to explore more recipes!\n\nBest regards,\nRecipe Platform Team",
    );
    text
}

/// Mail every active user the recipes of the past week plus a few featured
/// ones. Does nothing on Saturday and Sunday.
///
/// A failed delivery is counted and the run continues with the next user.
pub async fn send_daily_email(
    ctx: &JobContext,
    job: &SendDailyEmailJob,
    logger: &JobLogger,
) -> WorkerResult<DigestReport> {
    let at = job.scheduled_for;
    if is_weekend(at) {
        logger.log_completion("skipped, weekend");
        return Ok(DigestReport {
            skipped_weekend: true,
            ..Default::default()
        });
    }

    let users = ctx.db.users().list_active().await?;
    if users.is_empty() {
        logger.log_completion("no active users");
        return Ok(DigestReport::default());
    }

    let recipes = ctx.db.recipes();
    let recent = recipes
        .recent_published(at - Duration::days(RECENT_WINDOW_DAYS), RECENT_LIMIT)
        .await?;
    let featured = recipes.featured(FEATURED_LIMIT, None).await?;
    let subject = digest_subject(at);
    logger.log_progress(&format!(
        "{} users, {} recent, {} featured",
        users.len(),
        recent.len(),
        featured.len()
    ));

    let mut report = DigestReport::default();
    for user in &users {
        let email = Email::new(
            vec![user.email.clone()],
            subject.clone(),
            digest_text(user, at, &recent, &featured),
        );
        match ctx.mailer.send(&email).await {
            Ok(()) => report.sent += 1,
            Err(e) => {
                report.failed += 1;
                logger.log_warning(&format!("digest to {} failed: {}", user.email, e));
            }
        }
    }

    metrics::counter!("recipe_digest_emails_total", "outcome" => "sent")
        .increment(report.sent as u64);
    metrics::counter!("recipe_digest_emails_total", "outcome" => "failed")
        .increment(report.failed as u64);
    logger.log_completion(&format!("sent {}, failed {}", report.sent, report.failed));
    Ok(report)
}
