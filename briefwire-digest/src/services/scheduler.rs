//! Digest scheduler
//!
//! Hourly tick over all users: evaluates who is due, pre-warms the
//! scraper cache across the union of due users' RSS URLs, then runs the
//! pipeline per user. Failures never cross user boundaries.
//!
//! Overlapping ticks are deliberately unguarded (the persistence layer
//! offers no leases): two concurrent runs of the same user produce only
//! upserts against unique constraints, so the second is absorbed as a
//! no-op.

use briefwire_common::db::models::User;
use chrono::{DateTime, Timelike, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

use crate::db::{sources, users};
use crate::services::digest_orchestrator::DigestOrchestrator;
use crate::services::email_notifier::EmailNotifier;
use crate::services::feed_scraper::FeedScraper;

const TICK_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Due-time evaluation for one user at `now`
pub fn is_due(user: &User, now: DateTime<Utc>) -> bool {
    // Unknown frequency (outside the closed set) never fires
    let Some(frequency) = user.digest_frequency else {
        return false;
    };

    let interval = frequency.interval();

    let elapsed = match user.last_digest_at {
        None => true,
        Some(last) => now - last >= interval,
    };
    if !elapsed {
        return false;
    }

    // Daily-or-slower digests additionally wait for the configured hour
    if interval >= chrono::Duration::days(1) {
        let Some(due_hour) = user
            .digest_time
            .split(':')
            .next()
            .and_then(|h| h.parse::<u32>().ok())
        else {
            return false;
        };
        if now.hour() != due_hour {
            return false;
        }
    }

    true
}

/// Hourly digest scheduler
pub struct Scheduler {
    db: SqlitePool,
    orchestrator: Arc<DigestOrchestrator>,
    scraper: Arc<FeedScraper>,
    email: Option<EmailNotifier>,
}

impl Scheduler {
    pub fn new(
        db: SqlitePool,
        orchestrator: Arc<DigestOrchestrator>,
        scraper: Arc<FeedScraper>,
        email: Option<EmailNotifier>,
    ) -> Self {
        Self {
            db,
            orchestrator,
            scraper,
            email,
        }
    }

    /// One scheduler tick. Returns the number of users digested.
    pub async fn tick(&self, now: DateTime<Utc>) -> usize {
        let all_users = match users::load_all_users(&self.db).await {
            Ok(users) => users,
            Err(e) => {
                tracing::error!(error = %e, "Scheduler could not load users");
                return 0;
            }
        };

        let due: Vec<User> = all_users
            .into_iter()
            .filter(|user| is_due(user, now))
            .collect();

        if due.is_empty() {
            tracing::debug!("Scheduler tick: no users due");
            return 0;
        }

        tracing::info!(due = due.len(), "Scheduler tick");

        // Pre-warm the scrape cache so per-user runs hit it
        let due_ids: Vec<_> = due.iter().map(|u| u.id).collect();
        match sources::distinct_rss_urls(&self.db, &due_ids).await {
            Ok(urls) => self.scraper.prewarm(&urls).await,
            Err(e) => tracing::warn!(error = %e, "Pre-warm URL query failed"),
        }

        let mut ran = 0;
        for user in due {
            let summary = self.orchestrator.run_digest(&user).await;

            if let Err(e) = users::update_last_digest(&self.db, user.id, now).await {
                tracing::error!(user_id = %user.id, error = %e, "Failed to record digest time");
            }

            if user.email_enabled && summary.matched > 0 {
                if let Some(email) = &self.email {
                    if let Err(e) = email.send_digest_ready(&user, &summary).await {
                        tracing::warn!(user_id = %user.id, error = %e, "Digest notification failed");
                    }
                }
            }

            ran += 1;
        }

        ran
    }

    /// Run the scheduler loop forever (spawned as a background task)
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            let ran = self.tick(Utc::now()).await;
            if ran > 0 {
                tracing::info!(users = ran, "Scheduler tick complete");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use briefwire_common::db::models::DigestFrequency;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn user(
        frequency: Option<DigestFrequency>,
        last: Option<DateTime<Utc>>,
        digest_time: &str,
    ) -> User {
        User {
            id: Uuid::new_v4(),
            email: "user@example.com".to_string(),
            industry_id: None,
            digest_frequency: frequency,
            digest_time: digest_time.to_string(),
            last_digest_at: last,
            email_enabled: true,
            onboarded: true,
        }
    }

    #[test]
    fn test_never_digested_hourly_user_is_due() {
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 14, 0, 0).unwrap();
        assert!(is_due(&user(Some(DigestFrequency::Hours1), None, "08:00"), now));
    }

    #[test]
    fn test_unknown_frequency_never_due() {
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 8, 0, 0).unwrap();
        assert!(!is_due(&user(None, None, "08:00"), now));
    }

    #[test]
    fn test_interval_not_elapsed() {
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 14, 0, 0).unwrap();
        let recent = now - chrono::Duration::hours(2);
        assert!(!is_due(&user(Some(DigestFrequency::Hours3), Some(recent), "08:00"), now));

        let old = now - chrono::Duration::hours(4);
        assert!(is_due(&user(Some(DigestFrequency::Hours3), Some(old), "08:00"), now));
    }

    #[test]
    fn test_daily_user_waits_for_configured_hour() {
        let user = user(
            Some(DigestFrequency::Days1),
            Some(Utc.with_ymd_and_hms(2025, 6, 8, 8, 0, 0).unwrap()),
            "08:00",
        );

        let wrong_hour = Utc.with_ymd_and_hms(2025, 6, 10, 14, 0, 0).unwrap();
        assert!(!is_due(&user, wrong_hour));

        let right_hour = Utc.with_ymd_and_hms(2025, 6, 10, 8, 30, 0).unwrap();
        assert!(is_due(&user, right_hour));
    }

    #[test]
    fn test_hourly_user_ignores_digest_time() {
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 14, 0, 0).unwrap();
        let last = now - chrono::Duration::hours(2);
        assert!(is_due(&user(Some(DigestFrequency::Hours1), Some(last), "08:00"), now));
    }

    #[test]
    fn test_unparseable_digest_time_blocks_daily() {
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 8, 0, 0).unwrap();
        assert!(!is_due(&user(Some(DigestFrequency::Days1), None, "morning"), now));
    }
}
