//! Periodic background sweep.
//!
//! A single recurring task that purges expired content and updates streak
//! windows, so storage is reclaimed even for content nobody reads again.
//!
//! Ticks never overlap: the loop body awaits each tick to completion before
//! asking the interval for the next one, and missed ticks are skipped rather
//! than queued.  Per-item payload failures are logged and retried on the
//! next tick; they never abort the rest of the batch.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::lifecycle::{LifecycleEngine, PurgeReport};
use crate::streaks::{StreakSweepStats, StreakTracker};
use crate::Result;

/// Counters from one sweep tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub purge: PurgeReport,
    pub streaks: StreakSweepStats,
}

impl SweepReport {
    /// True when the tick had nothing to do.
    pub fn is_quiet(&self) -> bool {
        *self == Self::default()
    }
}

/// Drives [`LifecycleEngine::purge_expired`] and
/// [`StreakTracker::evaluate_all`] on a fixed interval.
#[derive(Clone)]
pub struct Sweeper {
    engine: LifecycleEngine,
    tracker: StreakTracker,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl Sweeper {
    pub fn new(
        engine: LifecycleEngine,
        tracker: StreakTracker,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            engine,
            tracker,
            clock,
            interval,
        }
    }

    /// Execute one sweep pass at the given instant.
    ///
    /// Exposed separately from [`run`](Self::run) so tests can drive the
    /// sweep with a manual clock, one tick at a time.
    pub async fn tick(&self, now: chrono::DateTime<chrono::Utc>) -> Result<SweepReport> {
        let purge = self.engine.purge_expired(now).await?;
        let streaks = self.tracker.evaluate_all(now).await?;
        Ok(SweepReport { purge, streaks })
    }

    /// Run the sweep loop forever.  Intended to be spawned as a task.
    pub async fn run(self) {
        info!(interval = ?self.interval, "sweep loop started");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; that is fine, an empty sweep is
        // cheap.
        loop {
            interval.tick().await;

            let now = self.clock.now();
            match self.tick(now).await {
                Ok(report) if report.is_quiet() => {
                    debug!("sweep tick: nothing to purge");
                }
                Ok(report) => {
                    info!(
                        snaps = report.purge.snaps_purged,
                        payloads = report.purge.payloads_deleted,
                        payload_failures = report.purge.payload_failures,
                        stories = report.purge.stories_purged,
                        messages = report.purge.messages_purged,
                        streaks_reset = report.streaks.reset,
                        streaks_at_risk = report.streaks.flagged_at_risk,
                        "sweep tick"
                    );
                }
                Err(e) => {
                    // Leave the loop alive; the next tick retries.
                    error!(error = %e, "sweep tick failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::lifecycle::{NewMessage, NewSnap};
    use crate::policy::{LifecyclePolicy, StreakPolicy};
    use crate::payload::PayloadStore;
    use chrono::{Duration as ChronoDuration, Utc};
    use tempfile::TempDir;
    use tokio::sync::Mutex;
    use uuid::Uuid;
    use wisp_store::{Database, Profile};

    struct Fixture {
        sweeper: Sweeper,
        engine: LifecycleEngine,
        tracker: StreakTracker,
        clock: Arc<ManualClock>,
        db: Arc<Mutex<Database>>,
        _dir: TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let payloads = Arc::new(
            PayloadStore::new(
                dir.path().to_path_buf(),
                1024 * 1024,
                Duration::from_secs(5),
            )
            .await
            .unwrap(),
        );
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let engine = LifecycleEngine::new(db.clone(), payloads, LifecyclePolicy::default());
        let tracker = StreakTracker::new(db.clone(), StreakPolicy::default());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let sweeper = Sweeper::new(
            engine.clone(),
            tracker.clone(),
            clock.clone(),
            Duration::from_secs(900),
        );
        Fixture {
            sweeper,
            engine,
            tracker,
            clock,
            db,
            _dir: dir,
        }
    }

    async fn seed_profile(fx: &Fixture, username: &str) -> Uuid {
        let p = Profile {
            id: Uuid::new_v4(),
            username: username.to_string(),
            display_name: username.to_string(),
            bio: None,
            snap_score: 0,
            created_at: Utc::now(),
        };
        fx.db.lock().await.create_profile(&p).unwrap();
        p.id
    }

    #[tokio::test]
    async fn tick_purges_all_expired_content() {
        let fx = fixture().await;
        let a = seed_profile(&fx, "a").await;
        let b = seed_profile(&fx, "b").await;
        let t0 = fx.clock.now();

        let snap = fx
            .engine
            .post_snap(
                NewSnap {
                    sender: a,
                    recipient: None,
                    data: b"pic".to_vec(),
                    mime: "image/png".to_string(),
                    caption: None,
                    tags: vec![],
                    ttl_hours: Some(1),
                    view_once: false,
                },
                t0,
            )
            .await
            .unwrap();
        fx.engine
            .post_story(a, None, &[snap.id], t0)
            .await
            .unwrap();
        fx.engine
            .send_message(
                NewMessage {
                    sender: a,
                    recipient: b,
                    body: Some("hi".to_string()),
                    snap_id: None,
                    ttl_hours: Some(1),
                },
                t0,
            )
            .await
            .unwrap();

        // Everything expires by +25h (story default TTL is 24h).
        fx.clock.advance(ChronoDuration::hours(25));
        let report = fx.sweeper.tick(fx.clock.now()).await.unwrap();
        assert_eq!(report.purge.snaps_purged, 1);
        assert_eq!(report.purge.payloads_deleted, 1);
        assert_eq!(report.purge.stories_purged, 1);
        assert_eq!(report.purge.messages_purged, 1);

        // Payload file is gone from disk as well.
        assert!(matches!(
            fx.engine.payloads().fetch(snap.payload_id).await,
            Err(crate::CoreError::NotFound)
        ));

        // Second tick over the same data is a quiet no-op.
        let report = fx.sweeper.tick(fx.clock.now()).await.unwrap();
        assert!(report.is_quiet());
    }

    #[tokio::test]
    async fn tick_breaks_lapsed_streaks() {
        let fx = fixture().await;
        let a = seed_profile(&fx, "a").await;
        let b = seed_profile(&fx, "b").await;
        let t0 = fx.clock.now();

        fx.tracker.record_private_snap(a, b, t0).await.unwrap();

        fx.clock.advance(ChronoDuration::hours(25));
        let report = fx.sweeper.tick(fx.clock.now()).await.unwrap();
        assert_eq!(report.streaks.reset, 1);
    }

    #[tokio::test]
    async fn tick_flags_at_risk_streaks() {
        let fx = fixture().await;
        let a = seed_profile(&fx, "a").await;
        let b = seed_profile(&fx, "b").await;
        let t0 = fx.clock.now();

        fx.tracker.record_private_snap(a, b, t0).await.unwrap();

        fx.clock.advance(ChronoDuration::hours(21));
        let report = fx.sweeper.tick(fx.clock.now()).await.unwrap();
        assert_eq!(report.streaks.flagged_at_risk, 1);
        assert_eq!(report.streaks.reset, 0);
    }
}
