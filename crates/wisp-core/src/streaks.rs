//! Reciprocal-posting streak bookkeeping.
//!
//! One record per unordered profile pair, keyed canonically (lower UUID
//! first).  The counter advances only when both sides have sent at least one
//! private snap within the current rolling window; a lapsed window breaks
//! the streak back to zero.
//!
//! Per-pair updates are serialized through the shared store handle, so two
//! near-simultaneous snaps between the same two profiles cannot interleave a
//! read-modify-write and corrupt the flag state.  The window-lapse *reset*
//! normally belongs to the sweep ([`StreakTracker::evaluate_all`]); when a
//! snap arrives after a lapse that the sweep has not processed yet, the
//! tracker applies the same reset inline first, so a stale flag from the
//! previous window can never complete reciprocity.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use wisp_store::{canonical_pair, Database, Streak, StoreError};

use crate::error::CoreError;
use crate::policy::StreakPolicy;
use crate::Result;

/// What [`StreakTracker::evaluate_window`] did to a streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowOutcome {
    /// Nothing to do.
    Unchanged,
    /// The window lapsed without reciprocity; the streak broke to zero.
    Reset,
    /// The window is nearly over without reciprocity.
    FlaggedAtRisk,
}

/// Counters from one streak sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreakSweepStats {
    pub reset: usize,
    pub flagged_at_risk: usize,
}

/// Maintains the per-pair reciprocal-posting counters.
#[derive(Clone)]
pub struct StreakTracker {
    db: Arc<Mutex<Database>>,
    policy: StreakPolicy,
}

impl StreakTracker {
    pub fn new(db: Arc<Mutex<Database>>, policy: StreakPolicy) -> Self {
        Self { db, policy }
    }

    /// Record that `sender` sent a private snap to `recipient`.
    ///
    /// Creates the pair record on first contact (count starts at 1).  On an
    /// existing record: completing reciprocity within the window increments
    /// the count and opens a fresh window; otherwise the sender's flag is
    /// marked and the window anchor only ever moves forward.
    pub async fn record_private_snap(
        &self,
        sender: Uuid,
        recipient: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Streak> {
        if sender == recipient {
            return Err(CoreError::Invalid(
                "cannot build a streak with yourself".to_string(),
            ));
        }

        let (a, b) = canonical_pair(sender, recipient);
        let db = self.db.lock().await;

        let mut streak = match db.get_streak_for_pair(a, b) {
            Ok(existing) => existing,
            Err(StoreError::NotFound) => {
                let fresh = Streak {
                    id: Uuid::new_v4(),
                    profile_a: a,
                    profile_b: b,
                    count: 1,
                    last_snap_at: now,
                    a_sent: sender == a,
                    b_sent: sender == b,
                    at_risk: false,
                    created_at: now,
                };
                // A concurrent creator may have slipped in between lookup
                // and insert; the unique pair constraint decides the race.
                return match db.insert_streak(&fresh) {
                    Ok(()) => {
                        debug!(pair_a = %a, pair_b = %b, "streak created");
                        Ok(fresh)
                    }
                    Err(e) if e.is_constraint_violation() => Err(CoreError::Conflict(
                        format!("streak pair {a}/{b} already exists"),
                    )),
                    Err(e) => Err(e.into()),
                };
            }
            Err(e) => return Err(e.into()),
        };

        let lapsed = now - streak.last_snap_at > self.policy.window();
        if lapsed {
            // The sweep has not caught this pair yet; break it now so the
            // previous window's flag cannot complete reciprocity.
            streak.count = 0;
            streak.a_sent = false;
            streak.b_sent = false;
        }

        let other_sent = if sender == streak.profile_a {
            streak.b_sent
        } else {
            streak.a_sent
        };

        if !lapsed && other_sent {
            // Reciprocity achieved: advance and open a fresh window.
            streak.count += 1;
            streak.a_sent = false;
            streak.b_sent = false;
            streak.last_snap_at = now;
            streak.at_risk = false;
            debug!(
                streak = %streak.id,
                count = streak.count,
                "streak advanced"
            );
        } else {
            if sender == streak.profile_a {
                streak.a_sent = true;
            } else {
                streak.b_sent = true;
            }
            // The anchor only ever extends the window.
            if now > streak.last_snap_at {
                streak.last_snap_at = now;
            }
            streak.at_risk = false;
        }

        db.update_streak(&streak)?;
        Ok(streak)
    }

    /// Apply the window transitions to a single streak, in memory.
    ///
    /// Idempotent: re-evaluating an already-broken or already-flagged streak
    /// at the same instant changes nothing.
    pub fn evaluate_window(&self, streak: &mut Streak, now: DateTime<Utc>) -> WindowOutcome {
        let elapsed = now - streak.last_snap_at;

        if elapsed > self.policy.window() {
            if streak.count == 0 && !streak.a_sent && !streak.b_sent && !streak.at_risk {
                return WindowOutcome::Unchanged;
            }
            streak.count = 0;
            streak.a_sent = false;
            streak.b_sent = false;
            streak.at_risk = false;
            return WindowOutcome::Reset;
        }

        let remaining = self.policy.window() - elapsed;
        let at_risk =
            remaining < self.policy.at_risk_threshold() && !(streak.a_sent && streak.b_sent);
        if at_risk == streak.at_risk {
            return WindowOutcome::Unchanged;
        }
        streak.at_risk = at_risk;
        if at_risk {
            WindowOutcome::FlaggedAtRisk
        } else {
            WindowOutcome::Unchanged
        }
    }

    /// Sweep pass: evaluate every pair whose window anchor is old enough to
    /// matter (anything younger can be neither at risk nor lapsed).
    pub async fn evaluate_all(&self, now: DateTime<Utc>) -> Result<StreakSweepStats> {
        let threshold = now - (self.policy.window() - self.policy.at_risk_threshold());

        let db = self.db.lock().await;
        let candidates = db.streaks_last_snap_before(threshold)?;

        let mut stats = StreakSweepStats::default();
        for mut streak in candidates {
            match self.evaluate_window(&mut streak, now) {
                WindowOutcome::Unchanged => {}
                WindowOutcome::Reset => {
                    db.update_streak(&streak)?;
                    stats.reset += 1;
                    debug!(streak = %streak.id, "streak broken");
                }
                WindowOutcome::FlaggedAtRisk => {
                    db.update_streak(&streak)?;
                    stats.flagged_at_risk += 1;
                    debug!(streak = %streak.id, "streak at risk");
                }
            }
        }
        Ok(stats)
    }

    /// Top streaks, deterministically ordered: count descending, most
    /// recent `last_snap_at` first within a count, then canonical id.
    pub async fn leaderboard(&self, limit: u32) -> Result<Vec<Streak>> {
        let db = self.db.lock().await;
        Ok(db.streak_leaderboard(limit)?)
    }

    /// All streaks involving one profile, highest count first.
    pub async fn streaks_for(&self, profile: Uuid) -> Result<Vec<Streak>> {
        let db = self.db.lock().await;
        Ok(db.streaks_for_profile(profile)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use wisp_store::Profile;

    async fn tracker() -> StreakTracker {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        StreakTracker::new(db, StreakPolicy::default())
    }

    async fn seed_profile(tracker: &StreakTracker, username: &str) -> Uuid {
        let p = Profile {
            id: Uuid::new_v4(),
            username: username.to_string(),
            display_name: username.to_string(),
            bio: None,
            snap_score: 0,
            created_at: Utc::now(),
        };
        tracker.db.lock().await.create_profile(&p).unwrap();
        p.id
    }

    #[tokio::test]
    async fn reciprocity_within_window_advances() {
        let tracker = tracker().await;
        let a = seed_profile(&tracker, "a").await;
        let b = seed_profile(&tracker, "b").await;
        let t0 = Utc::now();

        // A -> B: pair created, one-sided.
        let s = tracker.record_private_snap(a, b, t0).await.unwrap();
        assert_eq!(s.count, 1);
        assert!(s.a_sent ^ s.b_sent, "exactly one side has sent");

        // B -> A an hour later: reciprocity, count advances, flags clear.
        let s = tracker
            .record_private_snap(b, a, t0 + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(s.count, 2);
        assert!(!s.a_sent && !s.b_sent);
        assert!(!s.at_risk);
        assert_eq!(s.last_snap_at, t0 + Duration::hours(1));
    }

    #[tokio::test]
    async fn lapsed_window_breaks_to_zero() {
        let tracker = tracker().await;
        let a = seed_profile(&tracker, "a").await;
        let b = seed_profile(&tracker, "b").await;
        let t0 = Utc::now();

        tracker.record_private_snap(a, b, t0).await.unwrap();

        // 25h later, no reciprocity: the sweep breaks the streak.
        let stats = tracker
            .evaluate_all(t0 + Duration::hours(25))
            .await
            .unwrap();
        assert_eq!(stats.reset, 1);

        let s = tracker
            .db
            .lock()
            .await
            .get_streak_for_pair(a, b)
            .unwrap();
        assert_eq!(s.count, 0);
        assert!(!s.a_sent && !s.b_sent && !s.at_risk);
    }

    #[tokio::test]
    async fn broken_streak_restarts_on_fresh_reciprocity() {
        let tracker = tracker().await;
        let a = seed_profile(&tracker, "a").await;
        let b = seed_profile(&tracker, "b").await;
        let t0 = Utc::now();

        tracker.record_private_snap(a, b, t0).await.unwrap();
        tracker.evaluate_all(t0 + Duration::hours(25)).await.unwrap();

        // One-sided snap after the break keeps count at zero.
        let s = tracker
            .record_private_snap(a, b, t0 + Duration::hours(26))
            .await
            .unwrap();
        assert_eq!(s.count, 0);

        // Fresh reciprocal exchange restarts the streak at 1.
        let s = tracker
            .record_private_snap(b, a, t0 + Duration::hours(27))
            .await
            .unwrap();
        assert_eq!(s.count, 1);
    }

    #[tokio::test]
    async fn late_snap_cannot_use_stale_flag() {
        let tracker = tracker().await;
        let a = seed_profile(&tracker, "a").await;
        let b = seed_profile(&tracker, "b").await;
        let t0 = Utc::now();

        // A sends, then the pair goes quiet past the window with no sweep.
        tracker.record_private_snap(a, b, t0).await.unwrap();

        // B's reply lands after the lapse: no increment, window re-anchors.
        let s = tracker
            .record_private_snap(b, a, t0 + Duration::hours(30))
            .await
            .unwrap();
        assert_eq!(s.count, 0);
        assert!(s.a_sent != s.b_sent, "only the late sender's flag is set");
        assert_eq!(s.last_snap_at, t0 + Duration::hours(30));
    }

    #[tokio::test]
    async fn at_risk_flags_and_clears() {
        let tracker = tracker().await;
        let a = seed_profile(&tracker, "a").await;
        let b = seed_profile(&tracker, "b").await;
        let t0 = Utc::now();

        tracker.record_private_snap(a, b, t0).await.unwrap();

        // 19h in: more than 4h remain, nothing flagged.
        let stats = tracker
            .evaluate_all(t0 + Duration::hours(19))
            .await
            .unwrap();
        assert_eq!(stats, StreakSweepStats::default());

        // 21h in: less than 4h remain without reciprocity.
        let stats = tracker
            .evaluate_all(t0 + Duration::hours(21))
            .await
            .unwrap();
        assert_eq!(stats.flagged_at_risk, 1);

        // Reciprocity clears the flag and re-anchors the window.
        let s = tracker
            .record_private_snap(b, a, t0 + Duration::hours(22))
            .await
            .unwrap();
        assert!(!s.at_risk);
        assert_eq!(s.count, 2);

        let stats = tracker
            .evaluate_all(t0 + Duration::hours(23))
            .await
            .unwrap();
        assert_eq!(stats, StreakSweepStats::default());
    }

    #[tokio::test]
    async fn evaluate_all_is_idempotent() {
        let tracker = tracker().await;
        let a = seed_profile(&tracker, "a").await;
        let b = seed_profile(&tracker, "b").await;
        let t0 = Utc::now();

        tracker.record_private_snap(a, b, t0).await.unwrap();

        let later = t0 + Duration::hours(25);
        let first = tracker.evaluate_all(later).await.unwrap();
        assert_eq!(first.reset, 1);

        let second = tracker.evaluate_all(later).await.unwrap();
        assert_eq!(second, StreakSweepStats::default());
    }

    #[tokio::test]
    async fn self_streak_is_rejected() {
        let tracker = tracker().await;
        let a = seed_profile(&tracker, "a").await;

        assert!(matches!(
            tracker.record_private_snap(a, a, Utc::now()).await,
            Err(CoreError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn leaderboard_orders_deterministically() {
        let tracker = tracker().await;
        let t0 = Utc::now();

        // Three pairs with counts [5, 5, 3]; build them up via the tracker
        // by alternating sends inside one window per increment.
        async fn build(tracker: &StreakTracker, x: Uuid, y: Uuid, count: i64, mut t: DateTime<Utc>) {
            // Creation puts count at 1; each reciprocal pair of sends adds 1.
            tracker.record_private_snap(x, y, t).await.unwrap();
            for _ in 1..count {
                t += Duration::hours(1);
                tracker.record_private_snap(y, x, t).await.unwrap();
                t += Duration::hours(1);
                tracker.record_private_snap(x, y, t).await.unwrap();
            }
        }

        let a = seed_profile(&tracker, "a").await;
        let b = seed_profile(&tracker, "b").await;
        let c = seed_profile(&tracker, "c").await;
        let d = seed_profile(&tracker, "d").await;
        let e = seed_profile(&tracker, "e").await;
        let f = seed_profile(&tracker, "f").await;

        build(&tracker, a, b, 5, t0).await;
        build(&tracker, c, d, 5, t0 + Duration::hours(2)).await;
        build(&tracker, e, f, 3, t0).await;

        let board = tracker.leaderboard(10).await.unwrap();
        let counts: Vec<i64> = board.iter().map(|s| s.count).collect();
        assert_eq!(counts, vec![5, 5, 3]);

        // Within count=5 the more recently active pair (c, d) comes first.
        assert_eq!(board[0].last_snap_at, t0 + Duration::hours(10));
        assert_eq!(board[1].last_snap_at, t0 + Duration::hours(8));
    }
}
