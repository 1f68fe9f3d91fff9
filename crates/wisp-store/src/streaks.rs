//! CRUD and indexed queries for [`Streak`] records.
//!
//! Callers address a streak by any (x, y) profile pair; lookups canonicalize
//! the ordering so (A, B) and (B, A) always hit the same row.  The schema
//! additionally enforces `profile_a < profile_b` with a CHECK constraint.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{canonical_pair, Streak};
use crate::snaps::{parse_ts, parse_uuid};

const STREAK_COLUMNS: &str =
    "id, profile_a, profile_b, count, last_snap_at, a_sent, b_sent, at_risk, created_at";

impl Database {
    /// Insert a new streak row.  The pair must already be canonical.
    pub fn insert_streak(&self, streak: &Streak) -> Result<()> {
        self.conn().execute(
            "INSERT INTO streaks (id, profile_a, profile_b, count, last_snap_at,
                                  a_sent, b_sent, at_risk, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                streak.id.to_string(),
                streak.profile_a.to_string(),
                streak.profile_b.to_string(),
                streak.count,
                streak.last_snap_at.to_rfc3339(),
                streak.a_sent as i32,
                streak.b_sent as i32,
                streak.at_risk as i32,
                streak.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch the streak between two profiles, in either order.
    pub fn get_streak_for_pair(&self, x: Uuid, y: Uuid) -> Result<Streak> {
        let (a, b) = canonical_pair(x, y);
        self.conn()
            .query_row(
                &format!(
                    "SELECT {STREAK_COLUMNS} FROM streaks
                     WHERE profile_a = ?1 AND profile_b = ?2"
                ),
                params![a.to_string(), b.to_string()],
                row_to_streak,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Persist the mutable fields of a streak row.
    pub fn update_streak(&self, streak: &Streak) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE streaks
             SET count = ?2, last_snap_at = ?3, a_sent = ?4, b_sent = ?5, at_risk = ?6
             WHERE id = ?1",
            params![
                streak.id.to_string(),
                streak.count,
                streak.last_snap_at.to_rfc3339(),
                streak.a_sent as i32,
                streak.b_sent as i32,
                streak.at_risk as i32,
            ],
        )?;
        Ok(affected > 0)
    }

    /// Streaks whose window anchor is at or before the given threshold.
    ///
    /// The sweep uses this (backed by `idx_streaks_last_snap`) so it never
    /// scans pairs that are nowhere near lapsing.
    pub fn streaks_last_snap_before(&self, threshold: DateTime<Utc>) -> Result<Vec<Streak>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {STREAK_COLUMNS} FROM streaks WHERE last_snap_at <= ?1"
        ))?;

        let rows = stmt.query_map(params![threshold.to_rfc3339()], row_to_streak)?;
        collect_streaks(rows)
    }

    /// All streaks involving a profile, highest count first.
    pub fn streaks_for_profile(&self, profile: Uuid) -> Result<Vec<Streak>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {STREAK_COLUMNS} FROM streaks
             WHERE profile_a = ?1 OR profile_b = ?1
             ORDER BY count DESC, last_snap_at DESC, id ASC"
        ))?;

        let rows = stmt.query_map(params![profile.to_string()], row_to_streak)?;
        collect_streaks(rows)
    }

    /// Top streaks by count.
    ///
    /// Ordering is fully deterministic: count descending, then most recent
    /// `last_snap_at`, then canonical row id.
    pub fn streak_leaderboard(&self, limit: u32) -> Result<Vec<Streak>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {STREAK_COLUMNS} FROM streaks
             ORDER BY count DESC, last_snap_at DESC, id ASC
             LIMIT ?1"
        ))?;

        let rows = stmt.query_map(params![limit], row_to_streak)?;
        collect_streaks(rows)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn collect_streaks(
    rows: impl Iterator<Item = rusqlite::Result<Streak>>,
) -> Result<Vec<Streak>> {
    let mut streaks = Vec::new();
    for row in rows {
        streaks.push(row?);
    }
    Ok(streaks)
}

/// Map a `rusqlite::Row` to a [`Streak`].
fn row_to_streak(row: &rusqlite::Row<'_>) -> rusqlite::Result<Streak> {
    let id_str: String = row.get(0)?;
    let a_str: String = row.get(1)?;
    let b_str: String = row.get(2)?;
    let count: i64 = row.get(3)?;
    let last_str: String = row.get(4)?;
    let a_sent_int: i32 = row.get(5)?;
    let b_sent_int: i32 = row.get(6)?;
    let at_risk_int: i32 = row.get(7)?;
    let created_str: String = row.get(8)?;

    Ok(Streak {
        id: parse_uuid(&id_str, 0)?,
        profile_a: parse_uuid(&a_str, 1)?,
        profile_b: parse_uuid(&b_str, 2)?,
        count,
        last_snap_at: parse_ts(&last_str, 4)?,
        a_sent: a_sent_int != 0,
        b_sent: b_sent_int != 0,
        at_risk: at_risk_int != 0,
        created_at: parse_ts(&created_str, 8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Profile;
    use chrono::Duration;

    fn seed_profile(db: &Database, username: &str) -> Uuid {
        let p = Profile {
            id: Uuid::new_v4(),
            username: username.to_string(),
            display_name: username.to_string(),
            bio: None,
            snap_score: 0,
            created_at: Utc::now(),
        };
        db.create_profile(&p).unwrap();
        p.id
    }

    fn streak(db: &Database, count: i64, last_snap_at: DateTime<Utc>) -> Streak {
        let x = seed_profile(db, &Uuid::new_v4().to_string()[..8].to_string());
        let y = seed_profile(db, &Uuid::new_v4().to_string()[..8].to_string());
        let (a, b) = canonical_pair(x, y);
        let s = Streak {
            id: Uuid::new_v4(),
            profile_a: a,
            profile_b: b,
            count,
            last_snap_at,
            a_sent: false,
            b_sent: false,
            at_risk: false,
            created_at: Utc::now(),
        };
        db.insert_streak(&s).unwrap();
        s
    }

    #[test]
    fn lookup_is_order_independent() {
        let db = Database::open_in_memory().unwrap();
        let s = streak(&db, 3, Utc::now());

        let forward = db.get_streak_for_pair(s.profile_a, s.profile_b).unwrap();
        let reverse = db.get_streak_for_pair(s.profile_b, s.profile_a).unwrap();
        assert_eq!(forward.id, s.id);
        assert_eq!(reverse.id, s.id);
    }

    #[test]
    fn non_canonical_insert_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let s = streak(&db, 1, Utc::now());

        // Swapping the pair violates the CHECK constraint.
        let bad = Streak {
            id: Uuid::new_v4(),
            profile_a: s.profile_b,
            profile_b: s.profile_a,
            ..s
        };
        assert!(db.insert_streak(&bad).is_err());
    }

    #[test]
    fn duplicate_pair_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let s = streak(&db, 1, Utc::now());

        let dup = Streak {
            id: Uuid::new_v4(),
            ..s.clone()
        };
        assert!(db.insert_streak(&dup).is_err());
    }

    #[test]
    fn leaderboard_ordering_is_deterministic() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();

        let older_five = streak(&db, 5, now - Duration::hours(3));
        let recent_five = streak(&db, 5, now - Duration::hours(1));
        let three = streak(&db, 3, now);

        let board = db.streak_leaderboard(10).unwrap();
        let ids: Vec<Uuid> = board.iter().map(|s| s.id).collect();
        // Count desc, then most recent last_snap_at first.
        assert_eq!(ids, vec![recent_five.id, older_five.id, three.id]);
    }

    #[test]
    fn sweep_candidate_query_uses_threshold() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();

        let stale = streak(&db, 2, now - Duration::hours(30));
        let _fresh = streak(&db, 2, now);

        let candidates = db
            .streaks_last_snap_before(now - Duration::hours(20))
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, stale.id);
    }
}
