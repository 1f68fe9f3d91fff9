//! CRUD and indexed queries for [`Snap`] records.
//!
//! The first-view decision lives here: [`Database::mark_snap_viewed`] is a
//! conditional update guarded by `viewed_at IS NULL`, so exactly one caller
//! can ever win the first view of a given snap.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Snap;

const SNAP_COLUMNS: &str = "id, sender_id, recipient_id, payload_id, caption, tags, view_once,
                            expires_at, viewed_at, view_count, created_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new snap.
    pub fn insert_snap(&self, snap: &Snap) -> Result<()> {
        self.conn().execute(
            "INSERT INTO snaps (id, sender_id, recipient_id, payload_id, caption, tags,
                                view_once, expires_at, viewed_at, view_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                snap.id.to_string(),
                snap.sender_id.to_string(),
                snap.recipient_id.map(|r| r.to_string()),
                snap.payload_id.to_string(),
                snap.caption,
                serde_json::to_string(&snap.tags)?,
                snap.view_once as i32,
                snap.expires_at.to_rfc3339(),
                snap.viewed_at.map(|t| t.to_rfc3339()),
                snap.view_count,
                snap.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single snap by UUID.
    pub fn get_snap(&self, id: Uuid) -> Result<Snap> {
        self.conn()
            .query_row(
                &format!("SELECT {SNAP_COLUMNS} FROM snaps WHERE id = ?1"),
                params![id.to_string()],
                row_to_snap,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Unviewed, unexpired snaps addressed to a recipient, newest first.
    pub fn inbox_snaps(&self, recipient: Uuid, now: DateTime<Utc>) -> Result<Vec<Snap>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {SNAP_COLUMNS} FROM snaps
             WHERE recipient_id = ?1 AND expires_at > ?2 AND viewed_at IS NULL
             ORDER BY created_at DESC"
        ))?;

        let rows = stmt.query_map(
            params![recipient.to_string(), now.to_rfc3339()],
            row_to_snap,
        )?;
        collect_snaps(rows)
    }

    /// Unexpired snaps posted by a sender, newest first.
    pub fn snaps_by_sender(&self, sender: Uuid, now: DateTime<Utc>) -> Result<Vec<Snap>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {SNAP_COLUMNS} FROM snaps
             WHERE sender_id = ?1 AND expires_at > ?2
             ORDER BY created_at DESC"
        ))?;

        let rows = stmt.query_map(params![sender.to_string(), now.to_rfc3339()], row_to_snap)?;
        collect_snaps(rows)
    }

    /// Unexpired public snaps, newest first (the Discover feed).
    pub fn public_snaps(&self, now: DateTime<Utc>, limit: u32, offset: u32) -> Result<Vec<Snap>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {SNAP_COLUMNS} FROM snaps
             WHERE recipient_id IS NULL AND expires_at > ?1
             ORDER BY created_at DESC
             LIMIT ?2 OFFSET ?3"
        ))?;

        let rows = stmt.query_map(params![now.to_rfc3339(), limit, offset], row_to_snap)?;
        collect_snaps(rows)
    }

    /// Unexpired public snaps carrying an exact tag, newest first.
    pub fn public_snaps_with_tag(
        &self,
        tag: &str,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Snap>> {
        // Tags are stored as a JSON array; an exact element match always
        // appears quoted, so a LIKE on the quoted form is index-free but
        // precise enough for short tag strings.
        let pattern = format!("%{}%", serde_json::to_string(tag)?);
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {SNAP_COLUMNS} FROM snaps
             WHERE recipient_id IS NULL AND expires_at > ?1 AND tags LIKE ?2
             ORDER BY created_at DESC
             LIMIT ?3"
        ))?;

        let rows = stmt.query_map(params![now.to_rfc3339(), pattern, limit], row_to_snap)?;
        collect_snaps(rows)
    }

    /// Tag lists of all unexpired public snaps (for trending aggregation).
    pub fn public_snap_tags(&self, now: DateTime<Utc>) -> Result<Vec<Vec<String>>> {
        let mut stmt = self.conn().prepare(
            "SELECT tags FROM snaps WHERE recipient_id IS NULL AND expires_at > ?1",
        )?;

        let rows = stmt.query_map(params![now.to_rfc3339()], |row| {
            let raw: String = row.get(0)?;
            serde_json::from_str::<Vec<String>>(&raw).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        })?;

        let mut tags = Vec::new();
        for row in rows {
            tags.push(row?);
        }
        Ok(tags)
    }

    /// Ids and payload handles of all snaps whose expiry has passed.
    ///
    /// The boundary is inclusive: a snap expiring exactly at `now` is expired.
    pub fn expired_snaps(&self, now: DateTime<Utc>) -> Result<Vec<(Uuid, Uuid)>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id, payload_id FROM snaps WHERE expires_at <= ?1")?;

        let rows = stmt.query_map(params![now.to_rfc3339()], |row| {
            let id_str: String = row.get(0)?;
            let payload_str: String = row.get(1)?;
            Ok((id_str, payload_str))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id_str, payload_str) = row?;
            out.push((Uuid::parse_str(&id_str)?, Uuid::parse_str(&payload_str)?));
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Record the first view of a snap.
    ///
    /// Atomically transitions `viewed_at` from NULL to `now` and bumps the
    /// view counter.  Returns `true` only for the single caller that wins
    /// the transition; every other caller (and any later retry) gets `false`.
    pub fn mark_snap_viewed(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE snaps SET viewed_at = ?2, view_count = view_count + 1
             WHERE id = ?1 AND viewed_at IS NULL",
            params![id.to_string(), now.to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    /// Increment the view counter without touching `viewed_at` (public snaps).
    pub fn bump_snap_views(&self, id: Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE snaps SET view_count = view_count + 1 WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Tighten a snap's expiry to `now`, never extending it.
    ///
    /// Used to turn a consumed view-once snap into a tombstone the sweep
    /// reaps on its next tick.
    pub fn expire_snap_now(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE snaps SET expires_at = MIN(expires_at, ?2) WHERE id = ?1",
            params![id.to_string(), now.to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a snap by UUID.  Returns `true` if a row was deleted; deleting
    /// an already-purged snap is a no-op, not an error.
    pub fn delete_snap(&self, id: Uuid) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM snaps WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn collect_snaps(
    rows: impl Iterator<Item = rusqlite::Result<Snap>>,
) -> Result<Vec<Snap>> {
    let mut snaps = Vec::new();
    for row in rows {
        snaps.push(row?);
    }
    Ok(snaps)
}

/// Map a `rusqlite::Row` to a [`Snap`].
fn row_to_snap(row: &rusqlite::Row<'_>) -> rusqlite::Result<Snap> {
    let id_str: String = row.get(0)?;
    let sender_str: String = row.get(1)?;
    let recipient_str: Option<String> = row.get(2)?;
    let payload_str: String = row.get(3)?;
    let caption: Option<String> = row.get(4)?;
    let tags_raw: String = row.get(5)?;
    let view_once_int: i32 = row.get(6)?;
    let expires_str: String = row.get(7)?;
    let viewed_str: Option<String> = row.get(8)?;
    let view_count: i64 = row.get(9)?;
    let created_str: String = row.get(10)?;

    let id = parse_uuid(&id_str, 0)?;
    let sender_id = parse_uuid(&sender_str, 1)?;
    let recipient_id = recipient_str.as_deref().map(|s| parse_uuid(s, 2)).transpose()?;
    let payload_id = parse_uuid(&payload_str, 3)?;

    let tags: Vec<String> = serde_json::from_str(&tags_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let expires_at = parse_ts(&expires_str, 7)?;
    let viewed_at = viewed_str.as_deref().map(|s| parse_ts(s, 8)).transpose()?;
    let created_at = parse_ts(&created_str, 10)?;

    Ok(Snap {
        id,
        sender_id,
        recipient_id,
        payload_id,
        caption,
        tags,
        view_once: view_once_int != 0,
        expires_at,
        viewed_at,
        view_count,
        created_at,
    })
}

pub(crate) fn parse_uuid(s: &str, col: usize) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn parse_ts(s: &str, col: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
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

    fn snap(sender: Uuid, recipient: Option<Uuid>, expires_at: DateTime<Utc>) -> Snap {
        Snap {
            id: Uuid::new_v4(),
            sender_id: sender,
            recipient_id: recipient,
            payload_id: Uuid::new_v4(),
            caption: Some("hi".to_string()),
            tags: vec!["sunset".to_string()],
            view_once: false,
            expires_at,
            viewed_at: None,
            view_count: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn insert_and_fetch_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let sender = seed_profile(&db, "a");
        let s = snap(sender, None, Utc::now() + Duration::hours(1));
        db.insert_snap(&s).unwrap();

        let got = db.get_snap(s.id).unwrap();
        assert_eq!(got.tags, vec!["sunset"]);
        assert!(got.is_public());
    }

    #[test]
    fn first_view_wins_exactly_once() {
        let db = Database::open_in_memory().unwrap();
        let sender = seed_profile(&db, "a");
        let recipient = seed_profile(&db, "b");
        let s = snap(sender, Some(recipient), Utc::now() + Duration::hours(1));
        db.insert_snap(&s).unwrap();

        let now = Utc::now();
        assert!(db.mark_snap_viewed(s.id, now).unwrap());
        assert!(!db.mark_snap_viewed(s.id, now).unwrap());

        let got = db.get_snap(s.id).unwrap();
        assert!(got.viewed_at.is_some());
        assert_eq!(got.view_count, 1);
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let db = Database::open_in_memory().unwrap();
        let sender = seed_profile(&db, "a");
        let now = Utc::now();
        let s = snap(sender, None, now);
        db.insert_snap(&s).unwrap();

        // expires_at == now counts as expired.
        let expired = db.expired_snaps(now).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, s.id);

        assert!(db.public_snaps(now, 10, 0).unwrap().is_empty());
    }

    #[test]
    fn tag_query_matches_exact_element() {
        let db = Database::open_in_memory().unwrap();
        let sender = seed_profile(&db, "a");
        let now = Utc::now();
        let mut tagged = snap(sender, None, now + Duration::hours(1));
        tagged.tags = vec!["cats".to_string()];
        db.insert_snap(&tagged).unwrap();

        let mut other = snap(sender, None, now + Duration::hours(1));
        other.tags = vec!["dogs".to_string()];
        db.insert_snap(&other).unwrap();

        let hits = db.public_snaps_with_tag("cats", now, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, tagged.id);
    }

    #[test]
    fn expire_now_never_extends() {
        let db = Database::open_in_memory().unwrap();
        let sender = seed_profile(&db, "a");
        let now = Utc::now();
        let s = snap(sender, None, now - Duration::hours(2));
        db.insert_snap(&s).unwrap();

        db.expire_snap_now(s.id, now).unwrap();
        let got = db.get_snap(s.id).unwrap();
        assert!(got.expires_at < now - Duration::hours(1));
    }
}
