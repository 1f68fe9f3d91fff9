//! CRUD and membership queries for [`Story`] records.
//!
//! There is no stored "current story" pointer anywhere; the active story for
//! a profile is always the query "most recently created, non-expired story
//! owned by that profile" ([`Database::active_story_for`]).

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Story;
use crate::snaps::{parse_ts, parse_uuid};

const STORY_COLUMNS: &str = "id, owner_id, title, expires_at, view_count, created_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new story.
    pub fn insert_story(&self, story: &Story) -> Result<()> {
        self.conn().execute(
            "INSERT INTO stories (id, owner_id, title, expires_at, view_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                story.id.to_string(),
                story.owner_id.to_string(),
                story.title,
                story.expires_at.to_rfc3339(),
                story.view_count,
                story.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Append a snap reference at the next free position.
    pub fn append_story_snap(&self, story_id: Uuid, snap_id: Uuid) -> Result<()> {
        self.conn().execute(
            "INSERT INTO story_snaps (story_id, snap_id, position)
             SELECT ?1, ?2, COALESCE(MAX(position) + 1, 0)
             FROM story_snaps WHERE story_id = ?1",
            params![story_id.to_string(), snap_id.to_string()],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single story by UUID.
    pub fn get_story(&self, id: Uuid) -> Result<Story> {
        self.conn()
            .query_row(
                &format!("SELECT {STORY_COLUMNS} FROM stories WHERE id = ?1"),
                params![id.to_string()],
                row_to_story,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Ordered member snap ids of a story.
    pub fn story_members(&self, story_id: Uuid) -> Result<Vec<Uuid>> {
        let mut stmt = self.conn().prepare(
            "SELECT snap_id FROM story_snaps WHERE story_id = ?1 ORDER BY position ASC",
        )?;

        let rows = stmt.query_map(params![story_id.to_string()], |row| {
            let s: String = row.get(0)?;
            parse_uuid(&s, 0)
        })?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    /// All unexpired stories, newest first.
    pub fn active_stories(&self, now: DateTime<Utc>) -> Result<Vec<Story>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {STORY_COLUMNS} FROM stories
             WHERE expires_at > ?1
             ORDER BY created_at DESC"
        ))?;

        let rows = stmt.query_map(params![now.to_rfc3339()], row_to_story)?;
        collect_stories(rows)
    }

    /// Unexpired stories owned by a profile, newest first.
    pub fn stories_for_owner(&self, owner: Uuid, now: DateTime<Utc>) -> Result<Vec<Story>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {STORY_COLUMNS} FROM stories
             WHERE owner_id = ?1 AND expires_at > ?2
             ORDER BY created_at DESC"
        ))?;

        let rows = stmt.query_map(params![owner.to_string(), now.to_rfc3339()], row_to_story)?;
        collect_stories(rows)
    }

    /// The most recently created non-expired story owned by a profile.
    pub fn active_story_for(&self, owner: Uuid, now: DateTime<Utc>) -> Result<Story> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {STORY_COLUMNS} FROM stories
                     WHERE owner_id = ?1 AND expires_at > ?2
                     ORDER BY created_at DESC
                     LIMIT 1"
                ),
                params![owner.to_string(), now.to_rfc3339()],
                row_to_story,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Ids of all stories whose expiry has passed (inclusive boundary).
    pub fn expired_story_ids(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id FROM stories WHERE expires_at <= ?1")?;

        let rows = stmt.query_map(params![now.to_rfc3339()], |row| {
            let s: String = row.get(0)?;
            parse_uuid(&s, 0)
        })?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Increment a story's view counter.
    pub fn bump_story_views(&self, id: Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE stories SET view_count = view_count + 1 WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a story.  Join rows cascade; member snaps do not.
    pub fn delete_story(&self, id: Uuid) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM stories WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn collect_stories(
    rows: impl Iterator<Item = rusqlite::Result<Story>>,
) -> Result<Vec<Story>> {
    let mut stories = Vec::new();
    for row in rows {
        stories.push(row?);
    }
    Ok(stories)
}

/// Map a `rusqlite::Row` to a [`Story`].
fn row_to_story(row: &rusqlite::Row<'_>) -> rusqlite::Result<Story> {
    let id_str: String = row.get(0)?;
    let owner_str: String = row.get(1)?;
    let title: Option<String> = row.get(2)?;
    let expires_str: String = row.get(3)?;
    let view_count: i64 = row.get(4)?;
    let created_str: String = row.get(5)?;

    Ok(Story {
        id: parse_uuid(&id_str, 0)?,
        owner_id: parse_uuid(&owner_str, 1)?,
        title,
        expires_at: parse_ts(&expires_str, 3)?,
        view_count,
        created_at: parse_ts(&created_str, 5)?,
    })
}
