//! CRUD and indexed queries for [`Message`] records.
//!
//! Like snaps, messages have a single-shot read transition:
//! [`Database::mark_message_read`] sets `read_at` exactly once and tightens
//! the expiry so a read message lingers for a short grace period at most.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Message;
use crate::snaps::{parse_ts, parse_uuid};

const MESSAGE_COLUMNS: &str =
    "id, sender_id, recipient_id, snap_id, body, read_at, expires_at, created_at";

impl Database {
    /// Insert a new message.
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages (id, sender_id, recipient_id, snap_id, body, read_at,
                                   expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                message.id.to_string(),
                message.sender_id.to_string(),
                message.recipient_id.to_string(),
                message.snap_id.map(|s| s.to_string()),
                message.body,
                message.read_at.map(|t| t.to_rfc3339()),
                message.expires_at.to_rfc3339(),
                message.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch a single message by UUID.
    pub fn get_message(&self, id: Uuid) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Unexpired messages addressed to a recipient, newest first.
    pub fn message_inbox(&self, recipient: Uuid, now: DateTime<Utc>) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE recipient_id = ?1 AND expires_at > ?2
             ORDER BY created_at DESC"
        ))?;

        let rows = stmt.query_map(
            params![recipient.to_string(), now.to_rfc3339()],
            row_to_message,
        )?;
        collect_messages(rows)
    }

    /// Unexpired messages sent by a profile, newest first.
    pub fn sent_messages(&self, sender: Uuid, now: DateTime<Utc>) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE sender_id = ?1 AND expires_at > ?2
             ORDER BY created_at DESC"
        ))?;

        let rows = stmt.query_map(params![sender.to_string(), now.to_rfc3339()], row_to_message)?;
        collect_messages(rows)
    }

    /// Record the first read of a message.
    ///
    /// Atomically transitions `read_at` from NULL to `now` and tightens
    /// `expires_at` to `min(expires_at, grace_deadline)`: a read message
    /// never lives past the grace deadline, and its expiry is never extended.
    /// Returns `true` only on the transition; later calls get `false`.
    pub fn mark_message_read(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        grace_deadline: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET read_at = ?2, expires_at = MIN(expires_at, ?3)
             WHERE id = ?1 AND read_at IS NULL",
            params![id.to_string(), now.to_rfc3339(), grace_deadline.to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    /// Ids of all messages whose expiry has passed (inclusive boundary).
    pub fn expired_message_ids(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id FROM messages WHERE expires_at <= ?1")?;

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

    /// Delete a message.  Returns `true` if a row was deleted.
    pub fn delete_message(&self, id: Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM messages WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn collect_messages(
    rows: impl Iterator<Item = rusqlite::Result<Message>>,
) -> Result<Vec<Message>> {
    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}

/// Map a `rusqlite::Row` to a [`Message`].
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let sender_str: String = row.get(1)?;
    let recipient_str: String = row.get(2)?;
    let snap_str: Option<String> = row.get(3)?;
    let body: Option<String> = row.get(4)?;
    let read_str: Option<String> = row.get(5)?;
    let expires_str: String = row.get(6)?;
    let created_str: String = row.get(7)?;

    Ok(Message {
        id: parse_uuid(&id_str, 0)?,
        sender_id: parse_uuid(&sender_str, 1)?,
        recipient_id: parse_uuid(&recipient_str, 2)?,
        snap_id: snap_str.as_deref().map(|s| parse_uuid(s, 3)).transpose()?,
        body,
        read_at: read_str.as_deref().map(|s| parse_ts(s, 5)).transpose()?,
        expires_at: parse_ts(&expires_str, 6)?,
        created_at: parse_ts(&created_str, 7)?,
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

    fn message(sender: Uuid, recipient: Uuid, expires_at: DateTime<Utc>) -> Message {
        Message {
            id: Uuid::new_v4(),
            sender_id: sender,
            recipient_id: recipient,
            snap_id: None,
            body: Some("psst".to_string()),
            read_at: None,
            expires_at,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn read_marks_exactly_once_and_tightens_expiry() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_profile(&db, "a");
        let b = seed_profile(&db, "b");
        let now = Utc::now();

        let m = message(a, b, now + Duration::hours(24));
        db.insert_message(&m).unwrap();

        let grace = now + Duration::minutes(20);
        assert!(db.mark_message_read(m.id, now, grace).unwrap());
        assert!(!db.mark_message_read(m.id, now, grace).unwrap());

        let got = db.get_message(m.id).unwrap();
        assert!(got.read_at.is_some());
        assert!(got.expires_at <= grace);
    }

    #[test]
    fn read_never_extends_expiry() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_profile(&db, "a");
        let b = seed_profile(&db, "b");
        let now = Utc::now();

        // Already expiring sooner than the grace deadline.
        let m = message(a, b, now + Duration::minutes(5));
        db.insert_message(&m).unwrap();

        db.mark_message_read(m.id, now, now + Duration::minutes(20))
            .unwrap();
        let got = db.get_message(m.id).unwrap();
        assert!(got.expires_at <= now + Duration::minutes(5));
    }

    #[test]
    fn inbox_excludes_expired() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_profile(&db, "a");
        let b = seed_profile(&db, "b");
        let now = Utc::now();

        db.insert_message(&message(a, b, now + Duration::hours(1)))
            .unwrap();
        db.insert_message(&message(a, b, now - Duration::hours(1)))
            .unwrap();

        assert_eq!(db.message_inbox(b, now).unwrap().len(), 1);
        assert_eq!(db.expired_message_ids(now).unwrap().len(), 1);
    }
}
