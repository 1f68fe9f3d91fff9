//! CRUD operations for [`Profile`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Profile;

impl Database {
    /// Insert a new profile.
    pub fn create_profile(&self, profile: &Profile) -> Result<()> {
        self.conn().execute(
            "INSERT INTO profiles (id, username, display_name, bio, snap_score, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                profile.id.to_string(),
                profile.username,
                profile.display_name,
                profile.bio,
                profile.snap_score,
                profile.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch a single profile by UUID.
    pub fn get_profile(&self, id: Uuid) -> Result<Profile> {
        self.conn()
            .query_row(
                "SELECT id, username, display_name, bio, snap_score, created_at
                 FROM profiles
                 WHERE id = ?1",
                params![id.to_string()],
                row_to_profile,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Fetch a single profile by username.
    pub fn get_profile_by_username(&self, username: &str) -> Result<Profile> {
        self.conn()
            .query_row(
                "SELECT id, username, display_name, bio, snap_score, created_at
                 FROM profiles
                 WHERE username = ?1",
                params![username],
                row_to_profile,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Increment a profile's snap score by one.  Returns `true` if the
    /// profile exists.
    pub fn bump_snap_score(&self, id: Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE profiles SET snap_score = snap_score + 1 WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }
}

/// Map a `rusqlite::Row` to a [`Profile`].
fn row_to_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<Profile> {
    let id_str: String = row.get(0)?;
    let username: String = row.get(1)?;
    let display_name: String = row.get(2)?;
    let bio: Option<String> = row.get(3)?;
    let snap_score: i64 = row.get(4)?;
    let created_str: String = row.get(5)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Profile {
        id,
        username,
        display_name,
        bio,
        snap_score,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(username: &str) -> Profile {
        Profile {
            id: Uuid::new_v4(),
            username: username.to_string(),
            display_name: username.to_uppercase(),
            bio: None,
            snap_score: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn create_and_fetch() {
        let db = Database::open_in_memory().unwrap();
        let p = profile("crabby");
        db.create_profile(&p).unwrap();

        assert_eq!(db.get_profile(p.id).unwrap().username, "crabby");
        assert_eq!(db.get_profile_by_username("crabby").unwrap().id, p.id);
        assert!(matches!(
            db.get_profile_by_username("nobody"),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn username_is_unique() {
        let db = Database::open_in_memory().unwrap();
        db.create_profile(&profile("dupe")).unwrap();
        assert!(db.create_profile(&profile("dupe")).is_err());
    }

    #[test]
    fn snap_score_bumps() {
        let db = Database::open_in_memory().unwrap();
        let p = profile("scorer");
        db.create_profile(&p).unwrap();

        assert!(db.bump_snap_score(p.id).unwrap());
        assert!(db.bump_snap_score(p.id).unwrap());
        assert_eq!(db.get_profile(p.id).unwrap().snap_score, 2);

        assert!(!db.bump_snap_score(Uuid::new_v4()).unwrap());
    }
}
