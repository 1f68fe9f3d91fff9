//! v001 -- Initial schema creation.
//!
//! Creates the six core tables: `profiles`, `snaps`, `stories`, `story_snaps`,
//! `messages`, and `streaks`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Profiles
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS profiles (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    username     TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL,
    bio          TEXT,
    snap_score   INTEGER NOT NULL DEFAULT 0,
    created_at   TEXT NOT NULL                -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Snaps
-- ----------------------------------------------------------------
-- recipient_id IS NULL means the snap is public (Discover).
CREATE TABLE IF NOT EXISTS snaps (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    sender_id    TEXT NOT NULL,               -- FK -> profiles(id)
    recipient_id TEXT,                        -- nullable FK -> profiles(id)
    payload_id   TEXT NOT NULL,               -- opaque payload store handle
    caption      TEXT,
    tags         TEXT NOT NULL DEFAULT '[]',  -- JSON array of strings
    view_once    INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    expires_at   TEXT NOT NULL,
    viewed_at    TEXT,
    view_count   INTEGER NOT NULL DEFAULT 0,
    created_at   TEXT NOT NULL,

    FOREIGN KEY (sender_id)    REFERENCES profiles(id) ON DELETE CASCADE,
    FOREIGN KEY (recipient_id) REFERENCES profiles(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_snaps_expires ON snaps(expires_at);
CREATE INDEX IF NOT EXISTS idx_snaps_recipient ON snaps(recipient_id, expires_at);
CREATE INDEX IF NOT EXISTS idx_snaps_sender ON snaps(sender_id, created_at DESC);

-- ----------------------------------------------------------------
-- Stories
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS stories (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    owner_id   TEXT NOT NULL,                 -- FK -> profiles(id)
    title      TEXT,
    expires_at TEXT NOT NULL,
    view_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,

    FOREIGN KEY (owner_id) REFERENCES profiles(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_stories_owner ON stories(owner_id, expires_at);
CREATE INDEX IF NOT EXISTS idx_stories_expires ON stories(expires_at);

-- Member references.  Deleting a story removes only these join rows; the
-- snaps themselves are independently owned.  Purging a snap removes it from
-- any story that references it.
CREATE TABLE IF NOT EXISTS story_snaps (
    story_id TEXT NOT NULL,
    snap_id  TEXT NOT NULL,
    position INTEGER NOT NULL,

    PRIMARY KEY (story_id, snap_id),
    FOREIGN KEY (story_id) REFERENCES stories(id) ON DELETE CASCADE,
    FOREIGN KEY (snap_id)  REFERENCES snaps(id)   ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    sender_id    TEXT NOT NULL,               -- FK -> profiles(id)
    recipient_id TEXT NOT NULL,               -- FK -> profiles(id)
    snap_id      TEXT,                        -- nullable FK -> snaps(id)
    body         TEXT,
    read_at      TEXT,
    expires_at   TEXT NOT NULL,
    created_at   TEXT NOT NULL,

    FOREIGN KEY (sender_id)    REFERENCES profiles(id) ON DELETE CASCADE,
    FOREIGN KEY (recipient_id) REFERENCES profiles(id) ON DELETE CASCADE,
    FOREIGN KEY (snap_id)      REFERENCES snaps(id)    ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_recipient ON messages(recipient_id, expires_at);
CREATE INDEX IF NOT EXISTS idx_messages_expires ON messages(expires_at);

-- ----------------------------------------------------------------
-- Streaks
-- ----------------------------------------------------------------
-- One row per unordered pair.  The canonical ordering (profile_a < profile_b,
-- UUID text ordering matches UUID byte ordering) is enforced here, not just
-- in application logic.
CREATE TABLE IF NOT EXISTS streaks (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    profile_a    TEXT NOT NULL,               -- FK -> profiles(id)
    profile_b    TEXT NOT NULL,               -- FK -> profiles(id)
    count        INTEGER NOT NULL DEFAULT 0,
    last_snap_at TEXT NOT NULL,
    a_sent       INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    b_sent       INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    at_risk      INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    created_at   TEXT NOT NULL,

    UNIQUE (profile_a, profile_b),
    CHECK (profile_a < profile_b),
    FOREIGN KEY (profile_a) REFERENCES profiles(id) ON DELETE CASCADE,
    FOREIGN KEY (profile_b) REFERENCES profiles(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_streaks_last_snap ON streaks(last_snap_at);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
