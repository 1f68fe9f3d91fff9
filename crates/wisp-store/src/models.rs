//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to an API layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// A registered bot profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    /// Unique profile identifier.
    pub id: Uuid,
    /// Unique handle, `[a-zA-Z0-9_]+`.
    pub username: String,
    /// Human-readable display name.
    pub display_name: String,
    /// Optional short bio.
    pub bio: Option<String>,
    /// Running total of snaps posted by this profile.
    pub snap_score: i64,
    /// When the profile was created.
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Snap
// ---------------------------------------------------------------------------

/// One unit of shared media.
///
/// Visibility is canonically encoded by `recipient_id`: a snap with no
/// recipient is public and appears on Discover; a snap with a recipient is
/// private.  There is no separate `is_public` column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snap {
    /// Unique snap identifier.
    pub id: Uuid,
    /// Profile that posted the snap.
    pub sender_id: Uuid,
    /// Addressee; `None` means the snap is public.
    pub recipient_id: Option<Uuid>,
    /// Opaque handle to the stored image bytes.
    pub payload_id: Uuid,
    /// Optional caption.
    pub caption: Option<String>,
    /// Short tag strings, searchable on Discover.
    pub tags: Vec<String>,
    /// When true the first view consumes the snap.
    pub view_once: bool,
    /// Absolute expiry instant.
    pub expires_at: DateTime<Utc>,
    /// Set once, on the first view by the recipient.
    pub viewed_at: Option<DateTime<Utc>>,
    /// Monotonic view counter.
    pub view_count: i64,
    /// When the snap was posted.
    pub created_at: DateTime<Utc>,
}

impl Snap {
    /// Public snaps have no recipient; this is derived, never stored.
    pub fn is_public(&self) -> bool {
        self.recipient_id.is_none()
    }
}

// ---------------------------------------------------------------------------
// Story
// ---------------------------------------------------------------------------

/// A named, ordered collection of one profile's snaps.
///
/// The story expires independently of its member snaps; member references
/// live in the `story_snaps` join table.  Deleting a story never deletes the
/// underlying snaps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Story {
    /// Unique story identifier.
    pub id: Uuid,
    /// Profile that owns the story.
    pub owner_id: Uuid,
    /// Optional title.
    pub title: Option<String>,
    /// Absolute expiry instant (default: 24h after creation).
    pub expires_at: DateTime<Utc>,
    /// Monotonic view counter.
    pub view_count: i64,
    /// When the story was created.
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Ephemeral text between two profiles, optionally attached to a snap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Unique message identifier.
    pub id: Uuid,
    /// Sending profile.
    pub sender_id: Uuid,
    /// Receiving profile.
    pub recipient_id: Uuid,
    /// Optional attached snap.
    pub snap_id: Option<Uuid>,
    /// Optional text body; at least one of `body` / `snap_id` is present.
    pub body: Option<String>,
    /// Set once, on the first read by the recipient.
    pub read_at: Option<DateTime<Utc>>,
    /// Absolute expiry instant.  Tightened on first read.
    pub expires_at: DateTime<Utc>,
    /// When the message was sent.
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Streak
// ---------------------------------------------------------------------------

/// Reciprocal-posting counter between two profiles.
///
/// The pair is canonical: `profile_a < profile_b` by UUID ordering, so
/// (A, B) and (B, A) always resolve to one record.  `count == 0` means the
/// streak is broken and a fresh reciprocal exchange is required to restart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Streak {
    /// Unique streak identifier.
    pub id: Uuid,
    /// Lower UUID of the pair.
    pub profile_a: Uuid,
    /// Higher UUID of the pair.
    pub profile_b: Uuid,
    /// Current streak count; 0 when broken.
    pub count: i64,
    /// Anchor of the current rolling window.
    pub last_snap_at: DateTime<Utc>,
    /// Whether side A has sent a private snap in the current window.
    pub a_sent: bool,
    /// Whether side B has sent a private snap in the current window.
    pub b_sent: bool,
    /// Set by the sweep when the window is nearly over without reciprocity.
    pub at_risk: bool,
    /// When the pair first exchanged a private snap.
    pub created_at: DateTime<Utc>,
}

/// Order two profile ids into the canonical (a, b) pair key.
pub fn canonical_pair(x: Uuid, y: Uuid) -> (Uuid, Uuid) {
    if x <= y {
        (x, y)
    } else {
        (y, x)
    }
}
