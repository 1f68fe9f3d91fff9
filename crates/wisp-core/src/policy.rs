//! Tunable lifecycle and streak policy knobs.
//!
//! Defaults mirror production settings; the daemon overrides them from
//! environment variables.

use chrono::Duration;

/// Expiry policy for snaps, stories, and messages.
#[derive(Debug, Clone)]
pub struct LifecyclePolicy {
    /// Default snap TTL when the sender does not request one.
    pub default_snap_ttl_hours: i64,
    /// Hard cap on any requested TTL (one week).
    pub max_ttl_hours: i64,
    /// Story TTL, fixed at creation.
    pub story_ttl_hours: i64,
    /// Default message TTL.
    pub message_ttl_hours: i64,
    /// How long a message survives after its first read.
    pub read_grace_minutes: i64,
    /// Maximum caption length in characters.
    pub max_caption_len: usize,
    /// Maximum number of tags per snap.
    pub max_tags: usize,
    /// Maximum message body length in characters.
    pub max_body_len: usize,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            default_snap_ttl_hours: 24,
            max_ttl_hours: 168,
            story_ttl_hours: 24,
            message_ttl_hours: 24,
            read_grace_minutes: 20,
            max_caption_len: 500,
            max_tags: 10,
            max_body_len: 2000,
        }
    }
}

impl LifecyclePolicy {
    pub fn read_grace(&self) -> Duration {
        Duration::minutes(self.read_grace_minutes)
    }
}

/// Rolling-window policy for streak bookkeeping.
#[derive(Debug, Clone)]
pub struct StreakPolicy {
    /// Length of the reciprocity window.
    pub window_hours: i64,
    /// A streak is flagged at-risk when less than this much of the window
    /// remains without reciprocity.
    pub at_risk_hours: i64,
}

impl Default for StreakPolicy {
    fn default() -> Self {
        Self {
            window_hours: 24,
            at_risk_hours: 4,
        }
    }
}

impl StreakPolicy {
    pub fn window(&self) -> Duration {
        Duration::hours(self.window_hours)
    }

    pub fn at_risk_threshold(&self) -> Duration {
        Duration::hours(self.at_risk_hours)
    }
}
