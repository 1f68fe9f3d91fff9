//! Content lifecycle: expiry computation, view-once consumption, and purge.
//!
//! The engine is the single source of truth for "is this content still
//! visible".  Read paths never return expired content; the first view of a
//! view-once snap is decided by a conditional store update so that exactly
//! one of any number of concurrent viewers wins.
//!
//! A consumed view-once snap is not deleted inline.  Its payload bytes are
//! removed immediately and its record is collapsed into an already-expired
//! tombstone, which the next sweep tick reaps.  The tombstone is what lets a
//! concurrent (or slightly late) second viewer receive `Gone` instead of the
//! `NotFound` reserved for ids that never existed or were fully purged.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use wisp_store::{Database, Message, Snap, Story};

use crate::error::CoreError;
use crate::payload::PayloadStore;
use crate::policy::LifecyclePolicy;
use crate::Result;

const MAX_TAG_LEN: usize = 40;
const MAX_TITLE_LEN: usize = 120;

// ---------------------------------------------------------------------------
// Visibility
// ---------------------------------------------------------------------------

/// Anything with an expiry instant and an optional consumed state.
pub trait Ephemeral {
    fn expires_at(&self) -> DateTime<Utc>;

    /// Whether the entity was consumed independently of expiry.
    fn consumed(&self) -> bool {
        false
    }
}

impl Ephemeral for Snap {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    fn consumed(&self) -> bool {
        self.view_once && self.viewed_at.is_some()
    }
}

impl Ephemeral for Story {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl Ephemeral for Message {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

/// False at and after `expires_at` (the boundary instant counts as expired),
/// and for consumed view-once snaps regardless of expiry.
pub fn is_visible<E: Ephemeral>(entity: &E, now: DateTime<Utc>) -> bool {
    now < entity.expires_at() && !entity.consumed()
}

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// Parameters for posting a snap.
#[derive(Debug, Clone)]
pub struct NewSnap {
    pub sender: Uuid,
    /// `None` posts a public snap (Discover); `Some` a private one.
    pub recipient: Option<Uuid>,
    pub data: Vec<u8>,
    pub mime: String,
    pub caption: Option<String>,
    pub tags: Vec<String>,
    /// `None` or `Some(0)` means "use the default TTL".
    pub ttl_hours: Option<i64>,
    pub view_once: bool,
}

/// Parameters for sending a message.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender: Uuid,
    pub recipient: Uuid,
    pub body: Option<String>,
    pub snap_id: Option<Uuid>,
    pub ttl_hours: Option<i64>,
}

/// Result of a view operation.
#[derive(Debug, Clone, Serialize)]
pub struct ViewOutcome {
    pub snap: Snap,
    /// True iff this view consumed a view-once snap.
    pub deleted: bool,
}

/// A story together with its currently-visible member snaps, in order.
#[derive(Debug, Clone, Serialize)]
pub struct StoryView {
    pub story: Story,
    pub snaps: Vec<Snap>,
}

/// Counters from one purge pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub snaps_purged: usize,
    pub payloads_deleted: usize,
    pub payload_failures: usize,
    pub stories_purged: usize,
    pub messages_purged: usize,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Computes expiry timestamps and deletion triggers for all content.
#[derive(Clone)]
pub struct LifecycleEngine {
    db: Arc<Mutex<Database>>,
    payloads: Arc<PayloadStore>,
    policy: LifecyclePolicy,
}

impl LifecycleEngine {
    pub fn new(
        db: Arc<Mutex<Database>>,
        payloads: Arc<PayloadStore>,
        policy: LifecyclePolicy,
    ) -> Self {
        Self {
            db,
            payloads,
            policy,
        }
    }

    /// The payload store, for callers that serve raw image bytes.
    pub fn payloads(&self) -> &PayloadStore {
        &self.payloads
    }

    /// Resolve a requested TTL against the policy.
    ///
    /// `None` and `Some(0)` fall back to the default; negative or
    /// above-cap requests are rejected with [`CoreError::InvalidTtl`].
    pub fn compute_expiry(
        &self,
        requested_hours: Option<i64>,
        default_hours: i64,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        match requested_hours {
            None | Some(0) => Ok(now + Duration::hours(default_hours)),
            Some(h) if h < 0 || h > self.policy.max_ttl_hours => Err(CoreError::InvalidTtl {
                requested: h,
                max: self.policy.max_ttl_hours,
            }),
            Some(h) => Ok(now + Duration::hours(h)),
        }
    }

    // ------------------------------------------------------------------
    // Snaps
    // ------------------------------------------------------------------

    /// Post a snap: payload first, record second, so a storage failure can
    /// never leave a record pointing at bytes that were not written.
    pub async fn post_snap(&self, req: NewSnap, now: DateTime<Utc>) -> Result<Snap> {
        if let Some(caption) = &req.caption {
            if caption.chars().count() > self.policy.max_caption_len {
                return Err(CoreError::Invalid(format!(
                    "caption too long (max {} chars)",
                    self.policy.max_caption_len
                )));
            }
        }
        if req.tags.len() > self.policy.max_tags {
            return Err(CoreError::Invalid(format!(
                "too many tags (max {})",
                self.policy.max_tags
            )));
        }
        for tag in &req.tags {
            if tag.is_empty() || tag.chars().count() > MAX_TAG_LEN {
                return Err(CoreError::Invalid("invalid tag".to_string()));
            }
        }

        let expires_at =
            self.compute_expiry(req.ttl_hours, self.policy.default_snap_ttl_hours, now)?;

        let payload_id = self.payloads.store(&req.data, &req.mime).await?;

        let snap = Snap {
            id: Uuid::new_v4(),
            sender_id: req.sender,
            recipient_id: req.recipient,
            payload_id,
            caption: req.caption,
            tags: req.tags,
            view_once: req.view_once,
            expires_at,
            viewed_at: None,
            view_count: 0,
            created_at: now,
        };

        {
            let db = self.db.lock().await;
            if let Err(e) = db.insert_snap(&snap) {
                drop(db);
                // Roll the payload back rather than leaving an orphan.
                if let Err(del) = self.payloads.delete(payload_id).await {
                    warn!(payload = %payload_id, error = %del, "orphan payload left behind");
                }
                return Err(e.into());
            }
            db.bump_snap_score(req.sender)?;
        }

        debug!(
            snap = %snap.id,
            public = snap.is_public(),
            view_once = snap.view_once,
            "posted snap"
        );
        Ok(snap)
    }

    /// View a snap.
    ///
    /// The recipient's first view is decided by a conditional update; for a
    /// view-once snap the winner consumes it (payload removed immediately,
    /// record tombstoned for the sweep) and every later viewer gets `Gone`.
    pub async fn view_snap(
        &self,
        id: Uuid,
        viewer: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ViewOutcome> {
        let (snap, consumed) = {
            let db = self.db.lock().await;
            let mut snap = db.get_snap(id)?;

            // Strangers never learn a private snap exists.
            if !snap.is_public() && viewer != snap.sender_id && snap.recipient_id != Some(viewer)
            {
                return Err(CoreError::NotFound);
            }

            if now >= snap.expires_at {
                return Err(CoreError::Gone);
            }
            if snap.consumed() {
                return Err(CoreError::Gone);
            }

            if snap.recipient_id == Some(viewer) {
                if db.mark_snap_viewed(id, now)? {
                    snap.viewed_at = Some(now);
                    snap.view_count += 1;
                    if snap.view_once {
                        // Tombstone: already-expired record, reaped by the
                        // next sweep tick.
                        db.expire_snap_now(id, now)?;
                        snap.expires_at = now;
                        (snap, true)
                    } else {
                        (snap, false)
                    }
                } else {
                    // Lost the first-view race.
                    if snap.view_once {
                        return Err(CoreError::Gone);
                    }
                    db.bump_snap_views(id)?;
                    snap.view_count += 1;
                    (snap, false)
                }
            } else if snap.is_public() && viewer != snap.sender_id {
                db.bump_snap_views(id)?;
                snap.view_count += 1;
                (snap, false)
            } else {
                (snap, false)
            }
        };

        if consumed {
            // The record is already invisible; the bytes go now.  On failure
            // the sweep retries when it reaps the tombstone.
            if let Err(e) = self.payloads.delete(snap.payload_id).await {
                warn!(snap = %snap.id, error = %e, "view-once payload delete failed");
            }
            debug!(snap = %snap.id, "view-once snap consumed");
            return Ok(ViewOutcome {
                snap,
                deleted: true,
            });
        }

        Ok(ViewOutcome {
            snap,
            deleted: false,
        })
    }

    /// Unviewed private snaps addressed to a profile.
    pub async fn inbox(&self, recipient: Uuid, now: DateTime<Utc>) -> Result<Vec<Snap>> {
        let db = self.db.lock().await;
        Ok(db.inbox_snaps(recipient, now)?)
    }

    /// Unexpired snaps posted by a profile.
    pub async fn snaps_by_sender(&self, sender: Uuid, now: DateTime<Utc>) -> Result<Vec<Snap>> {
        let db = self.db.lock().await;
        Ok(db.snaps_by_sender(sender, now)?)
    }

    /// The public Discover feed, newest first.
    pub async fn discover(
        &self,
        now: DateTime<Utc>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Snap>> {
        let db = self.db.lock().await;
        Ok(db.public_snaps(now, limit, offset)?)
    }

    /// Discover, restricted to snaps carrying an exact tag.
    pub async fn discover_by_tag(
        &self,
        tag: &str,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Snap>> {
        let db = self.db.lock().await;
        Ok(db.public_snaps_with_tag(tag, now, limit)?)
    }

    /// Top tags across active public snaps, by frequency then name.
    pub async fn trending_tags(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(String, usize)>> {
        let tag_lists = {
            let db = self.db.lock().await;
            db.public_snap_tags(now)?
        };

        let mut counts = std::collections::HashMap::<String, usize>::new();
        for tags in tag_lists {
            for tag in tags {
                *counts.entry(tag).or_default() += 1;
            }
        }

        let mut sorted: Vec<(String, usize)> = counts.into_iter().collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        sorted.truncate(limit);
        Ok(sorted)
    }

    /// Delete a snap on request: record first, then payload, so a failure
    /// leans toward an orphaned payload rather than a dangling reference.
    pub async fn delete_snap(&self, id: Uuid) -> Result<()> {
        let payload_id = {
            let db = self.db.lock().await;
            let snap = db.get_snap(id)?;
            db.delete_snap(id)?;
            snap.payload_id
        };

        if let Err(e) = self.payloads.delete(payload_id).await {
            warn!(snap = %id, payload = %payload_id, error = %e, "orphan payload left behind");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Stories
    // ------------------------------------------------------------------

    /// Create a story from snaps the owner already posted.
    pub async fn post_story(
        &self,
        owner: Uuid,
        title: Option<String>,
        snap_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> Result<StoryView> {
        if snap_ids.is_empty() {
            return Err(CoreError::Invalid("story needs at least one snap".to_string()));
        }
        if let Some(title) = &title {
            if title.chars().count() > MAX_TITLE_LEN {
                return Err(CoreError::Invalid(format!(
                    "title too long (max {MAX_TITLE_LEN} chars)"
                )));
            }
        }

        let db = self.db.lock().await;
        for snap_id in snap_ids {
            let snap = db.get_snap(*snap_id)?;
            if snap.sender_id != owner {
                return Err(CoreError::Invalid(format!(
                    "snap {snap_id} is not owned by the story owner"
                )));
            }
        }

        let story = Story {
            id: Uuid::new_v4(),
            owner_id: owner,
            title,
            expires_at: now + Duration::hours(self.policy.story_ttl_hours),
            view_count: 0,
            created_at: now,
        };
        db.insert_story(&story)?;
        for snap_id in snap_ids {
            db.append_story_snap(story.id, *snap_id)?;
        }

        debug!(story = %story.id, members = snap_ids.len(), "posted story");
        assemble_story(&db, story, now)
    }

    /// Append one more snap to an existing story.
    pub async fn append_to_story(
        &self,
        story_id: Uuid,
        snap_id: Uuid,
        owner: Uuid,
        now: DateTime<Utc>,
    ) -> Result<StoryView> {
        let db = self.db.lock().await;
        let story = db.get_story(story_id)?;
        if story.owner_id != owner {
            return Err(CoreError::NotFound);
        }
        if !is_visible(&story, now) {
            return Err(CoreError::Gone);
        }

        let snap = db.get_snap(snap_id)?;
        if snap.sender_id != owner {
            return Err(CoreError::Invalid(format!(
                "snap {snap_id} is not owned by the story owner"
            )));
        }

        db.append_story_snap(story_id, snap_id)?;
        assemble_story(&db, story, now)
    }

    /// The owner's most recently created non-expired story, if any.
    ///
    /// There is no stored "current story" pointer; this query is the whole
    /// concept.
    pub async fn active_story(&self, owner: Uuid, now: DateTime<Utc>) -> Result<StoryView> {
        let db = self.db.lock().await;
        let story = db.active_story_for(owner, now)?;
        assemble_story(&db, story, now)
    }

    /// Like [`active_story`](Self::active_story), but counts the view.
    pub async fn view_active_story(
        &self,
        owner: Uuid,
        now: DateTime<Utc>,
    ) -> Result<StoryView> {
        let db = self.db.lock().await;
        let mut story = db.active_story_for(owner, now)?;
        db.bump_story_views(story.id)?;
        story.view_count += 1;
        assemble_story(&db, story, now)
    }

    /// Every active story on the network, newest first.
    pub async fn list_active_stories(&self, now: DateTime<Utc>) -> Result<Vec<StoryView>> {
        let db = self.db.lock().await;
        let stories = db.active_stories(now)?;
        stories
            .into_iter()
            .map(|story| assemble_story(&db, story, now))
            .collect()
    }

    /// Delete a story.  Member snaps are independently owned and survive.
    pub async fn delete_story(&self, id: Uuid) -> Result<()> {
        let db = self.db.lock().await;
        if !db.delete_story(id)? {
            return Err(CoreError::NotFound);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Send an ephemeral message, optionally attached to a snap.
    pub async fn send_message(&self, req: NewMessage, now: DateTime<Utc>) -> Result<Message> {
        let has_body = req.body.as_deref().is_some_and(|b| !b.is_empty());
        if !has_body && req.snap_id.is_none() {
            return Err(CoreError::Invalid(
                "message needs text or an attached snap".to_string(),
            ));
        }
        if let Some(body) = &req.body {
            if body.chars().count() > self.policy.max_body_len {
                return Err(CoreError::Invalid(format!(
                    "message too long (max {} chars)",
                    self.policy.max_body_len
                )));
            }
        }

        let expires_at =
            self.compute_expiry(req.ttl_hours, self.policy.message_ttl_hours, now)?;

        let db = self.db.lock().await;
        if let Some(snap_id) = req.snap_id {
            // Attachment must exist at send time.
            db.get_snap(snap_id)?;
        }

        let message = Message {
            id: Uuid::new_v4(),
            sender_id: req.sender,
            recipient_id: req.recipient,
            snap_id: req.snap_id,
            body: req.body,
            read_at: None,
            expires_at,
            created_at: now,
        };
        db.insert_message(&message)?;

        debug!(message = %message.id, "sent message");
        Ok(message)
    }

    /// Fetch a message without marking it read.  Participants only.
    pub async fn message(&self, id: Uuid, requester: Uuid, now: DateTime<Utc>) -> Result<Message> {
        let db = self.db.lock().await;
        let message = db.get_message(id)?;
        if requester != message.sender_id && requester != message.recipient_id {
            return Err(CoreError::NotFound);
        }
        if !is_visible(&message, now) {
            return Err(CoreError::Gone);
        }
        Ok(message)
    }

    /// Mark a message read.
    ///
    /// `read_at` is set exactly once; the first read also tightens the
    /// expiry so the message survives at most the read grace period.
    pub async fn read_message(
        &self,
        id: Uuid,
        reader: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Message> {
        let db = self.db.lock().await;
        let message = db.get_message(id)?;
        if reader != message.recipient_id {
            return Err(CoreError::NotFound);
        }
        if !is_visible(&message, now) {
            return Err(CoreError::Gone);
        }

        db.mark_message_read(id, now, now + self.policy.read_grace())?;
        Ok(db.get_message(id)?)
    }

    /// Unexpired messages addressed to a profile, without marking them read.
    pub async fn message_inbox(
        &self,
        recipient: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Message>> {
        let db = self.db.lock().await;
        Ok(db.message_inbox(recipient, now)?)
    }

    /// Unexpired messages sent by a profile.
    pub async fn sent_messages(&self, sender: Uuid, now: DateTime<Utc>) -> Result<Vec<Message>> {
        let db = self.db.lock().await;
        Ok(db.sent_messages(sender, now)?)
    }

    /// Delete a message.
    pub async fn delete_message(&self, id: Uuid) -> Result<()> {
        let db = self.db.lock().await;
        if !db.delete_message(id)? {
            return Err(CoreError::NotFound);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Purge
    // ------------------------------------------------------------------

    /// Delete every expired snap, story, and message.
    ///
    /// Idempotent: a second pass over the same data purges nothing and
    /// raises no error.  Snap purging deletes the payload before the record
    /// so a failed payload delete leaves the (already invisible) record in
    /// place for the next tick to retry.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<PurgeReport> {
        let mut report = PurgeReport::default();

        let expired = {
            let db = self.db.lock().await;
            db.expired_snaps(now)?
        };
        for (snap_id, payload_id) in expired {
            match self.payloads.delete(payload_id).await {
                Ok(deleted) => {
                    if deleted {
                        report.payloads_deleted += 1;
                    }
                    let db = self.db.lock().await;
                    if db.delete_snap(snap_id)? {
                        report.snaps_purged += 1;
                    }
                }
                Err(e) => {
                    warn!(
                        snap = %snap_id,
                        payload = %payload_id,
                        error = %e,
                        "payload purge failed; retrying next sweep"
                    );
                    report.payload_failures += 1;
                }
            }
        }

        {
            let db = self.db.lock().await;
            for story_id in db.expired_story_ids(now)? {
                if db.delete_story(story_id)? {
                    report.stories_purged += 1;
                }
            }
            for message_id in db.expired_message_ids(now)? {
                if db.delete_message(message_id)? {
                    report.messages_purged += 1;
                }
            }
        }

        Ok(report)
    }
}

/// Build a [`StoryView`], dropping members that are no longer visible.
fn assemble_story(db: &Database, story: Story, now: DateTime<Utc>) -> Result<StoryView> {
    let mut snaps = Vec::new();
    for snap_id in db.story_members(story.id)? {
        match db.get_snap(snap_id) {
            Ok(snap) if is_visible(&snap, now) => snaps.push(snap),
            Ok(_) => {}
            Err(wisp_store::StoreError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(StoryView { story, snaps })
}
