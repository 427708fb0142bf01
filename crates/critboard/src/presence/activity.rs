//! Short-lived activity events ("Ana added a comment").
//!
//! Events are written under `boards/<board>/activity/`, shown for a few
//! seconds and then deleted by whichever client sweeps first. Nobody owns the
//! cleanup: if no client is running, stale events simply stay until one
//! comes back, which is why [`ActivityFeed::visible`] filters by age too.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::Participant;
use crate::comment::{BoardId, CommentId, Point};
use crate::config::ActivityConfig;
use crate::error::Result;
use crate::realtime::{activity_path, activity_prefix, RealtimeStore};

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// A comment was placed.
    CommentAdded,
    /// A comment's text, category or reactions changed.
    CommentEdited,
    /// A comment was deleted.
    CommentDeleted,
    /// A participant started dragging a link from a comment.
    LinkStarted,
    /// A link between two comments was created.
    LinkCompleted,
}

/// Who did it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// User id.
    pub user_id: String,
    /// Name shown in the event.
    pub display_name: String,
}

impl From<&Participant> for Actor {
    fn from(participant: &Participant) -> Self {
        Self {
            user_id: participant.id.clone(),
            display_name: participant.display_name.clone(),
        }
    }
}

/// Where it happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityPayload {
    /// The comment involved.
    pub comment_id: CommentId,
    /// Board position of the comment.
    pub position: Point,
    /// Board position of the link target, for link events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Point>,
}

impl ActivityPayload {
    /// Payload about one comment.
    #[must_use]
    pub fn at(comment_id: CommentId, position: Point) -> Self {
        Self {
            comment_id,
            position,
            target: None,
        }
    }

    /// Add a link target position.
    #[must_use]
    pub fn with_target(mut self, target: Point) -> Self {
        self.target = Some(target);
        self
    }
}

/// One activity event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    /// Event id, also the last path segment.
    pub id: String,
    /// Who did it.
    pub actor: Actor,
    /// What happened.
    pub kind: ActivityKind,
    /// Where it happened.
    pub payload: ActivityPayload,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
}

impl ActivityEvent {
    fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.timestamp).to_std().unwrap_or_default()
    }
}

/// Publishes and reads activity events for one participant on one board.
#[derive(Debug)]
pub struct ActivityFeed {
    realtime: Arc<dyn RealtimeStore>,
    board: BoardId,
    actor: Actor,
    config: ActivityConfig,
}

impl ActivityFeed {
    /// Create a feed publishing as `participant`.
    #[must_use]
    pub fn new(
        realtime: Arc<dyn RealtimeStore>,
        board: BoardId,
        participant: &Participant,
        config: ActivityConfig,
    ) -> Self {
        Self {
            realtime,
            board,
            actor: Actor::from(participant),
            config,
        }
    }

    /// Publish an event stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns an error if the realtime store rejects the write.
    pub async fn publish(
        &self,
        kind: ActivityKind,
        payload: ActivityPayload,
    ) -> Result<ActivityEvent> {
        self.publish_at(kind, payload, Utc::now()).await
    }

    /// Publish an event with an explicit timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the realtime store rejects the write.
    pub async fn publish_at(
        &self,
        kind: ActivityKind,
        payload: ActivityPayload,
        timestamp: DateTime<Utc>,
    ) -> Result<ActivityEvent> {
        let event = ActivityEvent {
            id: uuid::Uuid::new_v4().to_string(),
            actor: self.actor.clone(),
            kind,
            payload,
            timestamp,
        };
        self.realtime
            .set(
                &activity_path(&self.board, &event.id),
                serde_json::to_value(&event)?,
            )
            .await?;
        trace!("Published {:?} on board {}", kind, self.board);
        Ok(event)
    }

    /// Events younger than the display window, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the realtime store cannot be read.
    pub async fn visible(&self, now: DateTime<Utc>) -> Result<Vec<ActivityEvent>> {
        let window = self.config.display_window();
        let mut events: Vec<ActivityEvent> = self
            .events()
            .await?
            .into_iter()
            .map(|(_, event)| event)
            .filter(|event| event.age(now) < window)
            .collect();
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(events)
    }

    /// Delete events older than the expiry age. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the realtime store cannot be read or written.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let expiry = self.config.expiry();
        let mut removed = 0;
        for (path, event) in self.events().await? {
            if event.age(now) > expiry {
                self.realtime.remove(&path).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("Swept {} expired activity events from {}", removed, self.board);
        }
        Ok(removed)
    }

    async fn events(&self) -> Result<Vec<(String, ActivityEvent)>> {
        let snapshot = self
            .realtime
            .snapshot(&activity_prefix(&self.board))
            .await?;
        Ok(snapshot
            .into_iter()
            .filter_map(|(path, value)| match serde_json::from_value(value) {
                Ok(event) => Some((path, event)),
                Err(e) => {
                    debug!("Skipping malformed activity event at {}: {}", path, e);
                    None
                }
            })
            .collect())
    }
}
