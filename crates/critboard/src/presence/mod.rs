//! Cursor presence and participant status.
//!
//! Each participant publishes a [`PresenceRecord`] at
//! `boards/<board>/cursors/<user>` whenever the pointer moves, and again on
//! every heartbeat while it is still. Disconnect cleanup is only best effort,
//! so readers decide liveness from the record's age rather than from its mere
//! presence.

pub mod activity;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::comment::{BoardId, Point};
use crate::config::PresenceConfig;
use crate::error::{Error, Result};
use crate::realtime::{
    connection_owner, cursor_path, cursors_prefix, status_path, DisconnectAction, RealtimeStore,
};

pub use activity::{ActivityEvent, ActivityFeed, ActivityKind, ActivityPayload, Actor};

/// Cursor colors handed out to participants.
pub const PALETTE: [&str; 10] = [
    "#e6194b", "#3cb44b", "#4363d8", "#f58231", "#911eb4", "#42d4f4", "#f032e6", "#469990",
    "#9a6324", "#800000",
];

/// Deterministic cursor color for a user id.
///
/// Every participant derives the same color for the same user without
/// coordinating.
#[must_use]
pub fn color_for_user(user_id: &str) -> &'static str {
    let hash = blake3::hash(user_id.as_bytes());
    let index = usize::from(hash.as_bytes()[0]) % PALETTE.len();
    PALETTE[index]
}

/// Identity of someone on the board. Supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Stable user id.
    pub id: String,
    /// Name shown next to the cursor.
    pub display_name: String,
    /// Optional avatar reference (URL or asset key).
    #[serde(default)]
    pub avatar_ref: Option<String>,
    /// Whether this is an unauthenticated guest.
    #[serde(default)]
    pub is_guest: bool,
}

impl Participant {
    /// A signed-in participant.
    #[must_use]
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            avatar_ref: None,
            is_guest: false,
        }
    }

    /// A guest participant.
    #[must_use]
    pub fn guest(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            is_guest: true,
            ..Self::new(id, display_name)
        }
    }

    /// Attach an avatar reference.
    #[must_use]
    pub fn with_avatar(mut self, avatar_ref: impl Into<String>) -> Self {
        self.avatar_ref = Some(avatar_ref.into());
        self
    }
}

/// Liveness inferred from a presence record's age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    /// Updated within the liveness window.
    Active,
    /// Updated within the idle window.
    Idle,
    /// Older than the idle window.
    Offline,
}

/// One participant's cursor on a board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    /// Owner of the cursor.
    pub user_id: String,
    /// Name shown next to the cursor.
    pub display_name: String,
    /// Hex color from [`color_for_user`].
    pub color: String,
    /// Pointer position in board coordinates.
    pub position: Point,
    /// When this record was last written.
    pub updated_at: DateTime<Utc>,
}

impl PresenceRecord {
    /// Time since the record was written. Future timestamps count as zero.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.updated_at).to_std().unwrap_or_default()
    }

    /// Classify the record by age.
    #[must_use]
    pub fn status(&self, now: DateTime<Utc>, config: &PresenceConfig) -> PresenceStatus {
        let age = self.age(now);
        if age <= config.liveness_window() {
            PresenceStatus::Active
        } else if age <= config.idle_window() {
            PresenceStatus::Idle
        } else {
            PresenceStatus::Offline
        }
    }
}

/// Broader, board-independent status of a participant.
///
/// Leaving soft-deletes it: `online` flips to false and `last_active` is
/// kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantStatus {
    /// Whether the participant is connected.
    pub online: bool,
    /// Last time the participant was seen.
    pub last_active: DateTime<Utc>,
    /// Name to show in participant lists.
    pub display_name: String,
}

/// Writes one participant's cursor record. Shared with the heartbeat task.
#[derive(Debug)]
struct CursorPublisher {
    realtime: Arc<dyn RealtimeStore>,
    path: String,
    participant: Participant,
    color: &'static str,
    last_position: Mutex<Point>,
}

impl CursorPublisher {
    fn record(&self, position: Point, now: DateTime<Utc>) -> PresenceRecord {
        PresenceRecord {
            user_id: self.participant.id.clone(),
            display_name: self.participant.display_name.clone(),
            color: self.color.to_string(),
            position,
            updated_at: now,
        }
    }

    fn last_position(&self) -> Result<Point> {
        self.last_position
            .lock()
            .map(|position| *position)
            .map_err(|_| Error::internal("cursor position lock poisoned"))
    }

    async fn publish(&self, position: Point) -> Result<()> {
        {
            let mut last = self
                .last_position
                .lock()
                .map_err(|_| Error::internal("cursor position lock poisoned"))?;
            *last = position;
        }
        let record = self.record(position, Utc::now());
        self.realtime
            .set(&self.path, serde_json::to_value(&record)?)
            .await
    }

    async fn republish(&self) -> Result<()> {
        let position = self.last_position()?;
        self.publish(position).await
    }
}

/// Stops a running heartbeat task.
///
/// Dropping the handle stops the task as well.
#[derive(Debug)]
pub struct HeartbeatHandle {
    stop_signal: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    /// Signal the task to stop and cancel it.
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        self.task.abort();
    }

    /// Whether the task has been asked to stop.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop_signal.load(Ordering::SeqCst)
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Publishes and reads cursor presence for one participant on one board.
#[derive(Debug)]
pub struct PresenceTracker {
    board: BoardId,
    owner: String,
    config: PresenceConfig,
    publisher: Arc<CursorPublisher>,
}

impl PresenceTracker {
    /// Create a tracker. Nothing is published until [`join`](Self::join).
    #[must_use]
    pub fn new(
        realtime: Arc<dyn RealtimeStore>,
        board: BoardId,
        participant: Participant,
        config: PresenceConfig,
    ) -> Self {
        let path = cursor_path(&board, &participant.id);
        let color = color_for_user(&participant.id);
        let owner = connection_owner(&board, &participant.id);
        Self {
            board,
            owner,
            config,
            publisher: Arc::new(CursorPublisher {
                realtime,
                path,
                participant,
                color,
                last_position: Mutex::new(Point::default()),
            }),
        }
    }

    /// The local participant.
    #[must_use]
    pub fn participant(&self) -> &Participant {
        &self.publisher.participant
    }

    /// The local participant's cursor color.
    #[must_use]
    pub fn color(&self) -> &'static str {
        self.publisher.color
    }

    /// Key under which this board connection's disconnect actions are
    /// registered.
    #[must_use]
    pub fn connection_owner(&self) -> &str {
        &self.owner
    }

    /// Publish the initial record, mark the participant online and register
    /// disconnect cleanup.
    ///
    /// # Errors
    ///
    /// Returns an error if the realtime store rejects a write.
    pub async fn join(&self) -> Result<()> {
        let realtime = &self.publisher.realtime;
        let participant = &self.publisher.participant;
        let now = Utc::now();

        self.publisher.republish().await?;
        realtime
            .set(&status_path(&participant.id), self.status_value(true, now)?)
            .await?;

        let serde_json::Value::Object(fields) = self.status_value(false, now)? else {
            return Err(Error::internal("participant status is not an object"));
        };
        realtime
            .on_disconnect(&self.owner, &self.publisher.path, DisconnectAction::Remove)
            .await?;
        realtime
            .on_disconnect(
                &self.owner,
                &status_path(&participant.id),
                DisconnectAction::SetStamped {
                    fields,
                    field: "last_active".to_string(),
                },
            )
            .await?;

        info!("{} joined board {}", participant.id, self.board);
        Ok(())
    }

    /// Publish a new pointer position.
    ///
    /// # Errors
    ///
    /// Returns an error if the realtime store rejects the write.
    pub async fn pointer_moved(&self, position: Point) -> Result<()> {
        self.publisher.publish(position).await
    }

    /// Republish the last position with a fresh timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the realtime store rejects the write.
    pub async fn heartbeat(&self) -> Result<()> {
        self.publisher.republish().await
    }

    /// Spawn a task that calls [`heartbeat`](Self::heartbeat) every
    /// configured interval until the returned handle is stopped or dropped.
    #[must_use]
    pub fn start_heartbeat(&self) -> HeartbeatHandle {
        let publisher = Arc::clone(&self.publisher);
        let interval = self.config.heartbeat_interval();
        let stop_signal = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&stop_signal);

        debug!(
            "Starting presence heartbeat for {} (interval: {:?})",
            publisher.participant.id, interval
        );

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; join already published.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = publisher.republish().await {
                    warn!("Presence heartbeat failed: {}", e);
                }
            }
            debug!("Presence heartbeat stopped");
        });

        HeartbeatHandle { stop_signal, task }
    }

    /// Cursors of other participants updated within the liveness window.
    ///
    /// # Errors
    ///
    /// Returns an error if the realtime store cannot be read.
    pub async fn active_cursors(&self, now: DateTime<Utc>) -> Result<Vec<PresenceRecord>> {
        let own_id = &self.publisher.participant.id;
        Ok(self
            .all_cursors()
            .await?
            .into_iter()
            .filter(|record| record.user_id != *own_id)
            .filter(|record| record.status(now, &self.config) == PresenceStatus::Active)
            .collect())
    }

    /// Every readable cursor record on the board, the local one included.
    ///
    /// # Errors
    ///
    /// Returns an error if the realtime store cannot be read.
    pub async fn all_cursors(&self) -> Result<Vec<PresenceRecord>> {
        let snapshot = self
            .publisher
            .realtime
            .snapshot(&cursors_prefix(&self.board))
            .await?;
        Ok(snapshot
            .into_iter()
            .filter_map(|(path, value)| match serde_json::from_value(value) {
                Ok(record) => Some(record),
                Err(e) => {
                    debug!("Skipping malformed presence record at {}: {}", path, e);
                    None
                }
            })
            .collect())
    }

    /// Remove the local cursor and mark the participant offline.
    ///
    /// # Errors
    ///
    /// Returns an error if the realtime store rejects a write.
    pub async fn leave(&self) -> Result<()> {
        let realtime = &self.publisher.realtime;
        let participant = &self.publisher.participant;

        realtime.remove(&self.publisher.path).await?;
        realtime
            .set(
                &status_path(&participant.id),
                self.status_value(false, Utc::now())?,
            )
            .await?;
        realtime.cancel_on_disconnect(&self.owner).await?;

        info!("{} left board {}", participant.id, self.board);
        Ok(())
    }

    fn status_value(&self, online: bool, now: DateTime<Utc>) -> Result<serde_json::Value> {
        let status = ParticipantStatus {
            online,
            last_active: now,
            display_name: self.publisher.participant.display_name.clone(),
        };
        Ok(serde_json::to_value(status)?)
    }
}
