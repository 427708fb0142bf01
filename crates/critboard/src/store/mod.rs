//! Comment persistence and board subscriptions.
//!
//! The [`CommentStore`] trait is the only way the rest of the crate reaches
//! persisted comments. Every write is an independent update: scalar fields
//! are last-write-wins, list fields go through
//! [`ListUpdate`](crate::comment::ListUpdate) so concurrent appends survive.
//! Subscribers receive the full board snapshot after every change and are
//! expected to recompute derived state from it.

pub mod migrations;
pub mod schema;
mod sqlite;

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::trace;

use crate::comment::{BoardId, Comment, CommentId, CommentPatch};
use crate::error::{Error, Result};

pub use sqlite::SqliteCommentStore;

/// Receiver of full board snapshots. Dropping it unsubscribes.
pub type CommentSubscription = watch::Receiver<Vec<Comment>>;

/// A push-capable, keyed store of comments.
#[async_trait]
pub trait CommentStore: Send + Sync + std::fmt::Debug {
    /// Persist a new comment and return its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the write.
    async fn create(&self, comment: &Comment) -> Result<CommentId>;

    /// Read one comment.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    async fn read(&self, id: &CommentId) -> Result<Option<Comment>>;

    /// Apply a partial update.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the comment no longer exists.
    async fn update(&self, id: &CommentId, patch: &CommentPatch) -> Result<()>;

    /// Delete a comment and strip its id from every other comment's links.
    ///
    /// Returns `false` if the comment did not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the write.
    async fn delete(&self, id: &CommentId) -> Result<bool>;

    /// All comments on a board, in placement order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    async fn list_by_board(&self, board: &BoardId) -> Result<Vec<Comment>>;

    /// Subscribe to snapshots of a board.
    ///
    /// The receiver starts out holding the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial snapshot cannot be read.
    async fn subscribe_by_board(&self, board: &BoardId) -> Result<CommentSubscription>;
}

/// Fan-out of board snapshots to subscribers.
#[derive(Debug, Default)]
pub(crate) struct BoardSubscribers {
    senders: Mutex<HashMap<BoardId, watch::Sender<Vec<Comment>>>>,
}

impl BoardSubscribers {
    /// Register a receiver, seeding a new channel with `snapshot`.
    pub(crate) fn subscribe(
        &self,
        board: &BoardId,
        snapshot: Vec<Comment>,
    ) -> Result<CommentSubscription> {
        let mut senders = self
            .senders
            .lock()
            .map_err(|_| Error::internal("subscriber registry poisoned"))?;
        if let Some(sender) = senders.get(board) {
            if sender.receiver_count() > 0 {
                return Ok(sender.subscribe());
            }
        }
        let (sender, receiver) = watch::channel(snapshot);
        senders.insert(board.clone(), sender);
        Ok(receiver)
    }

    /// Whether anyone is listening to `board`.
    pub(crate) fn is_watched(&self, board: &BoardId) -> bool {
        self.senders
            .lock()
            .map(|senders| senders.contains_key(board))
            .unwrap_or(false)
    }

    /// Push a new snapshot; drops the channel once every receiver is gone.
    pub(crate) fn publish(&self, board: &BoardId, snapshot: Vec<Comment>) {
        let Ok(mut senders) = self.senders.lock() else {
            return;
        };
        let Some(sender) = senders.get(board) else {
            return;
        };
        if sender.receiver_count() == 0 {
            trace!("No subscribers left for board {}", board);
            senders.remove(board);
            return;
        }
        trace!(
            "Publishing {} comments to board {}",
            snapshot.len(),
            board
        );
        sender.send_replace(snapshot);
    }
}
