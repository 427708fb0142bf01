//! One participant's live view of one board.
//!
//! [`BoardSession`] owns everything a participant needs: the latest comment
//! snapshot, the derived clusters, link graph and score, the viewport, the
//! drag controller and the presence/activity publishers. It is handed its
//! stores explicitly; nothing in this crate is a process-wide singleton.
//!
//! Local edits are applied to the in-memory snapshot first and then written
//! to the comment store. A failed write is logged and dropped, leaving the
//! optimistic local state in place until the next snapshot arrives.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::cluster::{compute_clusters, Cluster, ClusterIndex};
use crate::comment::{BoardId, Category, Comment, CommentId, CommentPatch, Point, Reaction, Reply};
use crate::config::Config;
use crate::drag::{DragController, DragOutcome, DragTarget};
use crate::error::{Error, Result};
use crate::links::{self, LinkGraph};
use crate::presence::{
    ActivityEvent, ActivityFeed, ActivityKind, ActivityPayload, HeartbeatHandle, Participant,
    PresenceRecord, PresenceTracker,
};
use crate::realtime::RealtimeStore;
use crate::score::{compute_cluster_score, compute_score, Score};
use crate::store::{CommentStore, CommentSubscription};
use crate::viewport::Viewport;

/// Screen radius around a cluster marker's centroid that grabs the cluster.
pub const MARKER_HIT_RADIUS_PX: f64 = 20.0;

/// Screen radius around a comment anchor that grabs the comment.
pub const COMMENT_HIT_RADIUS_PX: f64 = 12.0;

/// A participant's session on a board.
#[derive(Debug)]
pub struct BoardSession {
    store: Arc<dyn CommentStore>,
    board: BoardId,
    participant: Participant,
    subscription: CommentSubscription,
    presence: PresenceTracker,
    activity: ActivityFeed,
    heartbeat: Option<HeartbeatHandle>,

    viewport: Viewport,
    threshold_px: f64,
    clustering_enabled: bool,

    comments: Vec<Comment>,
    clusters: ClusterIndex,
    graph: LinkGraph,
    score: Score,

    drag: DragController,
    pending_link: Option<CommentId>,
}

impl BoardSession {
    /// Open a session and load the current board snapshot.
    ///
    /// Presence is not published until [`join`](Self::join).
    ///
    /// # Errors
    ///
    /// Returns an error if the board subscription cannot be opened.
    pub async fn new(
        store: Arc<dyn CommentStore>,
        realtime: Arc<dyn RealtimeStore>,
        participant: Participant,
        board: BoardId,
        config: &Config,
    ) -> Result<Self> {
        let mut subscription = store.subscribe_by_board(&board).await?;
        let comments = subscription.borrow_and_update().clone();

        let presence = PresenceTracker::new(
            Arc::clone(&realtime),
            board.clone(),
            participant.clone(),
            config.presence.clone(),
        );
        let activity = ActivityFeed::new(
            realtime,
            board.clone(),
            &participant,
            config.activity.clone(),
        );

        let mut session = Self {
            store,
            board,
            participant,
            subscription,
            presence,
            activity,
            heartbeat: None,
            viewport: Viewport::default(),
            threshold_px: config.clustering.threshold_px,
            clustering_enabled: config.clustering.enabled,
            comments: Vec::new(),
            clusters: ClusterIndex::default(),
            graph: LinkGraph::default(),
            score: Score::default(),
            drag: DragController::new(),
            pending_link: None,
        };
        session.apply_snapshot(comments);

        debug!(
            "Opened session for {} on board {} ({} comments)",
            session.participant.id,
            session.board,
            session.comments.len()
        );
        Ok(session)
    }

    // === Presence ===

    /// Announce the participant on the board and start the heartbeat.
    ///
    /// # Errors
    ///
    /// Returns an error if the presence record cannot be published.
    pub async fn join(&mut self) -> Result<()> {
        self.presence.join().await?;
        self.heartbeat = Some(self.presence.start_heartbeat());
        Ok(())
    }

    /// Stop the heartbeat, remove the cursor and mark the participant offline.
    ///
    /// # Errors
    ///
    /// Returns an error if the presence records cannot be written.
    pub async fn leave(&mut self) -> Result<()> {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.stop();
        }
        self.presence.leave().await
    }

    /// Publish the pointer position (screen coordinates) as the cursor.
    pub async fn pointer_moved(&mut self, pointer: Point) {
        let position = self.viewport.to_board(pointer);
        if let Err(e) = self.presence.pointer_moved(position).await {
            warn!("Failed to publish cursor position: {}", e);
        }
    }

    /// Other participants' live cursors.
    ///
    /// # Errors
    ///
    /// Returns an error if the realtime store cannot be read.
    pub async fn active_cursors(&self, now: DateTime<Utc>) -> Result<Vec<PresenceRecord>> {
        self.presence.active_cursors(now).await
    }

    /// Activity events currently on display.
    ///
    /// # Errors
    ///
    /// Returns an error if the realtime store cannot be read.
    pub async fn visible_activity(&self, now: DateTime<Utc>) -> Result<Vec<ActivityEvent>> {
        self.activity.visible(now).await
    }

    /// Delete expired activity events. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the realtime store cannot be read or written.
    pub async fn sweep_activity(&self, now: DateTime<Utc>) -> Result<usize> {
        self.activity.sweep(now).await
    }

    // === Snapshot & derived state ===

    /// Apply the latest store snapshot if it changed since the last call.
    ///
    /// Returns whether anything was applied.
    pub fn refresh(&mut self) -> bool {
        match self.subscription.has_changed() {
            Ok(true) => {}
            Ok(false) => return false,
            Err(_) => {
                debug!("Board {} subscription closed", self.board);
                return false;
            }
        }
        let snapshot = self.subscription.borrow_and_update().clone();
        self.apply_snapshot(snapshot);
        true
    }

    /// Wait for the next store snapshot and apply it.
    ///
    /// Returns `false` once the subscription has closed.
    pub async fn wait_for_change(&mut self) -> bool {
        if self.subscription.changed().await.is_err() {
            debug!("Board {} subscription closed", self.board);
            return false;
        }
        let snapshot = self.subscription.borrow_and_update().clone();
        self.apply_snapshot(snapshot);
        true
    }

    fn apply_snapshot(&mut self, mut comments: Vec<Comment>) {
        self.drag.pin(&mut comments);
        self.comments = comments;
        self.recompute();
    }

    fn recompute(&mut self) {
        self.recluster();
        self.graph = LinkGraph::from_comments(&self.comments);
        self.score = compute_score(&self.comments);
    }

    fn recluster(&mut self) {
        let clusters = if self.clustering_enabled {
            compute_clusters(&self.comments, self.threshold_px, self.viewport.zoom)
        } else {
            Vec::new()
        };
        self.clusters = ClusterIndex::new(clusters);
    }

    // === Viewport & clustering controls ===

    /// Set the zoom, keeping the pan.
    pub fn set_zoom(&mut self, zoom: f64) {
        self.viewport = Viewport::new(zoom, self.viewport.pan);
        self.recluster();
    }

    /// Set the zoom, keeping the board point under `anchor` (screen) fixed.
    pub fn zoom_at(&mut self, zoom: f64, anchor: Point) {
        self.viewport.zoom_around(zoom, anchor);
        self.recluster();
    }

    /// Shift the view by a screen-space delta.
    pub fn pan_by(&mut self, delta: Point) {
        self.viewport.pan_by(delta);
        self.recluster();
    }

    /// Change the on-screen grouping radius.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the threshold is negative or not finite.
    pub fn set_threshold(&mut self, threshold_px: f64) -> Result<()> {
        if !threshold_px.is_finite() || threshold_px < 0.0 {
            return Err(Error::invalid_input(format!(
                "threshold must be finite and non-negative, got {threshold_px}"
            )));
        }
        self.threshold_px = threshold_px;
        self.recluster();
        Ok(())
    }

    /// Turn grouping on or off. Off means every comment is drawn on its own.
    pub fn set_clustering_enabled(&mut self, enabled: bool) {
        self.clustering_enabled = enabled;
        self.recluster();
    }

    // === Comment operations ===

    /// Place a new comment at a board position.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the position is not finite.
    pub async fn place_comment(
        &mut self,
        position: Point,
        category: Category,
        text: impl Into<String>,
    ) -> Result<CommentId> {
        if !position.x.is_finite() || !position.y.is_finite() {
            return Err(Error::invalid_input("comment position must be finite"));
        }

        let mut comment = Comment::new(
            self.board.clone(),
            position,
            category,
            text,
            self.participant.id.clone(),
        );
        comment.guest_origin = self.participant.is_guest;
        let id = comment.id.clone();

        self.comments.push(comment.clone());
        self.recompute();

        let result = self.store.create(&comment).await;
        self.absorb("create comment", result);
        self.emit(
            ActivityKind::CommentAdded,
            ActivityPayload::at(id.clone(), position),
        )
        .await;
        self.refresh();

        info!("Placed comment {} on board {}", id, self.board);
        Ok(id)
    }

    /// Replace a comment's text.
    ///
    /// # Errors
    ///
    /// Does not fail today; the `Result` is kept for parity with the other
    /// operations.
    pub async fn edit_text(&mut self, id: &CommentId, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        let Some(position) = self.modify_local(id, |comment| comment.text.clone_from(&text))
        else {
            return Ok(());
        };
        self.write(id, CommentPatch::text(text)).await;
        self.emit(ActivityKind::CommentEdited, ActivityPayload::at(id.clone(), position))
            .await;
        self.refresh();
        Ok(())
    }

    /// Change a comment's category.
    ///
    /// # Errors
    ///
    /// Does not fail today; the `Result` is kept for parity with the other
    /// operations.
    pub async fn set_category(&mut self, id: &CommentId, category: Category) -> Result<()> {
        let Some(position) =
            self.modify_local(id, |comment| comment.category = category.clone())
        else {
            return Ok(());
        };
        self.write(id, CommentPatch::category(category)).await;
        self.emit(ActivityKind::CommentEdited, ActivityPayload::at(id.clone(), position))
            .await;
        self.refresh();
        Ok(())
    }

    /// Agree or disagree with a comment.
    ///
    /// # Errors
    ///
    /// Does not fail today; the `Result` is kept for parity with the other
    /// operations.
    pub async fn react(&mut self, id: &CommentId, reaction: Reaction) -> Result<()> {
        let mut reactions = None;
        self.modify_local(id, |comment| {
            comment.reactions = comment.reactions.with(reaction);
            reactions = Some(comment.reactions);
        });
        let Some(reactions) = reactions else {
            return Ok(());
        };
        self.write(id, CommentPatch::reactions(reactions)).await;
        self.refresh();
        Ok(())
    }

    /// Append a reply under a comment.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the text is empty.
    pub async fn reply(&mut self, id: &CommentId, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::invalid_input("reply text cannot be empty"));
        }

        let reply = Reply::new(self.participant.display_name.clone(), text);
        let Some(position) = self.modify_local(id, |comment| comment.replies.push(reply.clone()))
        else {
            return Ok(());
        };
        self.write(id, CommentPatch::append_reply(reply)).await;
        self.emit(ActivityKind::CommentEdited, ActivityPayload::at(id.clone(), position))
            .await;
        self.refresh();
        Ok(())
    }

    /// Delete a comment and every link pointing at it.
    ///
    /// Returns `false` if the comment was not on the board.
    ///
    /// # Errors
    ///
    /// Does not fail today; the `Result` is kept for parity with the other
    /// operations.
    pub async fn delete_comment(&mut self, id: &CommentId) -> Result<bool> {
        let Some(index) = self.comments.iter().position(|c| c.id == *id) else {
            debug!("Ignoring delete of unknown comment {}", id);
            return Ok(false);
        };
        let removed = self.comments.remove(index);
        links::remove_references(&mut self.comments, id);
        if self.pending_link.as_ref() == Some(id) {
            self.pending_link = None;
        }
        self.recompute();

        let result = self.store.delete(id).await;
        self.absorb("delete comment", result);
        self.emit(
            ActivityKind::CommentDeleted,
            ActivityPayload::at(id.clone(), removed.position),
        )
        .await;
        self.refresh();
        Ok(true)
    }

    // === Links ===

    /// Start drawing a link from `source`.
    ///
    /// # Errors
    ///
    /// Does not fail today; the `Result` is kept for parity with the other
    /// operations.
    pub async fn begin_link(&mut self, source: &CommentId) -> Result<()> {
        let Some(position) = self.position_of(source) else {
            debug!("Ignoring link from unknown comment {}", source);
            return Ok(());
        };
        self.pending_link = Some(source.clone());
        self.emit(
            ActivityKind::LinkStarted,
            ActivityPayload::at(source.clone(), position),
        )
        .await;
        Ok(())
    }

    /// Finish the link started by [`begin_link`](Self::begin_link).
    ///
    /// Returns whether a new link was stored.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `target` is the link's own source.
    pub async fn complete_link(&mut self, target: &CommentId) -> Result<bool> {
        let Some(source) = self.pending_link.take() else {
            return Ok(false);
        };
        if source == *target {
            return Err(Error::invalid_input("a comment cannot link to itself"));
        }
        let added = self.add_link(&source, target).await?;
        if added {
            if let (Some(from), Some(to)) = (self.position_of(&source), self.position_of(target)) {
                self.emit(
                    ActivityKind::LinkCompleted,
                    ActivityPayload::at(source, from).with_target(to),
                )
                .await;
            }
        }
        Ok(added)
    }

    /// Abandon a link in progress.
    pub fn cancel_link(&mut self) {
        self.pending_link = None;
    }

    /// The source of the link being drawn, if any.
    #[must_use]
    pub fn pending_link(&self) -> Option<&CommentId> {
        self.pending_link.as_ref()
    }

    /// Store a link from `source` to `target`.
    ///
    /// Returns `false` if the link already existed or either comment is
    /// unknown.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the ids are equal.
    pub async fn add_link(&mut self, source: &CommentId, target: &CommentId) -> Result<bool> {
        if source == target {
            return Err(Error::invalid_input("a comment cannot link to itself"));
        }
        if self.position_of(target).is_none() {
            debug!("Ignoring link to unknown comment {}", target);
            return Ok(false);
        }
        let mut added = false;
        self.modify_local(source, |comment| added = links::add_link(comment, target));
        if !added {
            return Ok(false);
        }
        self.write(source, CommentPatch::append_link(target.clone())).await;
        self.refresh();
        Ok(true)
    }

    /// Drop the link from `source` to `target`.
    ///
    /// Returns whether a link was removed.
    ///
    /// # Errors
    ///
    /// Does not fail today; the `Result` is kept for parity with the other
    /// operations.
    pub async fn remove_link(&mut self, source: &CommentId, target: &CommentId) -> Result<bool> {
        let mut removed = false;
        self.modify_local(source, |comment| removed = links::remove_link(comment, target));
        if !removed {
            return Ok(false);
        }
        self.write(source, CommentPatch::remove_link(target.clone())).await;
        self.refresh();
        Ok(true)
    }

    // === Dragging ===

    /// Grab whatever is under `pointer` (screen coordinates): a cluster
    /// marker first, then an individually drawn comment.
    ///
    /// Returns what was grabbed, if anything.
    pub fn begin_drag_at(&mut self, pointer: Point) -> Option<DragTarget> {
        let viewport = self.viewport;
        let cluster_hit = self
            .clusters
            .groups()
            .map(|cluster| (viewport.to_screen(cluster.centroid).distance(pointer), cluster))
            .filter(|(distance, _)| *distance <= MARKER_HIT_RADIUS_PX)
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, cluster)| cluster.id.clone());
        if let Some(cluster_id) = cluster_hit {
            return self
                .begin_cluster_drag(&cluster_id, pointer)
                .then(|| self.drag.target().cloned())
                .flatten();
        }

        let comment_hit = self
            .comments
            .iter()
            .filter(|comment| {
                self.clusters
                    .cluster_of(&comment.id)
                    .map_or(true, |cluster| !cluster.is_group())
            })
            .map(|comment| (viewport.to_screen(comment.position).distance(pointer), comment))
            .filter(|(distance, _)| *distance <= COMMENT_HIT_RADIUS_PX)
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, comment)| comment.id.clone())?;
        self.begin_comment_drag(&comment_hit, pointer)
            .then(|| self.drag.target().cloned())
            .flatten()
    }

    /// Start dragging one comment. Returns `false` if it is not on the board.
    pub fn begin_comment_drag(&mut self, id: &CommentId, pointer: Point) -> bool {
        let Some(comment) = self.comments.iter().find(|c| c.id == *id) else {
            return false;
        };
        self.drag.begin_comment(comment, pointer, &self.viewport);
        true
    }

    /// Start dragging a cluster by id. Returns `false` if there is no such
    /// cluster.
    pub fn begin_cluster_drag(&mut self, cluster_id: &str, pointer: Point) -> bool {
        let Some(cluster) = self.clusters.get(cluster_id) else {
            return false;
        };
        self.drag
            .begin_cluster(cluster, &self.comments, pointer, &self.viewport)
    }

    /// Move the active drag to `pointer` (screen coordinates).
    ///
    /// A single comment is written to the store on every move; cluster
    /// members are written when the drag ends.
    pub async fn drag_to(&mut self, pointer: Point) {
        let moved = self.drag.drag_to(pointer, &self.viewport, &mut self.comments);
        if moved.is_empty() {
            return;
        }
        self.recompute();

        if matches!(self.drag.target(), Some(DragTarget::Comment(_))) {
            for (id, position) in moved {
                self.write(&id, CommentPatch::position(position)).await;
            }
        }
        self.pointer_moved(pointer).await;
        self.refresh();
    }

    /// Finish the active drag and persist the final positions.
    pub async fn end_drag(&mut self) -> Option<DragOutcome> {
        let outcome = self.drag.end()?;
        for (id, position) in &outcome.positions {
            self.write(id, CommentPatch::position(*position)).await;
        }
        self.refresh();
        Some(outcome)
    }

    // === Accessors ===

    /// The board this session is on.
    #[must_use]
    pub fn board(&self) -> &BoardId {
        &self.board
    }

    /// The local participant.
    #[must_use]
    pub fn participant(&self) -> &Participant {
        &self.participant
    }

    /// Current comments, in placement order.
    #[must_use]
    pub fn comments(&self) -> &[Comment] {
        &self.comments
    }

    /// One comment by id.
    #[must_use]
    pub fn comment(&self, id: &CommentId) -> Option<&Comment> {
        self.comments.iter().find(|c| c.id == *id)
    }

    /// Current clusters. Empty while clustering is disabled.
    #[must_use]
    pub fn clusters(&self) -> &[Cluster] {
        self.clusters.clusters()
    }

    /// Lookup from comment id to cluster.
    #[must_use]
    pub fn cluster_index(&self) -> &ClusterIndex {
        &self.clusters
    }

    /// Score of the whole board.
    #[must_use]
    pub fn score(&self) -> Score {
        self.score
    }

    /// Score of the members of one cluster.
    #[must_use]
    pub fn cluster_score(&self, cluster_id: &str) -> Option<Score> {
        self.clusters
            .get(cluster_id)
            .map(|cluster| compute_cluster_score(&self.comments, cluster))
    }

    /// Links between the current comments.
    #[must_use]
    pub fn link_graph(&self) -> &LinkGraph {
        &self.graph
    }

    /// The current viewport.
    #[must_use]
    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    /// The current grouping threshold in screen pixels.
    #[must_use]
    pub fn threshold_px(&self) -> f64 {
        self.threshold_px
    }

    /// Whether a drag is in progress.
    #[must_use]
    pub fn is_dragging(&self) -> bool {
        self.drag.is_active()
    }

    // === Internals ===

    fn position_of(&self, id: &CommentId) -> Option<Point> {
        self.comment(id).map(|c| c.position)
    }

    /// Apply `change` to the local copy of `id` and recompute derived state.
    ///
    /// Returns the comment's position, or `None` if it is not on the board.
    fn modify_local<F>(&mut self, id: &CommentId, change: F) -> Option<Point>
    where
        F: FnOnce(&mut Comment),
    {
        let Some(comment) = self.comments.iter_mut().find(|c| c.id == *id) else {
            debug!("Ignoring change to unknown comment {}", id);
            return None;
        };
        change(comment);
        let position = comment.position;
        self.recompute();
        Some(position)
    }

    async fn write(&self, id: &CommentId, patch: CommentPatch) {
        let result = self.store.update(id, &patch).await;
        self.absorb("update comment", result);
    }

    fn absorb<T>(&self, operation: &str, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) if e.is_not_found() => {
                debug!("Skipped {} on board {}: {}", operation, self.board, e);
                None
            }
            Err(e) => {
                warn!("Failed to {} on board {}: {}", operation, self.board, e);
                None
            }
        }
    }

    /// Publish an activity event, then sweep expired ones.
    async fn emit(&self, kind: ActivityKind, payload: ActivityPayload) {
        let event = match self.activity.publish(kind, payload).await {
            Ok(event) => event,
            Err(e) => {
                warn!("Failed to publish {:?} activity: {}", kind, e);
                return;
            }
        };
        if let Err(e) = self.activity.sweep(event.timestamp).await {
            warn!("Failed to sweep activity on board {}: {}", self.board, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ActivityConfig;
    use crate::realtime::{activity_prefix, MemoryRealtimeStore};
    use crate::store::SqliteCommentStore;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Fixture {
        store: Arc<SqliteCommentStore>,
        realtime: Arc<MemoryRealtimeStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: Arc::new(SqliteCommentStore::open_in_memory().unwrap()),
                realtime: Arc::new(MemoryRealtimeStore::new()),
            }
        }

        async fn session(&self, user: &str) -> BoardSession {
            BoardSession::new(
                Arc::clone(&self.store) as Arc<dyn CommentStore>,
                Arc::clone(&self.realtime) as Arc<dyn RealtimeStore>,
                Participant::new(user, user.to_uppercase()),
                BoardId::parse("board-1").unwrap(),
                &Config::default(),
            )
            .await
            .unwrap()
        }
    }

    /// Store whose writes always fail.
    #[derive(Debug)]
    struct OfflineStore {
        inner: SqliteCommentStore,
        attempted: AtomicBool,
    }

    #[async_trait::async_trait]
    impl CommentStore for OfflineStore {
        async fn create(&self, _comment: &Comment) -> Result<CommentId> {
            self.attempted.store(true, Ordering::SeqCst);
            Err(Error::store_unavailable("offline"))
        }
        async fn read(&self, _id: &CommentId) -> Result<Option<Comment>> {
            Err(Error::store_unavailable("offline"))
        }
        async fn update(&self, _id: &CommentId, _patch: &CommentPatch) -> Result<()> {
            self.attempted.store(true, Ordering::SeqCst);
            Err(Error::store_unavailable("offline"))
        }
        async fn delete(&self, _id: &CommentId) -> Result<bool> {
            Err(Error::store_unavailable("offline"))
        }
        async fn list_by_board(&self, _board: &BoardId) -> Result<Vec<Comment>> {
            Ok(Vec::new())
        }
        async fn subscribe_by_board(&self, board: &BoardId) -> Result<CommentSubscription> {
            self.inner.subscribe_by_board(board).await
        }
    }

    #[tokio::test]
    async fn test_place_comment_updates_derived_state() {
        let fixture = Fixture::new();
        let mut session = fixture.session("ana").await;

        let id = session
            .place_comment(Point::new(10.0, 10.0), Category::Technical, "Too slow")
            .await
            .unwrap();

        assert_eq!(session.comments().len(), 1);
        assert_eq!(session.comment(&id).unwrap().author_id, "ana");
        assert_eq!(session.score().total, 1);
        assert_eq!(session.clusters().len(), 1);
        assert!(fixture.store.read(&id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_guest_comments_are_marked() {
        let fixture = Fixture::new();
        let mut session = BoardSession::new(
            Arc::clone(&fixture.store) as Arc<dyn CommentStore>,
            Arc::clone(&fixture.realtime) as Arc<dyn RealtimeStore>,
            Participant::guest("guest-1", "Guest"),
            BoardId::parse("board-1").unwrap(),
            &Config::default(),
        )
        .await
        .unwrap();

        let id = session
            .place_comment(Point::default(), Category::Details, "hi")
            .await
            .unwrap();
        assert!(fixture.store.read(&id).await.unwrap().unwrap().guest_origin);
    }

    #[tokio::test]
    async fn test_zoom_and_threshold_recluster() {
        let fixture = Fixture::new();
        let mut session = fixture.session("ana").await;
        session
            .place_comment(Point::new(0.0, 0.0), Category::Technical, "a")
            .await
            .unwrap();
        session
            .place_comment(Point::new(20.0, 0.0), Category::Technical, "b")
            .await
            .unwrap();
        assert_eq!(session.cluster_index().groups().count(), 1);

        session.set_zoom(2.0);
        assert_eq!(session.cluster_index().groups().count(), 0);

        session.set_threshold(50.0).unwrap();
        assert_eq!(session.cluster_index().groups().count(), 1);

        session.set_clustering_enabled(false);
        assert!(session.clusters().is_empty());

        assert!(session.set_threshold(-1.0).unwrap_err().is_invalid_input());
        assert!(session.set_threshold(f64::NAN).is_err());
    }

    #[tokio::test]
    async fn test_reply_rejects_empty_text() {
        let fixture = Fixture::new();
        let mut session = fixture.session("ana").await;
        let id = session
            .place_comment(Point::default(), Category::Details, "x")
            .await
            .unwrap();

        assert!(session.reply(&id, "   ").await.unwrap_err().is_invalid_input());
        session.reply(&id, "Agreed").await.unwrap();

        let stored = fixture.store.read(&id).await.unwrap().unwrap();
        assert_eq!(stored.replies.len(), 1);
        assert_eq!(stored.replies[0].author, "ANA");
    }

    #[tokio::test]
    async fn test_self_link_is_invalid() {
        let fixture = Fixture::new();
        let mut session = fixture.session("ana").await;
        let id = session
            .place_comment(Point::default(), Category::Details, "x")
            .await
            .unwrap();

        session.begin_link(&id).await.unwrap();
        assert!(session.complete_link(&id).await.unwrap_err().is_invalid_input());
        assert!(session.pending_link().is_none());
        assert!(session.add_link(&id, &id).await.is_err());
    }

    #[tokio::test]
    async fn test_link_flow_scores_and_emits_activity() {
        let fixture = Fixture::new();
        let mut session = fixture.session("ana").await;
        let a = session
            .place_comment(Point::new(0.0, 0.0), Category::Technical, "a")
            .await
            .unwrap();
        let b = session
            .place_comment(Point::new(5.0, 5.0), Category::Technical, "b")
            .await
            .unwrap();

        session.begin_link(&a).await.unwrap();
        assert!(session.complete_link(&b).await.unwrap());
        assert!(!session.add_link(&a, &b).await.unwrap());

        assert!(session.link_graph().has_link(&a, &b));
        assert_eq!(session.score().total, 3);

        let kinds: Vec<ActivityKind> = session
            .visible_activity(Utc::now())
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.kind)
            .collect();
        assert!(kinds.contains(&ActivityKind::LinkStarted));
        assert!(kinds.contains(&ActivityKind::LinkCompleted));

        assert!(session.remove_link(&a, &b).await.unwrap());
        assert_eq!(session.score().total, 2);
    }

    #[tokio::test]
    async fn test_delete_cleans_links_everywhere() {
        let fixture = Fixture::new();
        let mut session = fixture.session("ana").await;
        let a = session
            .place_comment(Point::new(0.0, 0.0), Category::Technical, "a")
            .await
            .unwrap();
        let b = session
            .place_comment(Point::new(100.0, 0.0), Category::Conceptual, "b")
            .await
            .unwrap();
        session.add_link(&a, &b).await.unwrap();

        assert!(session.delete_comment(&b).await.unwrap());
        assert!(!session.delete_comment(&b).await.unwrap());

        assert!(session.comment(&a).unwrap().links.is_empty());
        assert!(fixture.store.read(&a).await.unwrap().unwrap().links.is_empty());
        assert!(session.link_graph().edges().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_ids_are_silent_noops() {
        let fixture = Fixture::new();
        let mut session = fixture.session("ana").await;
        let ghost = CommentId::from("ghost");

        session.edit_text(&ghost, "x").await.unwrap();
        session.react(&ghost, Reaction::Agree).await.unwrap();
        session.begin_link(&ghost).await.unwrap();
        assert!(session.pending_link().is_none());
        assert!(session.comments().is_empty());
    }

    #[tokio::test]
    async fn test_store_failures_keep_local_state() {
        let store = Arc::new(OfflineStore {
            inner: SqliteCommentStore::open_in_memory().unwrap(),
            attempted: AtomicBool::new(false),
        });
        let mut session = BoardSession::new(
            Arc::clone(&store) as Arc<dyn CommentStore>,
            Arc::new(MemoryRealtimeStore::new()) as Arc<dyn RealtimeStore>,
            Participant::new("ana", "Ana"),
            BoardId::parse("board-1").unwrap(),
            &Config::default(),
        )
        .await
        .unwrap();

        let id = session
            .place_comment(Point::default(), Category::Technical, "offline")
            .await
            .unwrap();
        session.edit_text(&id, "still offline").await.unwrap();

        assert!(store.attempted.load(Ordering::SeqCst));
        assert_eq!(session.comment(&id).unwrap().text, "still offline");
    }

    #[tokio::test]
    async fn test_begin_drag_at_prefers_cluster_marker() {
        let fixture = Fixture::new();
        let mut session = fixture.session("ana").await;
        session
            .place_comment(Point::new(100.0, 100.0), Category::Technical, "a")
            .await
            .unwrap();
        session
            .place_comment(Point::new(110.0, 100.0), Category::Technical, "b")
            .await
            .unwrap();
        let lone = session
            .place_comment(Point::new(300.0, 300.0), Category::Details, "c")
            .await
            .unwrap();

        let grabbed = session.begin_drag_at(Point::new(105.0, 100.0)).unwrap();
        assert!(matches!(grabbed, DragTarget::Cluster { ref members, .. } if members.len() == 2));
        session.end_drag().await;

        let grabbed = session.begin_drag_at(Point::new(302.0, 301.0)).unwrap();
        assert_eq!(grabbed, DragTarget::Comment(lone));
        session.end_drag().await;

        assert!(session.begin_drag_at(Point::new(-500.0, -500.0)).is_none());
    }

    #[tokio::test]
    async fn test_comment_drag_persists_each_move() {
        let fixture = Fixture::new();
        let mut session = fixture.session("ana").await;
        let id = session
            .place_comment(Point::new(10.0, 10.0), Category::Technical, "a")
            .await
            .unwrap();

        assert!(session.begin_comment_drag(&id, Point::new(10.0, 10.0)));
        session.drag_to(Point::new(40.0, 25.0)).await;

        let stored = fixture.store.read(&id).await.unwrap().unwrap();
        assert_eq!(stored.position, Point::new(40.0, 25.0));
        assert!(session.end_drag().await.is_some());
        assert!(!session.is_dragging());
    }

    #[tokio::test]
    async fn test_cluster_drag_persists_on_end() {
        let fixture = Fixture::new();
        let mut session = fixture.session("ana").await;
        let a = session
            .place_comment(Point::new(0.0, 0.0), Category::Technical, "a")
            .await
            .unwrap();
        let b = session
            .place_comment(Point::new(10.0, 0.0), Category::Technical, "b")
            .await
            .unwrap();
        let cluster_id = session.cluster_index().cluster_of(&a).unwrap().id.clone();

        assert!(session.begin_cluster_drag(&cluster_id, Point::new(5.0, 0.0)));
        session.drag_to(Point::new(55.0, 20.0)).await;
        assert_eq!(
            fixture.store.read(&a).await.unwrap().unwrap().position,
            Point::new(0.0, 0.0)
        );

        session.end_drag().await.unwrap();
        assert_eq!(
            fixture.store.read(&a).await.unwrap().unwrap().position,
            Point::new(50.0, 20.0)
        );
        assert_eq!(
            fixture.store.read(&b).await.unwrap().unwrap().position,
            Point::new(60.0, 20.0)
        );
    }

    #[tokio::test]
    async fn test_wait_for_change_applies_remote_snapshot() {
        let fixture = Fixture::new();
        let mut ana = fixture.session("ana").await;
        let mut ben = fixture.session("ben").await;

        let id = ana
            .place_comment(Point::new(3.0, 4.0), Category::Details, "remote")
            .await
            .unwrap();

        let wait = ben.wait_for_change();
        let applied = tokio::time::timeout(std::time::Duration::from_secs(1), wait)
            .await
            .unwrap();
        assert!(applied);
        assert_eq!(ben.comment(&id).unwrap().text, "remote");
        assert_eq!(ben.score().total, 1);
    }

    #[tokio::test]
    async fn test_emitting_activity_sweeps_expired_events() {
        let fixture = Fixture::new();
        let mut session = fixture.session("ana").await;
        let board = BoardId::parse("board-1").unwrap();
        let stale = ActivityFeed::new(
            Arc::clone(&fixture.realtime) as Arc<dyn RealtimeStore>,
            board.clone(),
            &Participant::new("ben", "Ben"),
            ActivityConfig::default(),
        );
        stale
            .publish_at(
                ActivityKind::CommentAdded,
                ActivityPayload::at(CommentId::from("old"), Point::default()),
                Utc::now() - chrono::Duration::minutes(1),
            )
            .await
            .unwrap();

        session
            .place_comment(Point::default(), Category::Technical, "fresh")
            .await
            .unwrap();

        let remaining = fixture
            .realtime
            .snapshot(&activity_prefix(&board))
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        let events = session.visible_activity(Utc::now()).await.unwrap();
        assert_eq!(events[0].actor.user_id, "ana");
    }

    #[tokio::test]
    async fn test_join_and_leave_presence() {
        let fixture = Fixture::new();
        let mut ana = fixture.session("ana").await;
        let mut ben = fixture.session("ben").await;
        ana.join().await.unwrap();
        ben.join().await.unwrap();
        ben.pointer_moved(Point::new(30.0, 40.0)).await;

        let cursors = ana.active_cursors(Utc::now()).await.unwrap();
        assert_eq!(cursors.len(), 1);
        assert_eq!(cursors[0].position, Point::new(30.0, 40.0));

        ben.leave().await.unwrap();
        assert!(ana.active_cursors(Utc::now()).await.unwrap().is_empty());
        ana.leave().await.unwrap();
    }
}
