//! Drag/transform controller.
//!
//! Pointer positions arrive in screen coordinates and are mapped onto the
//! board through the current [`Viewport`]. A single comment keeps the
//! pointer-to-anchor offset it was grabbed with. A cluster keeps the
//! pointer-to-centroid offset, and each move recomputes the centroid from the
//! members' current positions before shifting every member by the same
//! displacement, so relative layout inside the cluster never changes.

use std::collections::HashMap;

use tracing::trace;

use crate::cluster::Cluster;
use crate::comment::{Comment, CommentId, Point};
use crate::viewport::Viewport;

/// What is being dragged.
#[derive(Debug, Clone, PartialEq)]
pub enum DragTarget {
    /// One comment.
    Comment(CommentId),
    /// Every member of a cluster, captured when the drag started.
    Cluster {
        /// Id of the cluster as it was at drag start.
        cluster_id: String,
        /// Members at drag start.
        members: Vec<CommentId>,
    },
}

/// Final positions produced by a drag.
#[derive(Debug, Clone, PartialEq)]
pub struct DragOutcome {
    /// What was dragged.
    pub target: DragTarget,
    /// Last local position of every moved comment.
    pub positions: Vec<(CommentId, Point)>,
}

#[derive(Debug, Clone)]
struct ActiveDrag {
    target: DragTarget,
    /// Screen offset for a comment, board offset for a cluster.
    offset: Point,
    positions: HashMap<CommentId, Point>,
}

/// Tracks at most one drag at a time.
#[derive(Debug, Clone, Default)]
pub struct DragController {
    active: Option<ActiveDrag>,
}

impl DragController {
    /// Create an idle controller.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a drag is in progress.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// The current drag target, if any.
    #[must_use]
    pub fn target(&self) -> Option<&DragTarget> {
        self.active.as_ref().map(|drag| &drag.target)
    }

    /// Whether `id` is one of the comments being dragged.
    #[must_use]
    pub fn is_dragging(&self, id: &CommentId) -> bool {
        match self.target() {
            Some(DragTarget::Comment(dragged)) => dragged == id,
            Some(DragTarget::Cluster { members, .. }) => members.contains(id),
            None => false,
        }
    }

    /// Start dragging one comment grabbed at `pointer` (screen coordinates).
    ///
    /// Replaces any drag already in progress.
    pub fn begin_comment(&mut self, comment: &Comment, pointer: Point, viewport: &Viewport) {
        let offset = pointer - viewport.to_screen(comment.position);
        trace!("Begin comment drag {} (offset {:?})", comment.id, offset);
        self.active = Some(ActiveDrag {
            target: DragTarget::Comment(comment.id.clone()),
            offset,
            positions: HashMap::from([(comment.id.clone(), comment.position)]),
        });
    }

    /// Start dragging a cluster grabbed at `pointer` (screen coordinates).
    ///
    /// Returns `false` if none of the cluster's members are in `comments`.
    pub fn begin_cluster(
        &mut self,
        cluster: &Cluster,
        comments: &[Comment],
        pointer: Point,
        viewport: &Viewport,
    ) -> bool {
        let positions: HashMap<CommentId, Point> = comments
            .iter()
            .filter(|comment| cluster.contains(&comment.id))
            .map(|comment| (comment.id.clone(), comment.position))
            .collect();
        let Some(centroid) = Point::mean(positions.values().copied()) else {
            return false;
        };

        let offset = viewport.to_board(pointer) - centroid;
        trace!("Begin cluster drag {} (offset {:?})", cluster.id, offset);
        self.active = Some(ActiveDrag {
            target: DragTarget::Cluster {
                cluster_id: cluster.id.clone(),
                members: cluster.members.clone(),
            },
            offset,
            positions,
        });
        true
    }

    /// Move the drag to `pointer` (screen coordinates).
    ///
    /// Updates the dragged comments in `comments` in place and returns their
    /// new positions. Does nothing when no drag is active.
    pub fn drag_to(
        &mut self,
        pointer: Point,
        viewport: &Viewport,
        comments: &mut [Comment],
    ) -> Vec<(CommentId, Point)> {
        let Some(drag) = self.active.as_mut() else {
            return Vec::new();
        };

        let moved = match &drag.target {
            DragTarget::Comment(id) => {
                let position = viewport.to_board(pointer - drag.offset);
                comments
                    .iter_mut()
                    .filter(|comment| comment.id == *id)
                    .map(|comment| {
                        comment.position = position;
                        (comment.id.clone(), position)
                    })
                    .collect()
            }
            DragTarget::Cluster { members, .. } => {
                let Some(centroid) = Point::mean(
                    comments
                        .iter()
                        .filter(|comment| members.contains(&comment.id))
                        .map(|comment| comment.position),
                ) else {
                    return Vec::new();
                };
                let displacement = viewport.to_board(pointer) - drag.offset - centroid;
                comments
                    .iter_mut()
                    .filter(|comment| members.contains(&comment.id))
                    .map(|comment| {
                        comment.position += displacement;
                        (comment.id.clone(), comment.position)
                    })
                    .collect::<Vec<_>>()
            }
        };

        for (id, position) in &moved {
            drag.positions.insert(id.clone(), *position);
        }
        moved
    }

    /// Overwrite dragged comments in a fresh snapshot with their local
    /// positions, so a remote update cannot yank them out from under the
    /// pointer.
    pub fn pin(&self, comments: &mut [Comment]) {
        let Some(drag) = &self.active else {
            return;
        };
        for comment in comments.iter_mut() {
            if let Some(position) = drag.positions.get(&comment.id) {
                comment.position = *position;
            }
        }
    }

    /// Finish the drag and hand back the positions to persist.
    pub fn end(&mut self) -> Option<DragOutcome> {
        let drag = self.active.take()?;
        let mut positions: Vec<(CommentId, Point)> = drag.positions.into_iter().collect();
        positions.sort_by(|a, b| a.0.cmp(&b.0));
        Some(DragOutcome {
            target: drag.target,
            positions,
        })
    }

    /// Abandon the drag without producing an outcome.
    pub fn cancel(&mut self) {
        self.active = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::compute_clusters;
    use crate::comment::{BoardId, Category};

    fn comment(id: &str, x: f64, y: f64) -> Comment {
        Comment::new(
            BoardId::parse("b").unwrap(),
            Point::new(x, y),
            Category::Technical,
            "",
            "u",
        )
        .with_id(id)
    }

    fn assert_close(actual: Point, expected: Point) {
        assert!(
            actual.distance(expected) < 1e-9,
            "expected {expected:?}, got {actual:?}"
        );
    }

    #[test]
    fn test_comment_drag_keeps_grab_offset() {
        let viewport = Viewport::new(2.0, Point::new(10.0, 10.0));
        let mut comments = vec![comment("a", 5.0, 5.0)];
        let mut drag = DragController::new();

        // Anchor is at screen (20, 20); grab it 3px to the right.
        drag.begin_comment(&comments[0], Point::new(23.0, 20.0), &viewport);
        let moved = drag.drag_to(Point::new(43.0, 40.0), &viewport, &mut comments);

        assert_eq!(moved.len(), 1);
        assert_close(comments[0].position, Point::new(15.0, 15.0));
        assert_close(viewport.to_screen(comments[0].position), Point::new(40.0, 40.0));
    }

    #[test]
    fn test_cluster_drag_exact_displacement() {
        let viewport = Viewport::default();
        let mut comments = vec![
            comment("a", 0.0, 0.0),
            comment("b", 10.0, 0.0),
            comment("c", 0.0, 10.0),
        ];
        let clusters = compute_clusters(&comments, 30.0, 1.0);
        assert_eq!(clusters.len(), 1);
        let before: Vec<Point> = comments.iter().map(|c| c.position).collect();

        let mut drag = DragController::new();
        let start = Point::new(7.0, 2.0);
        assert!(drag.begin_cluster(&clusters[0], &comments, start, &viewport));

        let steps = [(3.0, 1.0), (-1.5, 4.0), (12.25, -2.0), (0.5, 0.5)];
        let mut pointer = start;
        for (dx, dy) in steps {
            pointer += Point::new(dx, dy);
            drag.drag_to(pointer, &viewport, &mut comments);
        }

        let total = pointer - start;
        for (comment, original) in comments.iter().zip(before) {
            assert_close(comment.position, original + total);
        }

        let outcome = drag.end().unwrap();
        assert_eq!(outcome.positions.len(), 3);
        assert!(!drag.is_active());
    }

    #[test]
    fn test_cluster_drag_scales_with_zoom() {
        let viewport = Viewport::new(2.0, Point::default());
        let mut comments = vec![comment("a", 0.0, 0.0), comment("b", 4.0, 0.0)];
        let clusters = compute_clusters(&comments, 30.0, 2.0);

        let mut drag = DragController::new();
        drag.begin_cluster(&clusters[0], &comments, Point::new(4.0, 0.0), &viewport);
        drag.drag_to(Point::new(24.0, 10.0), &viewport, &mut comments);

        assert_close(comments[0].position, Point::new(10.0, 5.0));
        assert_close(comments[1].position, Point::new(14.0, 5.0));
    }

    #[test]
    fn test_cluster_drag_follows_remote_moves() {
        let viewport = Viewport::default();
        let mut comments = vec![comment("a", 0.0, 0.0), comment("b", 10.0, 0.0)];
        let clusters = compute_clusters(&comments, 30.0, 1.0);

        let mut drag = DragController::new();
        drag.begin_cluster(&clusters[0], &comments, Point::new(5.0, 0.0), &viewport);

        // Someone else nudged b; the centroid is recomputed from it.
        comments[1].position = Point::new(20.0, 0.0);
        drag.drag_to(Point::new(5.0, 0.0), &viewport, &mut comments);

        assert_close(comments[0].position, Point::new(-5.0, 0.0));
        assert_close(comments[1].position, Point::new(15.0, 0.0));
    }

    #[test]
    fn test_pin_overrides_snapshot_positions() {
        let viewport = Viewport::default();
        let mut comments = vec![comment("a", 0.0, 0.0), comment("z", 50.0, 50.0)];
        let mut drag = DragController::new();
        drag.begin_comment(&comments[0], Point::default(), &viewport);
        drag.drag_to(Point::new(8.0, 8.0), &viewport, &mut comments);

        let mut snapshot = vec![comment("a", 1.0, 1.0), comment("z", 60.0, 60.0)];
        drag.pin(&mut snapshot);

        assert_close(snapshot[0].position, Point::new(8.0, 8.0));
        assert_close(snapshot[1].position, Point::new(60.0, 60.0));
        assert!(drag.is_dragging(&CommentId::from("a")));
        assert!(!drag.is_dragging(&CommentId::from("z")));
    }

    #[test]
    fn test_idle_controller_is_inert() {
        let mut drag = DragController::new();
        let mut comments = vec![comment("a", 0.0, 0.0)];
        assert!(drag
            .drag_to(Point::new(1.0, 1.0), &Viewport::default(), &mut comments)
            .is_empty());
        assert!(drag.end().is_none());
        assert_eq!(comments[0].position, Point::default());
    }

    #[test]
    fn test_begin_cluster_without_members() {
        let mut drag = DragController::new();
        let cluster = Cluster {
            id: "cluster-x".to_string(),
            members: vec![CommentId::from("x")],
            centroid: Point::default(),
        };
        assert!(!drag.begin_cluster(&cluster, &[], Point::default(), &Viewport::default()));
        assert!(!drag.is_active());
    }
}
