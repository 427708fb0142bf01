//! Comment link graph.
//!
//! A link is stored only on the comment that initiated it, as an entry in its
//! `links` list. Scoring reads those outgoing lists as they are; drawing
//! treats every stored entry as an undirected edge, so `a -> b` and `b -> a`
//! render as one connection.

use std::collections::{BTreeSet, HashMap};

use crate::comment::{Comment, CommentId};

/// Add an outgoing link from `source` to `target`.
///
/// Returns `false` (and changes nothing) if the link already exists or the
/// ids are equal.
pub fn add_link(source: &mut Comment, target: &CommentId) -> bool {
    if source.id == *target || source.links_to(target) {
        return false;
    }
    source.links.push(target.clone());
    true
}

/// Remove the outgoing link from `source` to `target`, if present.
pub fn remove_link(source: &mut Comment, target: &CommentId) -> bool {
    let before = source.links.len();
    source.links.retain(|id| id != target);
    source.links.len() != before
}

/// Strip `deleted` from every comment's links.
///
/// Returns the ids of the comments that changed.
pub fn remove_references(comments: &mut [Comment], deleted: &CommentId) -> Vec<CommentId> {
    comments
        .iter_mut()
        .filter_map(|comment| remove_link(comment, deleted).then(|| comment.id.clone()))
        .collect()
}

/// An undirected, drawable connection between two existing comments.
///
/// The ids are ordered so that each pair appears once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Edge {
    /// Lower of the two ids.
    pub a: CommentId,
    /// Higher of the two ids.
    pub b: CommentId,
}

impl Edge {
    fn new(x: &CommentId, y: &CommentId) -> Self {
        if x <= y {
            Self {
                a: x.clone(),
                b: y.clone(),
            }
        } else {
            Self {
                a: y.clone(),
                b: x.clone(),
            }
        }
    }

    /// Whether the edge touches the given comment.
    #[must_use]
    pub fn touches(&self, id: &CommentId) -> bool {
        self.a == *id || self.b == *id
    }
}

/// Read-only view of the links between a set of comments.
#[derive(Debug, Clone, Default)]
pub struct LinkGraph {
    outgoing: HashMap<CommentId, Vec<CommentId>>,
}

impl LinkGraph {
    /// Build the graph from comment records.
    ///
    /// Links pointing at comments that are not in the set are dropped, which
    /// covers a target deleted by someone else before the cleanup arrived.
    #[must_use]
    pub fn from_comments(comments: &[Comment]) -> Self {
        let known: BTreeSet<&CommentId> = comments.iter().map(|c| &c.id).collect();
        let outgoing = comments
            .iter()
            .map(|comment| {
                let targets = comment
                    .links
                    .iter()
                    .filter(|target| **target != comment.id && known.contains(target))
                    .cloned()
                    .collect();
                (comment.id.clone(), targets)
            })
            .collect();
        Self { outgoing }
    }

    /// Outgoing links of a comment. Empty for unknown ids.
    #[must_use]
    pub fn outgoing(&self, id: &CommentId) -> &[CommentId] {
        self.outgoing.get(id).map_or(&[], Vec::as_slice)
    }

    /// Whether either comment holds a link to the other.
    #[must_use]
    pub fn has_link(&self, x: &CommentId, y: &CommentId) -> bool {
        self.outgoing(x).contains(y) || self.outgoing(y).contains(x)
    }

    /// Every drawable edge, each unordered pair once, in a stable order.
    #[must_use]
    pub fn edges(&self) -> Vec<Edge> {
        let edges: BTreeSet<Edge> = self
            .outgoing
            .iter()
            .flat_map(|(source, targets)| targets.iter().map(move |target| Edge::new(source, target)))
            .collect();
        edges.into_iter().collect()
    }

    /// Drawable edges touching one comment.
    #[must_use]
    pub fn edges_of(&self, id: &CommentId) -> Vec<Edge> {
        self.edges().into_iter().filter(|edge| edge.touches(id)).collect()
    }
}
