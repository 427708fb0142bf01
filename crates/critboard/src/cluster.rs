//! Proximity clustering of comments.
//!
//! Every participant computes clusters locally from the shared comment set,
//! so [`compute_clusters`] is a pure function: the same comments, threshold
//! and zoom always give the same partition, in the same order, with the same
//! ids. Nothing here is ever sent over the network.
//!
//! Grouping is seed based. Comments are visited in order; the first
//! unassigned one becomes a seed and absorbs every other unassigned comment
//! within the effective distance of the seed's own position. Membership is
//! never chained through other members, so a comment close to a member but
//! not to the seed starts (or joins) a different cluster.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::comment::{Comment, CommentId, Point};

/// A proximity group of comments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Stable id derived from the seed comment.
    pub id: String,
    /// Member comment ids, seed first.
    pub members: Vec<CommentId>,
    /// Mean member position. Display only; never used for membership.
    pub centroid: Point,
}

impl Cluster {
    fn seeded(seed: &Comment) -> Self {
        Self {
            id: format!("cluster-{}", seed.id),
            members: vec![seed.id.clone()],
            centroid: seed.position,
        }
    }

    /// Number of member comments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Always false; a cluster has at least one member.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether this cluster is drawn as a group marker (two or more members).
    #[must_use]
    pub fn is_group(&self) -> bool {
        self.members.len() > 1
    }

    /// Whether the comment belongs to this cluster.
    #[must_use]
    pub fn contains(&self, id: &CommentId) -> bool {
        self.members.contains(id)
    }
}

/// Board-space distance that corresponds to `threshold_px` on screen.
///
/// Returns `None` when the inputs cannot produce a meaningful distance.
#[must_use]
pub fn effective_distance(threshold_px: f64, zoom: f64) -> Option<f64> {
    if !threshold_px.is_finite() || threshold_px < 0.0 || !zoom.is_finite() || zoom <= 0.0 {
        return None;
    }
    Some(threshold_px / zoom)
}

/// Partition comments into proximity clusters.
///
/// Every comment appears in exactly one returned cluster. Comments with no
/// neighbour come back as single-member clusters, which callers should draw
/// individually rather than as group markers. Invalid threshold or zoom
/// values put every comment in its own cluster.
#[must_use]
pub fn compute_clusters(comments: &[Comment], threshold_px: f64, zoom: f64) -> Vec<Cluster> {
    let Some(max_distance) = effective_distance(threshold_px, zoom) else {
        return comments.iter().map(Cluster::seeded).collect();
    };

    let mut assigned = vec![false; comments.len()];
    let mut clusters = Vec::new();

    for (seed_index, seed) in comments.iter().enumerate() {
        if assigned[seed_index] {
            continue;
        }

        let mut cluster = Cluster::seeded(seed);
        let mut positions = vec![seed.position];

        for (index, candidate) in comments.iter().enumerate() {
            if index == seed_index || assigned[index] {
                continue;
            }
            if seed.position.distance(candidate.position) <= max_distance {
                cluster.members.push(candidate.id.clone());
                positions.push(candidate.position);
                assigned[index] = true;
            }
        }

        if cluster.is_group() {
            assigned[seed_index] = true;
            cluster.centroid = Point::mean(positions).unwrap_or(seed.position);
            clusters.push(cluster);
        }
    }

    // Seeds that found no neighbours are still unassigned here. Give each one
    // its own cluster so every comment can be looked up.
    for (index, comment) in comments.iter().enumerate() {
        if !assigned[index] {
            clusters.push(Cluster::seeded(comment));
        }
    }

    clusters
}

/// Lookup from comment id to the cluster that holds it.
#[derive(Debug, Clone, Default)]
pub struct ClusterIndex {
    clusters: Vec<Cluster>,
    by_comment: HashMap<CommentId, usize>,
}

impl ClusterIndex {
    /// Index a set of clusters.
    #[must_use]
    pub fn new(clusters: Vec<Cluster>) -> Self {
        let by_comment = clusters
            .iter()
            .enumerate()
            .flat_map(|(index, cluster)| cluster.members.iter().map(move |id| (id.clone(), index)))
            .collect();
        Self {
            clusters,
            by_comment,
        }
    }

    /// The cluster holding `id`, if the comment is known.
    #[must_use]
    pub fn cluster_of(&self, id: &CommentId) -> Option<&Cluster> {
        self.by_comment.get(id).map(|&index| &self.clusters[index])
    }

    /// Cluster by its id.
    #[must_use]
    pub fn get(&self, cluster_id: &str) -> Option<&Cluster> {
        self.clusters.iter().find(|cluster| cluster.id == cluster_id)
    }

    /// All clusters, singletons included.
    #[must_use]
    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    /// Clusters drawn as group markers.
    pub fn groups(&self) -> impl Iterator<Item = &Cluster> {
        self.clusters.iter().filter(|cluster| cluster.is_group())
    }

    /// Ids of comments drawn individually (not inside a group marker).
    #[must_use]
    pub fn ungrouped(&self) -> HashSet<&CommentId> {
        self.clusters
            .iter()
            .filter(|cluster| !cluster.is_group())
            .flat_map(|cluster| cluster.members.iter())
            .collect()
    }

    /// Number of clusters, singletons included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    /// Whether there are no clusters at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}
