//! Board scoring.
//!
//! Each comment with a recognized category counts toward its category and
//! earns `base_points * multiplier`. The multiplier looks only at the
//! comment's own outgoing links:
//!
//! | outgoing links                       | multiplier |
//! |--------------------------------------|------------|
//! | none                                 | 1          |
//! | at least one to the same category    | 2          |
//! | some, none to the same category      | 3          |
//!
//! A link benefits the comment that holds it, never its target.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::cluster::Cluster;
use crate::comment::{Category, Comment, CommentId};

/// Per-category comment counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
    /// Technical comments.
    pub technical: u32,
    /// Conceptual comments.
    pub conceptual: u32,
    /// Details comments.
    pub details: u32,
}

impl CategoryCounts {
    fn increment(&mut self, category: &Category) {
        match category {
            Category::Technical => self.technical += 1,
            Category::Conceptual => self.conceptual += 1,
            Category::Details => self.details += 1,
            Category::Unrecognized(_) => {}
        }
    }

    /// Sum over all categories.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.technical + self.conceptual + self.details
    }
}

/// Result of scoring a board.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    /// How many comments each category holds.
    pub category_counts: CategoryCounts,
    /// Sum of `base_points * multiplier` over scored comments.
    pub total: i64,
}

/// Multiplier a comment earns from its outgoing links.
///
/// `category_of` resolves link targets; targets it cannot resolve are
/// treated as if the link were absent.
pub fn link_multiplier<'a, F>(comment: &Comment, category_of: F) -> i64
where
    F: Fn(&CommentId) -> Option<&'a Category>,
{
    let mut has_links = false;
    for target in &comment.links {
        if *target == comment.id {
            continue;
        }
        let Some(category) = category_of(target) else {
            continue;
        };
        if *category == comment.category {
            return 2;
        }
        has_links = true;
    }
    if has_links {
        3
    } else {
        1
    }
}

/// Score a set of comments.
///
/// Pure: the same comments always give the same score.
#[must_use]
pub fn compute_score(comments: &[Comment]) -> Score {
    score_where(comments, |_| true)
}

/// Score only the members of one cluster.
///
/// Link targets are still resolved against the whole board, so a member
/// linking outside its cluster keeps its multiplier.
#[must_use]
pub fn compute_cluster_score(comments: &[Comment], cluster: &Cluster) -> Score {
    score_where(comments, |comment| cluster.contains(&comment.id))
}

fn score_where<P>(comments: &[Comment], include: P) -> Score
where
    P: Fn(&Comment) -> bool,
{
    let categories: HashMap<&CommentId, &Category> =
        comments.iter().map(|c| (&c.id, &c.category)).collect();

    let mut score = Score::default();
    for comment in comments
        .iter()
        .filter(|c| c.category.is_recognized() && include(*c))
    {
        score.category_counts.increment(&comment.category);
        let multiplier = link_multiplier(comment, |id| categories.get(id).copied());
        score.total = score
            .total
            .saturating_add(comment.base_points.saturating_mul(multiplier));
    }
    score
}
