//! Core comment types for critboard.
//!
//! This module defines the records that reviewers place on a board, the
//! partial updates applied to them, and the identifiers that tie them to a
//! board.

use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Sub};
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Points awarded to a comment before any link multiplier.
pub const DEFAULT_BASE_POINTS: i64 = 1;

/// Unique identifier of a comment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommentId(String);

impl CommentId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CommentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifier of a board (one critique session).
///
/// Board ids appear in realtime store paths, so they are restricted to
/// letters, digits, `-` and `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoardId(String);

fn board_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,128}$").expect("valid board id regex"))
}

impl BoardId {
    /// Validate and wrap a board id.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the id is empty, too long, or contains
    /// characters other than letters, digits, `-` and `_`.
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if board_id_pattern().is_match(&value) {
            Ok(Self(value))
        } else {
            Err(Error::invalid_input(format!("invalid board id: {value:?}")))
        }
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BoardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BoardId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// A position in board (or screen) coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal coordinate.
    pub x: f64,
    /// Vertical coordinate.
    pub y: f64,
}

impl Point {
    /// Create a point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Arithmetic mean of a set of points, or `None` if the set is empty.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = Self>,
    {
        let (sum, count) = points
            .into_iter()
            .fold((Self::default(), 0_usize), |(sum, count), p| {
                (sum + p, count + 1)
            });
        if count == 0 {
            None
        } else {
            Some(sum / count as f64)
        }
    }
}

impl Add for Point {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Point {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Point {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Point {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl Div<f64> for Point {
    type Output = Self;

    fn div(self, rhs: f64) -> Self {
        Self::new(self.x / rhs, self.y / rhs)
    }
}

/// Critique category of a comment.
///
/// Stored as a lowercase string. Anything the board does not recognize is
/// kept verbatim so it survives a round trip, but it never scores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Category {
    /// Implementation or feasibility feedback.
    Technical,
    /// Feedback on the underlying idea.
    Conceptual,
    /// Feedback on finish and detail.
    Details,
    /// A category string this board does not know.
    Unrecognized(String),
}

impl Category {
    /// The stored string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Technical => "technical",
            Self::Conceptual => "conceptual",
            Self::Details => "details",
            Self::Unrecognized(raw) => raw,
        }
    }

    /// Whether this category takes part in scoring.
    #[must_use]
    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unrecognized(_))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Category {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "technical" => Self::Technical,
            "conceptual" => Self::Conceptual,
            "details" => Self::Details,
            _ => Self::Unrecognized(value.to_string()),
        }
    }
}

impl From<String> for Category {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<Category> for String {
    fn from(value: Category) -> Self {
        value.as_str().to_string()
    }
}

/// Agreement counters on a comment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reactions {
    /// Number of reviewers agreeing.
    pub agreed_count: u32,
    /// Number of reviewers disagreeing.
    pub disagreed_count: u32,
}

/// A reaction a reviewer can add to a comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    /// Agree with the comment.
    Agree,
    /// Disagree with the comment.
    Disagree,
}

impl Reactions {
    /// Counters after applying one more reaction.
    #[must_use]
    pub fn with(self, reaction: Reaction) -> Self {
        match reaction {
            Reaction::Agree => Self {
                agreed_count: self.agreed_count.saturating_add(1),
                ..self
            },
            Reaction::Disagree => Self {
                disagreed_count: self.disagreed_count.saturating_add(1),
                ..self
            },
        }
    }
}

/// A threaded reply under a comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    /// Display name of the reply author.
    pub author: String,
    /// Reply body.
    pub text: String,
    /// When the reply was written (RFC 3339 on the wire).
    pub timestamp: DateTime<Utc>,
}

impl Reply {
    /// Create a reply stamped with the current time.
    #[must_use]
    pub fn new(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A point-anchored feedback item on a board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    /// Unique identifier.
    pub id: CommentId,
    /// Board this comment belongs to.
    pub board_id: BoardId,
    /// Anchor position in board coordinates.
    pub position: Point,
    /// Critique category.
    pub category: Category,
    /// Comment body.
    pub text: String,
    /// Points before the link multiplier.
    #[serde(default = "default_base_points")]
    pub base_points: i64,
    /// Outgoing links, recorded only on the comment that initiated them.
    #[serde(default)]
    pub links: Vec<CommentId>,
    /// Agreement counters.
    #[serde(default)]
    pub reactions: Reactions,
    /// Replies in the order they were added.
    #[serde(default)]
    pub replies: Vec<Reply>,
    /// Participant who placed the comment.
    pub author_id: String,
    /// Placed by a guest rather than a signed-in participant.
    #[serde(default)]
    pub guest_origin: bool,
}

fn default_base_points() -> i64 {
    DEFAULT_BASE_POINTS
}

impl Comment {
    /// Create a comment with a fresh id and default points.
    #[must_use]
    pub fn new(
        board_id: BoardId,
        position: Point,
        category: Category,
        text: impl Into<String>,
        author_id: impl Into<String>,
    ) -> Self {
        Self {
            id: CommentId::generate(),
            board_id,
            position,
            category,
            text: text.into(),
            base_points: DEFAULT_BASE_POINTS,
            links: Vec::new(),
            reactions: Reactions::default(),
            replies: Vec::new(),
            author_id: author_id.into(),
            guest_origin: false,
        }
    }

    /// Replace the generated id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<CommentId>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the outgoing links.
    #[must_use]
    pub fn with_links<I, T>(mut self, links: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<CommentId>,
    {
        self.links = links.into_iter().map(Into::into).collect();
        self
    }

    /// Set the base points.
    #[must_use]
    pub fn with_base_points(mut self, base_points: i64) -> Self {
        self.base_points = base_points;
        self
    }

    /// Mark the comment as placed by a guest.
    #[must_use]
    pub fn as_guest(mut self) -> Self {
        self.guest_origin = true;
        self
    }

    /// Whether this comment holds an outgoing link to `target`.
    #[must_use]
    pub fn links_to(&self, target: &CommentId) -> bool {
        self.links.contains(target)
    }
}

/// How a list-valued field is changed by a patch.
///
/// `Append` and `Remove` touch only the listed values, so concurrent
/// additions from different participants are not lost the way a `Replace`
/// of the whole list would lose them.
#[derive(Debug, Clone, PartialEq)]
pub enum ListUpdate<T> {
    /// Overwrite the whole list.
    Replace(Vec<T>),
    /// Add values not already present.
    Append(Vec<T>),
    /// Drop every occurrence of the given values.
    Remove(Vec<T>),
}

impl<T: PartialEq + Clone> ListUpdate<T> {
    /// Apply this update to a list in place. Returns whether it changed.
    pub fn apply(&self, list: &mut Vec<T>) -> bool {
        match self {
            Self::Replace(values) => {
                if list == values {
                    return false;
                }
                list.clone_from(values);
                true
            }
            Self::Append(values) => {
                let before = list.len();
                for value in values {
                    if !list.contains(value) {
                        list.push(value.clone());
                    }
                }
                list.len() != before
            }
            Self::Remove(values) => {
                let before = list.len();
                list.retain(|item| !values.contains(item));
                list.len() != before
            }
        }
    }
}

/// A partial update of a comment.
///
/// Scalar fields overwrite whatever the store holds (last write wins);
/// list fields go through [`ListUpdate`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommentPatch {
    /// New anchor position.
    pub position: Option<Point>,
    /// New category.
    pub category: Option<Category>,
    /// New body text.
    pub text: Option<String>,
    /// New base points.
    pub base_points: Option<i64>,
    /// New reaction counters.
    pub reactions: Option<Reactions>,
    /// Change to outgoing links.
    pub links: Option<ListUpdate<CommentId>>,
    /// Change to replies.
    pub replies: Option<ListUpdate<Reply>>,
}

impl CommentPatch {
    /// Patch that moves a comment.
    #[must_use]
    pub fn position(position: Point) -> Self {
        Self {
            position: Some(position),
            ..Self::default()
        }
    }

    /// Patch that replaces the text.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Patch that changes the category.
    #[must_use]
    pub fn category(category: Category) -> Self {
        Self {
            category: Some(category),
            ..Self::default()
        }
    }

    /// Patch that overwrites the reaction counters.
    #[must_use]
    pub fn reactions(reactions: Reactions) -> Self {
        Self {
            reactions: Some(reactions),
            ..Self::default()
        }
    }

    /// Patch that adds a link without clobbering concurrent additions.
    #[must_use]
    pub fn append_link(target: CommentId) -> Self {
        Self {
            links: Some(ListUpdate::Append(vec![target])),
            ..Self::default()
        }
    }

    /// Patch that drops a link.
    #[must_use]
    pub fn remove_link(target: CommentId) -> Self {
        Self {
            links: Some(ListUpdate::Remove(vec![target])),
            ..Self::default()
        }
    }

    /// Patch that appends a reply.
    #[must_use]
    pub fn append_reply(reply: Reply) -> Self {
        Self {
            replies: Some(ListUpdate::Append(vec![reply])),
            ..Self::default()
        }
    }

    /// Whether the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the patch to a comment in place.
    pub fn apply_to(&self, comment: &mut Comment) {
        if let Some(position) = self.position {
            comment.position = position;
        }
        if let Some(category) = &self.category {
            comment.category = category.clone();
        }
        if let Some(text) = &self.text {
            comment.text.clone_from(text);
        }
        if let Some(base_points) = self.base_points {
            comment.base_points = base_points;
        }
        if let Some(reactions) = self.reactions {
            comment.reactions = reactions;
        }
        if let Some(links) = &self.links {
            links.apply(&mut comment.links);
            let own_id = comment.id.clone();
            comment.links.retain(|target| *target != own_id);
        }
        if let Some(replies) = &self.replies {
            replies.apply(&mut comment.replies);
        }
    }
}
