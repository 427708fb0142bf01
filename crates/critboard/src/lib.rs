//! `critboard` - Engine for collaborative design-critique boards
//!
//! Reviewers place positioned comments on a shared design, link them, and
//! see each other's cursors in real time. This library provides proximity
//! clustering, the link graph and scoring, presence and activity sync, the
//! drag controller, and the stores and session that tie them together.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod cluster;
pub mod comment;
pub mod config;
pub mod drag;
pub mod error;
pub mod links;
pub mod logging;
pub mod presence;
pub mod realtime;
pub mod score;
pub mod session;
pub mod simulate;
pub mod store;
pub mod viewport;

pub use cluster::{compute_clusters, Cluster, ClusterIndex};
pub use comment::{BoardId, Category, Comment, CommentId, CommentPatch, Point, Reaction, Reply};
pub use config::Config;
pub use error::{Error, Result};
pub use links::LinkGraph;
pub use logging::init_logging;
pub use presence::{ActivityFeed, Participant, PresenceTracker};
pub use realtime::{MemoryRealtimeStore, RealtimeStore};
pub use score::{compute_score, Score};
pub use session::BoardSession;
pub use simulate::{ScriptedCollaborator, Step};
pub use store::{CommentStore, SqliteCommentStore};
pub use viewport::Viewport;
