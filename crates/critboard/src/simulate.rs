//! Scripted collaborators.
//!
//! A [`ScriptedCollaborator`] drives a [`BoardSession`] through a fixed list
//! of [`Step`]s using only the public session operations, exactly as a remote
//! participant would. The demo command and the integration tests use it to
//! populate boards reproducibly.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::comment::{Category, CommentId, Point, Reaction};
use crate::error::Result;
use crate::session::BoardSession;

/// One scripted action. Comment references are labels given to earlier
/// [`Step::PlaceComment`] steps; unknown labels are used as raw comment ids.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Move the cursor to a board position.
    MoveCursor(Point),
    /// Place a comment and remember it under `label`.
    PlaceComment {
        /// Name later steps use to refer to this comment.
        label: String,
        /// Board position.
        position: Point,
        /// Critique category.
        category: Category,
        /// Comment body.
        text: String,
    },
    /// Reply to a comment.
    Reply {
        /// Comment label.
        comment: String,
        /// Reply body.
        text: String,
    },
    /// React to a comment.
    React {
        /// Comment label.
        comment: String,
        /// Agree or disagree.
        reaction: Reaction,
    },
    /// Draw a link from one comment to another.
    Link {
        /// Label of the comment holding the link.
        source: String,
        /// Label of the linked comment.
        target: String,
    },
    /// Drag a comment to a board position.
    Drag {
        /// Comment label.
        comment: String,
        /// Destination in board coordinates.
        to: Point,
    },
}

impl Step {
    /// Shorthand for [`Step::PlaceComment`].
    #[must_use]
    pub fn place(
        label: impl Into<String>,
        position: Point,
        category: Category,
        text: impl Into<String>,
    ) -> Self {
        Self::PlaceComment {
            label: label.into(),
            position,
            category,
            text: text.into(),
        }
    }

    /// Shorthand for [`Step::Link`].
    #[must_use]
    pub fn link(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::Link {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Drives one session through a script.
#[derive(Debug)]
pub struct ScriptedCollaborator {
    session: BoardSession,
    steps: Vec<Step>,
    placed: HashMap<String, CommentId>,
}

impl ScriptedCollaborator {
    /// Wrap a session with a script.
    #[must_use]
    pub fn new(session: BoardSession, steps: Vec<Step>) -> Self {
        Self {
            session,
            steps,
            placed: HashMap::new(),
        }
    }

    /// The driven session.
    #[must_use]
    pub fn session(&self) -> &BoardSession {
        &self.session
    }

    /// Mutable access to the driven session.
    pub fn session_mut(&mut self) -> &mut BoardSession {
        &mut self.session
    }

    /// Give back the session.
    #[must_use]
    pub fn into_session(self) -> BoardSession {
        self.session
    }

    /// Id of a comment placed under `label`.
    #[must_use]
    pub fn placed(&self, label: &str) -> Option<&CommentId> {
        self.placed.get(label)
    }

    /// Run every step in order.
    ///
    /// # Errors
    ///
    /// Returns the first error a session operation reports, such as an empty
    /// reply or a self-link.
    pub async fn run(&mut self) -> Result<()> {
        let steps = std::mem::take(&mut self.steps);
        info!(
            "{} running {} scripted steps",
            self.session.participant().id,
            steps.len()
        );
        let mut result = Ok(());
        for step in &steps {
            if let Err(e) = self.step(step).await {
                result = Err(e);
                break;
            }
        }
        self.steps = steps;
        result
    }

    async fn step(&mut self, step: &Step) -> Result<()> {
        debug!("{}: {:?}", self.session.participant().id, step);
        match step {
            Step::MoveCursor(position) => {
                let pointer = self.session.viewport().to_screen(*position);
                self.session.pointer_moved(pointer).await;
            }
            Step::PlaceComment {
                label,
                position,
                category,
                text,
            } => {
                let id = self
                    .session
                    .place_comment(*position, category.clone(), text.clone())
                    .await?;
                self.placed.insert(label.clone(), id);
            }
            Step::Reply { comment, text } => {
                let id = self.resolve(comment);
                self.session.reply(&id, text).await?;
            }
            Step::React { comment, reaction } => {
                let id = self.resolve(comment);
                self.session.react(&id, *reaction).await?;
            }
            Step::Link { source, target } => {
                let source = self.resolve(source);
                let target = self.resolve(target);
                self.session.begin_link(&source).await?;
                self.session.complete_link(&target).await?;
            }
            Step::Drag { comment, to } => {
                let id = self.resolve(comment);
                let Some(from) = self.session.comment(&id).map(|c| c.position) else {
                    debug!("Skipping drag of unknown comment {}", id);
                    return Ok(());
                };
                let viewport = *self.session.viewport();
                if self
                    .session
                    .begin_comment_drag(&id, viewport.to_screen(from))
                {
                    self.session.drag_to(viewport.to_screen(*to)).await;
                    self.session.end_drag().await;
                }
            }
        }
        Ok(())
    }

    fn resolve(&self, label: &str) -> CommentId {
        self.placed
            .get(label)
            .cloned()
            .unwrap_or_else(|| CommentId::from(label))
    }
}
