//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::comment::Category;

/// Board inspection commands.
#[derive(Debug, Subcommand)]
pub enum BoardCommand {
    /// Show clusters, links and score for a board
    Show {
        /// Board id
        board: String,

        /// Grouping radius in screen pixels (defaults to the configured value)
        #[arg(short, long)]
        threshold: Option<f64>,

        /// Zoom level used to turn the radius into board distance
        #[arg(short, long, default_value = "1.0")]
        zoom: f64,

        /// Output format
        #[arg(short, long, value_enum, default_value = "plain")]
        format: OutputFormat,
    },
}

/// Comment editing commands.
#[derive(Debug, Subcommand)]
pub enum CommentCommand {
    /// Place a new comment on a board
    Add(AddCommentArgs),

    /// Reply to a comment
    Reply {
        /// Comment id
        id: String,

        /// Reply text
        text: String,

        /// Name shown as the reply author
        #[arg(short, long, default_value = "cli")]
        author: String,
    },

    /// Link one comment to another
    Link {
        /// Comment that holds the link
        source: String,

        /// Linked comment
        target: String,
    },

    /// Remove a link between two comments
    Unlink {
        /// Comment that holds the link
        source: String,

        /// Linked comment
        target: String,
    },

    /// Delete a comment and every link to it
    Delete {
        /// Comment id
        id: String,
    },
}

/// Arguments for `comment add`.
#[derive(Debug, Args)]
pub struct AddCommentArgs {
    /// Board id
    pub board: String,

    /// Horizontal board position
    #[arg(long, allow_negative_numbers = true)]
    pub x: f64,

    /// Vertical board position
    #[arg(long, allow_negative_numbers = true)]
    pub y: f64,

    /// Critique category
    #[arg(long, value_enum)]
    pub category: CategoryArg,

    /// Comment text
    #[arg(long)]
    pub text: String,

    /// Author id recorded on the comment
    #[arg(short, long, default_value = "cli")]
    pub author: String,
}

/// Demo command arguments.
#[derive(Debug, Args)]
pub struct DemoCommand {
    /// Output format
    #[arg(short, long, value_enum, default_value = "plain")]
    pub format: OutputFormat,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Category argument for new comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CategoryArg {
    /// Implementation or feasibility feedback
    Technical,
    /// Feedback on the underlying idea
    Conceptual,
    /// Feedback on finish and detail
    Details,
}

impl From<CategoryArg> for Category {
    fn from(arg: CategoryArg) -> Self {
        match arg {
            CategoryArg::Technical => Self::Technical,
            CategoryArg::Conceptual => Self::Conceptual,
            CategoryArg::Details => Self::Details,
        }
    }
}

/// Output format for commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output
    #[default]
    Plain,
    /// Formatted table
    Table,
    /// JSON output
    Json,
}
