//! Command-line interface for critboard.
//!
//! This module provides the CLI structure for the `critb` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    AddCommentArgs, BoardCommand, CategoryArg, CommentCommand, ConfigCommand, DemoCommand,
    OutputFormat,
};

/// critb - Inspect and edit design-critique boards
///
/// Reads and writes the local comment database, computes proximity clusters
/// and scores, and runs a scripted two-participant demo.
#[derive(Debug, Parser)]
#[command(name = "critb")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inspect boards
    #[command(subcommand)]
    Board(BoardCommand),

    /// Add, link and delete comments
    #[command(subcommand)]
    Comment(CommentCommand),

    /// Run two scripted collaborators on an in-memory board
    Demo(DemoCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn demo() -> Command {
        Command::Demo(DemoCommand {
            format: OutputFormat::Plain,
        })
    }

    #[test]
    fn test_cli_name() {
        let cli = Cli::command();
        assert_eq!(cli.get_name(), "critb");
    }

    #[test]
    fn test_verbosity_levels() {
        let mut cli = Cli {
            config: None,
            verbose: 0,
            quiet: true,
            command: demo(),
        };
        assert_eq!(cli.verbosity(), crate::logging::Verbosity::Quiet);

        cli.quiet = false;
        assert_eq!(cli.verbosity(), crate::logging::Verbosity::Normal);

        cli.verbose = 1;
        assert_eq!(cli.verbosity(), crate::logging::Verbosity::Verbose);

        cli.verbose = 2;
        assert_eq!(cli.verbosity(), crate::logging::Verbosity::Trace);
    }

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_board_show() {
        let args = vec!["critb", "board", "show", "b1", "--zoom", "2", "-f", "json"];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::Board(BoardCommand::Show {
                board,
                threshold,
                zoom,
                format,
            }) => {
                assert_eq!(board, "b1");
                assert!(threshold.is_none());
                assert!((zoom - 2.0).abs() < f64::EPSILON);
                assert_eq!(format, OutputFormat::Json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_comment_add() {
        let args = vec![
            "critb",
            "comment",
            "add",
            "b1",
            "--x",
            "-12.5",
            "--y",
            "40",
            "--category",
            "technical",
            "--text",
            "Slow",
        ];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::Comment(CommentCommand::Add(add)) => {
                assert_eq!(add.board, "b1");
                assert!((add.x + 12.5).abs() < f64::EPSILON);
                assert_eq!(add.category, CategoryArg::Technical);
                assert_eq!(add.author, "cli");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_comment_link() {
        let args = vec!["critb", "comment", "link", "a", "b"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(matches!(
            cli.command,
            Command::Comment(CommentCommand::Link { .. })
        ));
    }

    #[test]
    fn test_parse_demo() {
        let cli = Cli::try_parse_from(vec!["critb", "demo"]).unwrap();
        assert!(matches!(cli.command, Command::Demo(_)));
    }

    #[test]
    fn test_parse_with_config() {
        let args = vec!["critb", "-c", "/custom/config.toml", "demo"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/custom/config.toml")));
    }

    #[test]
    fn test_parse_with_verbose_and_quiet() {
        let cli = Cli::try_parse_from(vec!["critb", "-v", "demo"]).unwrap();
        assert_eq!(cli.verbose, 1);

        let cli = Cli::try_parse_from(vec!["critb", "-q", "demo"]).unwrap();
        assert!(cli.quiet);
    }
}
