//! `critb` - CLI for critboard
//!
//! This binary inspects and edits boards stored in the local comment
//! database and runs a scripted collaboration demo.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;

use critboard::cli::{
    AddCommentArgs, BoardCommand, Cli, Command, CommentCommand, ConfigCommand, DemoCommand,
    OutputFormat,
};
use critboard::cluster::ClusterIndex;
use critboard::score::compute_cluster_score;
use critboard::{
    compute_clusters, compute_score, init_logging, BoardId, BoardSession, Category, Comment,
    CommentId, CommentStore, Config, LinkGraph, MemoryRealtimeStore, Participant, Point,
    RealtimeStore, Reaction, ScriptedCollaborator, SqliteCommentStore, Step,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Load configuration
    let config = Config::load_from(cli.config.clone())?;

    // Execute the command
    match cli.command {
        Command::Board(board_cmd) => handle_board(&config, board_cmd).await,
        Command::Comment(comment_cmd) => handle_comment(&config, comment_cmd).await,
        Command::Demo(demo_cmd) => handle_demo(&config, &demo_cmd).await,
        Command::Config(config_cmd) => handle_config(&config, config_cmd),
    }
}

fn open_store(config: &Config) -> anyhow::Result<Arc<SqliteCommentStore>> {
    let path = config.database_path();
    let store = SqliteCommentStore::open(&path)
        .with_context(|| format!("opening comment database {}", path.display()))?;
    Ok(Arc::new(store))
}

/// Open a session as the CLI user on the board holding `id`.
async fn session_for_comment(
    config: &Config,
    store: Arc<SqliteCommentStore>,
    id: &CommentId,
    participant: Participant,
) -> anyhow::Result<BoardSession> {
    let Some(comment) = store.read(id).await? else {
        bail!("comment {id} not found");
    };
    let realtime: Arc<dyn RealtimeStore> = Arc::new(MemoryRealtimeStore::new());
    let session = BoardSession::new(store, realtime, participant, comment.board_id, config).await?;
    Ok(session)
}

async fn handle_board(config: &Config, cmd: BoardCommand) -> anyhow::Result<()> {
    match cmd {
        BoardCommand::Show {
            board,
            threshold,
            zoom,
            format,
        } => {
            let board = BoardId::parse(board)?;
            let store = open_store(config)?;
            let comments = store.list_by_board(&board).await?;
            let threshold = threshold.unwrap_or(config.clustering.threshold_px);
            let clusters = if config.clustering.enabled {
                compute_clusters(&comments, threshold, zoom)
            } else {
                Vec::new()
            };
            print_board(&board, &comments, &ClusterIndex::new(clusters), format)
        }
    }
}

async fn handle_comment(config: &Config, cmd: CommentCommand) -> anyhow::Result<()> {
    let store = open_store(config)?;
    match cmd {
        CommentCommand::Add(AddCommentArgs {
            board,
            x,
            y,
            category,
            text,
            author,
        }) => {
            let board = BoardId::parse(board)?;
            let realtime: Arc<dyn RealtimeStore> = Arc::new(MemoryRealtimeStore::new());
            let participant = Participant::new(author.clone(), author);
            let mut session = BoardSession::new(store, realtime, participant, board, config).await?;
            let id = session
                .place_comment(Point::new(x, y), Category::from(category), text)
                .await?;
            println!("{id}");
        }
        CommentCommand::Reply { id, text, author } => {
            let id = CommentId::from(id);
            let participant = Participant::new(author.clone(), author);
            let mut session = session_for_comment(config, store, &id, participant).await?;
            session.reply(&id, &text).await?;
            println!("Replied to {id}");
        }
        CommentCommand::Link { source, target } => {
            let (source, target) = (CommentId::from(source), CommentId::from(target));
            let mut session =
                session_for_comment(config, store, &source, cli_participant()).await?;
            if session.comment(&target).is_none() {
                bail!("comment {target} is not on board {}", session.board());
            }
            if session.add_link(&source, &target).await? {
                println!("Linked {source} -> {target}");
            } else {
                println!("Link {source} -> {target} already exists");
            }
        }
        CommentCommand::Unlink { source, target } => {
            let (source, target) = (CommentId::from(source), CommentId::from(target));
            let mut session =
                session_for_comment(config, store, &source, cli_participant()).await?;
            if session.remove_link(&source, &target).await? {
                println!("Unlinked {source} -> {target}");
            } else {
                println!("No link {source} -> {target}");
            }
        }
        CommentCommand::Delete { id } => {
            let id = CommentId::from(id);
            if store.delete(&id).await? {
                println!("Deleted {id}");
            } else {
                bail!("comment {id} not found");
            }
        }
    }
    Ok(())
}

fn cli_participant() -> Participant {
    Participant::new("cli", "cli")
}

fn demo_scripts() -> (Vec<Step>, Vec<Step>) {
    let ana = vec![
        Step::MoveCursor(Point::new(100.0, 100.0)),
        Step::place(
            "hero",
            Point::new(100.0, 100.0),
            Category::Technical,
            "Hero image is 4MB",
        ),
        Step::place(
            "fonts",
            Point::new(112.0, 108.0),
            Category::Technical,
            "Three font families load on first paint",
        ),
        Step::place(
            "story",
            Point::new(420.0, 260.0),
            Category::Conceptual,
            "The page never says who it is for",
        ),
        Step::link("hero", "fonts"),
    ];
    let ben = vec![
        Step::MoveCursor(Point::new(400.0, 250.0)),
        Step::place(
            "cta",
            Point::new(430.0, 270.0),
            Category::Details,
            "CTA label is cut off on mobile",
        ),
        Step::React {
            comment: "cta".to_string(),
            reaction: Reaction::Agree,
        },
        Step::Reply {
            comment: "cta".to_string(),
            text: "Happens at 320px".to_string(),
        },
        Step::Drag {
            comment: "cta".to_string(),
            to: Point::new(700.0, 260.0),
        },
    ];
    (ana, ben)
}

async fn handle_demo(config: &Config, cmd: &DemoCommand) -> anyhow::Result<()> {
    let board = BoardId::parse("demo")?;
    let store: Arc<dyn CommentStore> = Arc::new(SqliteCommentStore::open_in_memory()?);
    let realtime = Arc::new(MemoryRealtimeStore::new());
    let (ana_script, ben_script) = demo_scripts();

    let mut collaborators = Vec::new();
    for (participant, script) in [
        (Participant::new("ana", "Ana"), ana_script),
        (Participant::guest("ben", "Ben"), ben_script),
    ] {
        let mut session = BoardSession::new(
            Arc::clone(&store),
            Arc::clone(&realtime) as Arc<dyn RealtimeStore>,
            participant,
            board.clone(),
            config,
        )
        .await?;
        session.join().await?;
        collaborators.push(ScriptedCollaborator::new(session, script));
    }

    for collaborator in &mut collaborators {
        collaborator.run().await?;
    }

    let mut sessions: Vec<BoardSession> = collaborators
        .into_iter()
        .map(ScriptedCollaborator::into_session)
        .collect();
    for session in &mut sessions {
        session.refresh();
    }
    if sessions.windows(2).any(|pair| pair[0].comments() != pair[1].comments()) {
        bail!("sessions did not converge");
    }

    let now = chrono::Utc::now();
    let mut swept = 0;
    for session in &sessions {
        swept += session.sweep_activity(now).await?;
    }
    let activity = sessions[0].visible_activity(now).await?.len();
    let cursors = sessions[0].active_cursors(now).await?.len();

    let view = &sessions[0];
    print_board(&board, view.comments(), view.cluster_index(), cmd.format)?;
    if cmd.format != OutputFormat::Json {
        println!();
        println!("Activity events on display: {activity}");
        println!("Expired activity events swept: {swept}");
        println!("Other cursors visible to ana: {cursors}");
    }

    for session in &mut sessions {
        session.leave().await?;
    }
    Ok(())
}

fn print_board(
    board: &BoardId,
    comments: &[Comment],
    clusters: &ClusterIndex,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let score = compute_score(comments);
    let graph = LinkGraph::from_comments(comments);

    match format {
        OutputFormat::Json => {
            let clusters: Vec<_> = clusters
                .groups()
                .map(|cluster| {
                    serde_json::json!({
                        "cluster": cluster,
                        "score": compute_cluster_score(comments, cluster),
                    })
                })
                .collect();
            let edges: Vec<_> = graph
                .edges()
                .into_iter()
                .map(|edge| [edge.a, edge.b])
                .collect();
            let output = serde_json::json!({
                "board": board,
                "comments": comments,
                "clusters": clusters,
                "links": edges,
                "score": score,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!(
                "{:<38} {:<11} {:>9} {:>9} {:<8} TEXT",
                "ID", "CATEGORY", "X", "Y", "CLUSTER"
            );
            for comment in comments {
                let grouped = clusters
                    .cluster_of(&comment.id)
                    .is_some_and(|cluster| cluster.is_group());
                let cluster = if grouped { "yes" } else { "-" };
                println!(
                    "{:<38} {:<11} {:>9.1} {:>9.1} {:<8} {}",
                    comment.id,
                    comment.category,
                    comment.position.x,
                    comment.position.y,
                    cluster,
                    comment.text
                );
            }
            println!();
            print_score_line(&score);
        }
        OutputFormat::Plain => {
            println!("Board {board}: {} comments", comments.len());
            println!();
            for cluster in clusters.groups() {
                let cluster_score = compute_cluster_score(comments, cluster);
                println!(
                    "{} ({} comments, score {}) at ({:.1}, {:.1})",
                    cluster.id,
                    cluster.len(),
                    cluster_score.total,
                    cluster.centroid.x,
                    cluster.centroid.y
                );
                for id in &cluster.members {
                    if let Some(comment) = comments.iter().find(|c| c.id == *id) {
                        println!("  [{}] {}", comment.category, comment.text);
                    }
                }
            }
            for comment in comments {
                let grouped = clusters
                    .cluster_of(&comment.id)
                    .is_some_and(|cluster| cluster.is_group());
                if !grouped {
                    println!(
                        "{} [{}] {} at ({:.1}, {:.1})",
                        comment.id,
                        comment.category,
                        comment.text,
                        comment.position.x,
                        comment.position.y
                    );
                }
            }
            let edges = graph.edges();
            if !edges.is_empty() {
                println!();
                println!("Links:");
                for edge in edges {
                    println!("  {} -- {}", edge.a, edge.b);
                }
            }
            println!();
            print_score_line(&score);
        }
    }
    Ok(())
}

fn print_score_line(score: &critboard::Score) {
    let counts = score.category_counts;
    println!(
        "Score: {} (technical {}, conceptual {}, details {})",
        score.total, counts.technical, counts.conceptual, counts.details
    );
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!();
                println!("[Clustering]");
                println!("  Enabled:            {}", config.clustering.enabled);
                println!("  Threshold (px):     {}", config.clustering.threshold_px);
                println!();
                println!("[Presence]");
                println!(
                    "  Heartbeat (ms):     {}",
                    config.presence.heartbeat_interval_ms
                );
                println!(
                    "  Liveness (ms):      {}",
                    config.presence.liveness_window_ms
                );
                println!("  Idle (ms):          {}", config.presence.idle_window_ms);
                println!();
                println!("[Activity]");
                println!(
                    "  Display (ms):       {}",
                    config.activity.display_window_ms
                );
                println!("  Expiry (ms):        {}", config.activity.expiry_ms);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
