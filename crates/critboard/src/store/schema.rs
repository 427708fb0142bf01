//! `SQLite` schema definitions for the comment store.
//!
//! These statements create the version 1 schema. Later columns are added by
//! the migrations in [`super::migrations`].

/// SQL statement to create the comments table.
///
/// `seq` preserves insertion order, which keeps clustering stable across
/// participants reading the same board.
pub const CREATE_COMMENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS comments (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    board_id TEXT NOT NULL,
    x REAL NOT NULL,
    y REAL NOT NULL,
    category TEXT NOT NULL,
    text TEXT NOT NULL,
    base_points INTEGER NOT NULL DEFAULT 1,
    links TEXT NOT NULL DEFAULT '[]',
    agreed_count INTEGER NOT NULL DEFAULT 0,
    disagreed_count INTEGER NOT NULL DEFAULT 0,
    replies TEXT NOT NULL DEFAULT '[]',
    author_id TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
)
";

/// SQL statement to create an index on `board_id` for board snapshots.
pub const CREATE_BOARD_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_comments_board ON comments(board_id, seq)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_COMMENTS_TABLE,
    CREATE_BOARD_INDEX,
    CREATE_METADATA_TABLE,
];

/// Column list shared by every comment query, in row-mapping order.
pub const COMMENT_COLUMNS: &str = "id, board_id, x, y, category, text, base_points, links, \
     agreed_count, disagreed_count, replies, author_id, guest_origin";
