//! `SQLite`-backed comment store.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::{debug, info};

use super::schema::COMMENT_COLUMNS;
use super::{migrations, BoardSubscribers, CommentStore, CommentSubscription};
use crate::comment::{BoardId, Category, Comment, CommentId, CommentPatch, Point, Reactions};
use crate::error::{Error, Result};

/// Comment store persisted in a `SQLite` database.
///
/// One connection is shared behind a mutex, so each read-modify-write of a
/// comment runs without interleaving. That is what makes list appends safe
/// against concurrent writers; scalar fields still simply take the last
/// write. Board snapshots are read and published before the connection is
/// released, so subscribers see snapshots in commit order.
#[derive(Debug)]
pub struct SqliteCommentStore {
    path: PathBuf,
    conn: Mutex<Connection>,
    subscribers: BoardSubscribers,
}

impl SqliteCommentStore {
    /// Open or create a comment database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening comment database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        info!("Comment database opened at {}", path.display());
        Ok(Self {
            path,
            conn: Mutex::new(conn),
            subscribers: BoardSubscribers::default(),
        })
    }

    /// Create an in-memory store, used by tests and the demo board.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
            subscribers: BoardSubscribers::default(),
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Count the comments on a board.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count(&self, board: &BoardId) -> Result<i64> {
        let conn = self.lock()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM comments WHERE board_id = ?1",
            [board.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::store_unavailable("comment database lock poisoned"))
    }

    fn insert(conn: &Connection, comment: &Comment) -> Result<()> {
        conn.execute(
            r"
            INSERT INTO comments (id, board_id, x, y, category, text, base_points, links,
                                  agreed_count, disagreed_count, replies, author_id, guest_origin)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ",
            params![
                comment.id.as_str(),
                comment.board_id.as_str(),
                comment.position.x,
                comment.position.y,
                comment.category.as_str(),
                comment.text,
                comment.base_points,
                serde_json::to_string(&comment.links)?,
                comment.reactions.agreed_count,
                comment.reactions.disagreed_count,
                serde_json::to_string(&comment.replies)?,
                comment.author_id,
                comment.guest_origin,
            ],
        )?;
        Ok(())
    }

    fn write_back(tx: &Transaction<'_>, comment: &Comment) -> Result<()> {
        tx.execute(
            r"
            UPDATE comments SET x = ?2, y = ?3, category = ?4, text = ?5, base_points = ?6,
                links = ?7, agreed_count = ?8, disagreed_count = ?9, replies = ?10
            WHERE id = ?1
            ",
            params![
                comment.id.as_str(),
                comment.position.x,
                comment.position.y,
                comment.category.as_str(),
                comment.text,
                comment.base_points,
                serde_json::to_string(&comment.links)?,
                comment.reactions.agreed_count,
                comment.reactions.disagreed_count,
                serde_json::to_string(&comment.replies)?,
            ],
        )?;
        Ok(())
    }

    fn get(conn: &Connection, id: &CommentId) -> Result<Option<Comment>> {
        let comment = conn
            .query_row(
                &format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE id = ?1"),
                [id.as_str()],
                Self::row_to_comment,
            )
            .optional()?;
        Ok(comment)
    }

    fn list(conn: &Connection, board: &BoardId) -> Result<Vec<Comment>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COMMENT_COLUMNS} FROM comments WHERE board_id = ?1 ORDER BY seq ASC"
        ))?;
        let comments = stmt
            .query_map([board.as_str()], Self::row_to_comment)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(comments)
    }

    fn apply_patch(&self, id: &CommentId, patch: &CommentPatch) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let Some(mut comment) = Self::get(&tx, id)? else {
            return Err(Error::not_found(id.as_str()));
        };
        patch.apply_to(&mut comment);
        Self::write_back(&tx, &comment)?;
        tx.commit()?;
        self.notify(&conn, &comment.board_id)
    }

    fn remove(&self, id: &CommentId) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let Some(deleted) = Self::get(&tx, id)? else {
            return Ok(false);
        };
        tx.execute("DELETE FROM comments WHERE id = ?1", [id.as_str()])?;

        let mut cleaned = 0_usize;
        for mut comment in Self::list(&tx, &deleted.board_id)? {
            if crate::links::remove_link(&mut comment, id) {
                Self::write_back(&tx, &comment)?;
                cleaned += 1;
            }
        }
        tx.commit()?;

        debug!(
            "Deleted comment {} and removed {} link references",
            id, cleaned
        );
        self.notify(&conn, &deleted.board_id)?;
        Ok(true)
    }

    /// Publish the board's snapshot. Callers hold the connection lock.
    fn notify(&self, conn: &Connection, board: &BoardId) -> Result<()> {
        if !self.subscribers.is_watched(board) {
            return Ok(());
        }
        self.subscribers.publish(board, Self::list(conn, board)?);
        Ok(())
    }

    fn row_to_comment(row: &rusqlite::Row) -> rusqlite::Result<Comment> {
        let id: String = row.get(0)?;
        let board_id: String = row.get(1)?;
        let x: f64 = row.get(2)?;
        let y: f64 = row.get(3)?;
        let category: String = row.get(4)?;
        let text: String = row.get(5)?;
        let base_points: i64 = row.get(6)?;
        let links: String = row.get(7)?;
        let agreed_count: u32 = row.get(8)?;
        let disagreed_count: u32 = row.get(9)?;
        let replies: String = row.get(10)?;
        let author_id: String = row.get(11)?;
        let guest_origin: bool = row.get(12)?;

        let board_id = BoardId::parse(board_id).map_err(|e| conversion_error(1, e.to_string()))?;
        let links = serde_json::from_str(&links).map_err(|e| conversion_error(7, e.to_string()))?;
        let replies =
            serde_json::from_str(&replies).map_err(|e| conversion_error(10, e.to_string()))?;

        Ok(Comment {
            id: CommentId::from(id),
            board_id,
            position: Point::new(x, y),
            category: Category::from(category),
            text,
            base_points,
            links,
            reactions: Reactions {
                agreed_count,
                disagreed_count,
            },
            replies,
            author_id,
            guest_origin,
        })
    }
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, message.into())
}

#[async_trait]
impl CommentStore for SqliteCommentStore {
    async fn create(&self, comment: &Comment) -> Result<CommentId> {
        let conn = self.lock()?;
        Self::insert(&conn, comment)?;
        debug!("Created comment {} on board {}", comment.id, comment.board_id);
        self.notify(&conn, &comment.board_id)?;
        Ok(comment.id.clone())
    }

    async fn read(&self, id: &CommentId) -> Result<Option<Comment>> {
        let conn = self.lock()?;
        Self::get(&conn, id)
    }

    async fn update(&self, id: &CommentId, patch: &CommentPatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }
        self.apply_patch(id, patch)
    }

    async fn delete(&self, id: &CommentId) -> Result<bool> {
        self.remove(id)
    }

    async fn list_by_board(&self, board: &BoardId) -> Result<Vec<Comment>> {
        let conn = self.lock()?;
        Self::list(&conn, board)
    }

    async fn subscribe_by_board(&self, board: &BoardId) -> Result<CommentSubscription> {
        let conn = self.lock()?;
        self.subscribers.subscribe(board, Self::list(&conn, board)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comment::{ListUpdate, Reply};
    use std::sync::Arc;

    fn create_test_store() -> SqliteCommentStore {
        SqliteCommentStore::open_in_memory().expect("failed to create test store")
    }

    fn board() -> BoardId {
        BoardId::parse("board-1").unwrap()
    }

    fn create_test_comment(id: &str, x: f64, y: f64) -> Comment {
        Comment::new(board(), Point::new(x, y), Category::Technical, "text", "author").with_id(id)
    }

    #[test]
    fn test_open_in_memory() {
        let store = SqliteCommentStore::open_in_memory().unwrap();
        assert_eq!(store.path().to_string_lossy(), ":memory:");
    }

    #[test]
    fn test_open_file_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("boards.db");
        let store = SqliteCommentStore::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.count(&board()).unwrap(), 0);
    }

    #[test]
    fn test_open_reports_unusable_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();

        let err = SqliteCommentStore::open(blocker.join("nested").join("boards.db")).unwrap_err();
        assert!(matches!(err, Error::DirectoryCreate { .. }));
    }

    #[tokio::test]
    async fn test_create_and_read() {
        let store = create_test_store();
        let mut comment = create_test_comment("c1", 1.5, -2.0).as_guest();
        comment.replies.push(Reply::new("Ana", "first"));
        comment.category = Category::from("Aesthetic");

        let id = store.create(&comment).await.unwrap();
        let read = store.read(&id).await.unwrap().unwrap();

        assert_eq!(read, comment);
    }

    #[tokio::test]
    async fn test_read_missing() {
        let store = create_test_store();
        assert!(store.read(&CommentId::from("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_duplicate_id_fails() {
        let store = create_test_store();
        store.create(&create_test_comment("c1", 0.0, 0.0)).await.unwrap();
        assert!(store.create(&create_test_comment("c1", 0.0, 0.0)).await.is_err());
    }

    #[tokio::test]
    async fn test_update_scalar_last_write_wins() {
        let store = create_test_store();
        let id = store.create(&create_test_comment("c1", 0.0, 0.0)).await.unwrap();

        store.update(&id, &CommentPatch::text("first")).await.unwrap();
        store.update(&id, &CommentPatch::text("second")).await.unwrap();

        assert_eq!(store.read(&id).await.unwrap().unwrap().text, "second");
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = create_test_store();
        let err = store
            .update(&CommentId::from("gone"), &CommentPatch::text("x"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_kept() {
        let store = create_test_store();
        let id = store.create(&create_test_comment("a", 0.0, 0.0)).await.unwrap();

        store
            .update(&id, &CommentPatch::append_link(CommentId::from("b")))
            .await
            .unwrap();
        store
            .update(&id, &CommentPatch::append_link(CommentId::from("c")))
            .await
            .unwrap();
        store
            .update(&id, &CommentPatch::append_reply(Reply::new("Ana", "one")))
            .await
            .unwrap();
        store
            .update(&id, &CommentPatch::append_reply(Reply::new("Ben", "two")))
            .await
            .unwrap();

        let comment = store.read(&id).await.unwrap().unwrap();
        assert_eq!(comment.links, vec![CommentId::from("b"), CommentId::from("c")]);
        assert_eq!(comment.replies.len(), 2);
        assert_eq!(comment.replies[1].author, "Ben");
    }

    #[tokio::test]
    async fn test_delete_removes_link_references() {
        let store = create_test_store();
        store
            .create(&create_test_comment("a", 0.0, 0.0).with_links(["x", "b"]))
            .await
            .unwrap();
        store.create(&create_test_comment("b", 1.0, 0.0).with_links(["x"])).await.unwrap();
        store.create(&create_test_comment("x", 2.0, 0.0).with_links(["a"])).await.unwrap();

        assert!(store.delete(&CommentId::from("x")).await.unwrap());

        let remaining = store.list_by_board(&board()).await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|c| !c.links_to(&CommentId::from("x"))));
        assert_eq!(remaining[0].links, vec![CommentId::from("b")]);
    }

    #[tokio::test]
    async fn test_delete_missing() {
        let store = create_test_store();
        assert!(!store.delete(&CommentId::from("nope")).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_preserves_placement_order_and_board() {
        let store = create_test_store();
        for (i, id) in ["z", "a", "m"].iter().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            let x = i as f64;
            store.create(&create_test_comment(id, x, 0.0)).await.unwrap();
        }
        let other = Comment::new(
            BoardId::parse("other").unwrap(),
            Point::default(),
            Category::Details,
            "",
            "u",
        );
        store.create(&other).await.unwrap();

        let ids: Vec<String> = store
            .list_by_board(&board())
            .await
            .unwrap()
            .iter()
            .map(|c| c.id.to_string())
            .collect();
        assert_eq!(ids, vec!["z", "a", "m"]);
    }

    #[tokio::test]
    async fn test_subscription_receives_snapshots() {
        let store = create_test_store();
        store.create(&create_test_comment("a", 0.0, 0.0)).await.unwrap();

        let mut rx = store.subscribe_by_board(&board()).await.unwrap();
        assert_eq!(rx.borrow().len(), 1);
        assert!(!rx.has_changed().unwrap());

        store.create(&create_test_comment("b", 1.0, 1.0)).await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().len(), 2);

        store
            .update(&CommentId::from("a"), &CommentPatch::position(Point::new(9.0, 9.0)))
            .await
            .unwrap();
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot[0].position, Point::new(9.0, 9.0));
    }

    #[tokio::test]
    async fn test_subscription_is_per_board() {
        let store = create_test_store();
        let mut rx = store.subscribe_by_board(&board()).await.unwrap();

        let other = Comment::new(
            BoardId::parse("other").unwrap(),
            Point::default(),
            Category::Details,
            "",
            "u",
        );
        store.create(&other).await.unwrap();

        assert!(!rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_empty());
    }

    #[tokio::test]
    async fn test_second_subscriber_sees_current_snapshot() {
        let store = create_test_store();
        let _first = store.subscribe_by_board(&board()).await.unwrap();
        store.create(&create_test_comment("a", 0.0, 0.0)).await.unwrap();

        let second = store.subscribe_by_board(&board()).await.unwrap();
        assert_eq!(second.borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_resubscribe_after_drop() {
        let store = create_test_store();
        drop(store.subscribe_by_board(&board()).await.unwrap());
        store.create(&create_test_comment("a", 0.0, 0.0)).await.unwrap();

        let rx = store.subscribe_by_board(&board()).await.unwrap();
        assert_eq!(rx.borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_replace_links_patch() {
        let store = create_test_store();
        let id = store
            .create(&create_test_comment("a", 0.0, 0.0).with_links(["b", "c"]))
            .await
            .unwrap();
        let patch = CommentPatch {
            links: Some(ListUpdate::Replace(vec![CommentId::from("d")])),
            ..CommentPatch::default()
        };
        store.update(&id, &patch).await.unwrap();

        assert_eq!(
            store.read(&id).await.unwrap().unwrap().links,
            vec![CommentId::from("d")]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_writers_leave_subscribers_on_latest_snapshot() {
        for round in 0..25 {
            let store = Arc::new(create_test_store());
            let ids: Vec<CommentId> = (0..8).map(|i| CommentId::from(format!("c{i}"))).collect();
            for id in &ids {
                store
                    .create(&create_test_comment(id.as_str(), 0.0, 0.0))
                    .await
                    .unwrap();
            }
            let rx = store.subscribe_by_board(&board()).await.unwrap();

            let mut writers = Vec::new();
            for id in ids {
                let store = Arc::clone(&store);
                writers.push(tokio::spawn(async move {
                    for step in 1..=20 {
                        let position = Point::new(f64::from(step), f64::from(step));
                        store
                            .update(&id, &CommentPatch::position(position))
                            .await
                            .unwrap();
                    }
                }));
            }
            for writer in writers {
                writer.await.unwrap();
            }

            let stored = store.list_by_board(&board()).await.unwrap();
            assert_eq!(*rx.borrow(), stored, "round {round}");
            assert!(stored.iter().all(|c| c.position == Point::new(20.0, 20.0)));
        }
    }

    #[test]
    fn test_count() {
        let store = create_test_store();
        assert_eq!(store.count(&board()).unwrap(), 0);
    }
}
