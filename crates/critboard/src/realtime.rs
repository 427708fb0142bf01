//! Realtime key/value store for ephemeral board state.
//!
//! Cursor presence, participant status and activity events live here rather
//! than in the comment store. Values are JSON documents addressed by
//! slash-separated paths; subscribers watch every path under a prefix.
//!
//! | path                                  | value                 |
//! |---------------------------------------|-----------------------|
//! | `boards/<board>/cursors/<user>`       | presence record       |
//! | `status/<user>`                       | participant status    |
//! | `boards/<board>/activity/<event id>`  | activity event        |

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::comment::BoardId;
use crate::error::{Error, Result};

/// Every value under a prefix, keyed by full path.
pub type RealtimeSnapshot = BTreeMap<String, Value>;

/// Receiver of prefix snapshots. Dropping it unsubscribes.
pub type RealtimeSubscription = watch::Receiver<RealtimeSnapshot>;

/// Path of one participant's cursor on a board.
#[must_use]
pub fn cursor_path(board: &BoardId, user_id: &str) -> String {
    format!("{}{user_id}", cursors_prefix(board))
}

/// Prefix covering every cursor on a board.
#[must_use]
pub fn cursors_prefix(board: &BoardId) -> String {
    format!("boards/{board}/cursors/")
}

/// Path of a participant's status record.
#[must_use]
pub fn status_path(user_id: &str) -> String {
    format!("status/{user_id}")
}

/// Path of one activity event on a board.
#[must_use]
pub fn activity_path(board: &BoardId, event_id: &str) -> String {
    format!("{}{event_id}", activity_prefix(board))
}

/// Prefix covering every activity event on a board.
#[must_use]
pub fn activity_prefix(board: &BoardId) -> String {
    format!("boards/{board}/activity/")
}

/// Owner key for disconnect actions registered by one participant's
/// connection to one board.
#[must_use]
pub fn connection_owner(board: &BoardId, user_id: &str) -> String {
    format!("{board}/{user_id}")
}

/// What the store does with a path when its owner's connection drops.
#[derive(Debug, Clone, PartialEq)]
pub enum DisconnectAction {
    /// Delete the value.
    Remove,
    /// Overwrite the value.
    Set(Value),
    /// Overwrite the value with an object, writing the time the action runs
    /// under `field`.
    SetStamped {
        /// Fields written as given.
        fields: Map<String, Value>,
        /// Field that receives the current time.
        field: String,
    },
}

/// A push-capable realtime store.
#[async_trait]
pub trait RealtimeStore: Send + Sync + Debug {
    /// Write a value, replacing whatever was there.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the write.
    async fn set(&self, path: &str, value: Value) -> Result<()>;

    /// Merge fields into an object value, creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the write.
    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()>;

    /// Delete a value. Removing a missing path is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the write.
    async fn remove(&self, path: &str) -> Result<()>;

    /// Every value whose path starts with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    async fn snapshot(&self, prefix: &str) -> Result<RealtimeSnapshot>;

    /// Watch every value under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    async fn subscribe(&self, prefix: &str) -> Result<RealtimeSubscription>;

    /// Register an action to run when `owner` disconnects.
    ///
    /// Delivery is best effort; readers must still filter stale values.
    ///
    /// # Errors
    ///
    /// Returns an error if the registration is rejected.
    async fn on_disconnect(&self, owner: &str, path: &str, action: DisconnectAction)
        -> Result<()>;

    /// Drop every action registered by `owner`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the request.
    async fn cancel_on_disconnect(&self, owner: &str) -> Result<()>;
}

#[derive(Debug)]
struct PrefixWatch {
    prefix: String,
    sender: watch::Sender<RealtimeSnapshot>,
}

#[derive(Debug, Default)]
struct Inner {
    values: RealtimeSnapshot,
    watches: Vec<PrefixWatch>,
    on_disconnect: HashMap<String, Vec<(String, DisconnectAction)>>,
}

impl Inner {
    fn collect(&self, prefix: &str) -> RealtimeSnapshot {
        self.values
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(path, value)| (path.clone(), value.clone()))
            .collect()
    }

    fn notify(&mut self, path: &str) {
        self.watches.retain(|watch| watch.sender.receiver_count() > 0);
        let affected: Vec<(usize, String)> = self
            .watches
            .iter()
            .enumerate()
            .filter(|(_, watch)| path.starts_with(&watch.prefix))
            .map(|(index, watch)| (index, watch.prefix.clone()))
            .collect();
        for (index, prefix) in affected {
            let snapshot = self.collect(&prefix);
            trace!("Notifying watchers of {} ({} values)", prefix, snapshot.len());
            self.watches[index].sender.send_replace(snapshot);
        }
    }

    fn apply(&mut self, path: &str, action: DisconnectAction) {
        match action {
            DisconnectAction::Remove => {
                self.values.remove(path);
            }
            DisconnectAction::Set(value) => {
                self.values.insert(path.to_string(), value);
            }
            DisconnectAction::SetStamped { mut fields, field } => {
                let now = Utc::now().to_rfc3339_opts(SecondsFormat::AutoSi, true);
                fields.insert(field, Value::String(now));
                self.values.insert(path.to_string(), Value::Object(fields));
            }
        }
        self.notify(path);
    }
}

/// In-process realtime store shared by every session in the process.
///
/// Wrap it in an `Arc` and hand clones to each participant's session.
#[derive(Debug, Default)]
pub struct MemoryRealtimeStore {
    inner: Mutex<Inner>,
}

impl MemoryRealtimeStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate `owner`'s connection dropping: run and clear its registered
    /// actions.
    ///
    /// Returns how many actions ran.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn disconnect(&self, owner: &str) -> Result<usize> {
        let mut inner = self.lock()?;
        let actions = inner.on_disconnect.remove(owner).unwrap_or_default();
        let count = actions.len();
        for (path, action) in actions {
            inner.apply(&path, action);
        }
        debug!("Ran {} disconnect actions for {}", count, owner);
        Ok(count)
    }

    /// Number of stored values.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.values.len())
    }

    /// Whether the store holds no values.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.values.is_empty())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::store_unavailable("realtime store lock poisoned"))
    }
}

#[async_trait]
impl RealtimeStore for MemoryRealtimeStore {
    async fn set(&self, path: &str, value: Value) -> Result<()> {
        self.lock()?.apply(path, DisconnectAction::Set(value));
        Ok(())
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()> {
        let mut inner = self.lock()?;
        let merged = match inner.values.remove(path) {
            Some(Value::Object(mut existing)) => {
                existing.extend(fields);
                existing
            }
            _ => fields,
        };
        inner.apply(path, DisconnectAction::Set(Value::Object(merged)));
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.values.contains_key(path) {
            inner.apply(path, DisconnectAction::Remove);
        }
        Ok(())
    }

    async fn snapshot(&self, prefix: &str) -> Result<RealtimeSnapshot> {
        Ok(self.lock()?.collect(prefix))
    }

    async fn subscribe(&self, prefix: &str) -> Result<RealtimeSubscription> {
        let mut inner = self.lock()?;
        let (sender, receiver) = watch::channel(inner.collect(prefix));
        inner.watches.push(PrefixWatch {
            prefix: prefix.to_string(),
            sender,
        });
        Ok(receiver)
    }

    async fn on_disconnect(
        &self,
        owner: &str,
        path: &str,
        action: DisconnectAction,
    ) -> Result<()> {
        self.lock()?
            .on_disconnect
            .entry(owner.to_string())
            .or_default()
            .push((path.to_string(), action));
        Ok(())
    }

    async fn cancel_on_disconnect(&self, owner: &str) -> Result<()> {
        self.lock()?.on_disconnect.remove(owner);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn board() -> BoardId {
        BoardId::parse("b1").unwrap()
    }

    #[test]
    fn test_paths() {
        assert_eq!(cursor_path(&board(), "u1"), "boards/b1/cursors/u1");
        assert_eq!(status_path("u1"), "status/u1");
        assert_eq!(activity_path(&board(), "e1"), "boards/b1/activity/e1");
        assert!(cursor_path(&board(), "u1").starts_with(&cursors_prefix(&board())));
        assert_eq!(connection_owner(&board(), "u1"), "b1/u1");
    }

    #[tokio::test]
    async fn test_set_and_snapshot_by_prefix() {
        let store = MemoryRealtimeStore::new();
        store.set("boards/b1/cursors/u1", json!(1)).await.unwrap();
        store.set("boards/b10/cursors/u2", json!(2)).await.unwrap();
        store.set("status/u1", json!(3)).await.unwrap();

        let snapshot = store.snapshot("boards/b1/").await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot["boards/b1/cursors/u1"], json!(1));
        assert_eq!(store.len().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let store = MemoryRealtimeStore::new();
        store
            .set("status/u1", json!({"online": true, "display_name": "Ana"}))
            .await
            .unwrap();

        let mut fields = Map::new();
        fields.insert("online".to_string(), json!(false));
        store.update("status/u1", fields).await.unwrap();

        let snapshot = store.snapshot("status/").await.unwrap();
        assert_eq!(
            snapshot["status/u1"],
            json!({"online": false, "display_name": "Ana"})
        );
    }

    #[tokio::test]
    async fn test_remove_missing_is_ok() {
        let store = MemoryRealtimeStore::new();
        store.remove("nothing/here").await.unwrap();
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_subscribe_sees_changes_under_prefix() {
        let store = MemoryRealtimeStore::new();
        let mut rx = store.subscribe("boards/b1/cursors/").await.unwrap();
        assert!(rx.borrow().is_empty());

        store.set("boards/b1/cursors/u1", json!({"x": 1})).await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().len(), 1);

        store.set("boards/b1/activity/e1", json!({})).await.unwrap();
        assert!(!rx.has_changed().unwrap());

        store.remove("boards/b1/cursors/u1").await.unwrap();
        assert!(rx.borrow_and_update().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_runs_registered_actions() {
        let store = MemoryRealtimeStore::new();
        store.set("boards/b1/cursors/u1", json!({})).await.unwrap();
        store
            .on_disconnect("u1", "boards/b1/cursors/u1", DisconnectAction::Remove)
            .await
            .unwrap();
        store
            .on_disconnect("u1", "status/u1", DisconnectAction::Set(json!({"online": false})))
            .await
            .unwrap();

        assert_eq!(store.disconnect("u1").unwrap(), 2);
        let snapshot = store.snapshot("").await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot["status/u1"], json!({"online": false}));

        assert_eq!(store.disconnect("u1").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stamped_action_records_disconnect_time() {
        let store = MemoryRealtimeStore::new();
        let mut fields = Map::new();
        fields.insert("online".to_string(), json!(false));
        store
            .on_disconnect(
                "b1/u1",
                "status/u1",
                DisconnectAction::SetStamped {
                    fields,
                    field: "last_active".to_string(),
                },
            )
            .await
            .unwrap();

        let before = Utc::now();
        store.disconnect("b1/u1").unwrap();

        let snapshot = store.snapshot("status/").await.unwrap();
        let status = &snapshot["status/u1"];
        assert_eq!(status["online"], json!(false));
        let stamped: chrono::DateTime<Utc> =
            serde_json::from_value(status["last_active"].clone()).unwrap();
        assert!(stamped >= before);
    }

    #[tokio::test]
    async fn test_cancel_on_disconnect() {
        let store = MemoryRealtimeStore::new();
        store.set("status/u1", json!({"online": true})).await.unwrap();
        store
            .on_disconnect("u1", "status/u1", DisconnectAction::Remove)
            .await
            .unwrap();
        store.cancel_on_disconnect("u1").await.unwrap();

        assert_eq!(store.disconnect("u1").unwrap(), 0);
        assert_eq!(store.len().unwrap(), 1);
    }
}
