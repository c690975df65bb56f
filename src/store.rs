//! In-memory notification store.
//!
//! Single source of truth for every consumer. The list is published through a
//! `tokio::sync::watch` channel (newest first), alongside a derived unread
//! count, so consumers observe changes instead of polling.
//!
//! # Merge rules
//!
//! - A push (or local notification) is prepended, then the tail is truncated
//!   to the capacity. Truncation is purely positional: an unread item at the
//!   tail is evicted even when older read items exist elsewhere.
//! - A history load replaces the whole list with the server's snapshot.
//!   A push that arrived while the fetch was in flight is overwritten.
//!
//! # Read state
//!
//! `mark_as_read` and `mark_all_as_read` apply their change before awaiting
//! the backend. Each captures the full list first; if confirmation fails, the
//! full list is restored, discarding anything that happened in between.

// Rust guideline compliant 2026-02

use futures_util::future::join_all;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::api::NotificationApi;
use crate::notification::{BackendNotification, Notification, NotificationType};

/// Result of a read-state command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Backend confirmed; the optimistic state stands.
    Confirmed,
    /// Backend failed; the pre-command list was restored.
    RolledBack,
    /// Nothing was done (empty id).
    Skipped,
}

/// Ticket identifying one history load. Only the newest ticket may apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HistoryTicket(u64);

/// Optimistic mutation awaiting backend confirmation.
///
/// Holds the list as it was before the mutation; either committed (dropped)
/// or restored wholesale.
#[derive(Debug)]
#[must_use]
struct PendingOperation {
    label: String,
    snapshot: Vec<Notification>,
}

impl PendingOperation {
    fn commit(self) {
        log::debug!("[Store] {} confirmed", self.label);
    }

    fn restore(self, store: &NotificationStore) {
        log::info!(
            "[Store] {} failed, restoring {} notification(s)",
            self.label,
            self.snapshot.len()
        );
        store.list.send_replace(self.snapshot);
        store.publish_unread();
    }
}

/// Capacity-bounded, newest-first notification list.
#[derive(Debug)]
pub struct NotificationStore {
    capacity: usize,
    api: Arc<dyn NotificationApi>,
    list: watch::Sender<Vec<Notification>>,
    unread: watch::Sender<usize>,
    history_generation: AtomicU64,
}

impl NotificationStore {
    /// Create an empty store that confirms read state through `api`.
    pub fn new(capacity: usize, api: Arc<dyn NotificationApi>) -> Self {
        let (list, _) = watch::channel(Vec::new());
        let (unread, _) = watch::channel(0);
        Self {
            capacity,
            api,
            list,
            unread,
            history_generation: AtomicU64::new(0),
        }
    }

    /// Maximum number of notifications retained.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current list, newest first.
    pub fn snapshot(&self) -> Vec<Notification> {
        self.list.borrow().clone()
    }

    /// Number of notifications currently held.
    pub fn len(&self) -> usize {
        self.list.borrow().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.list.borrow().is_empty()
    }

    /// Live view of the list.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Notification>> {
        self.list.subscribe()
    }

    /// Current number of unread notifications.
    pub fn unread_count(&self) -> usize {
        *self.unread.borrow()
    }

    /// Live view of the unread count.
    pub fn watch_unread(&self) -> watch::Receiver<usize> {
        self.unread.subscribe()
    }

    /// Ingest a push received on hub event `event`.
    pub fn ingest_push(&self, event: &str, message: impl Into<String>) {
        let kind = NotificationType::for_event(event);
        log::debug!("[Store] Push on {} classified as {}", event, kind);
        self.prepend(Notification::transient(kind, message));
    }

    /// Add a locally originated notification.
    pub fn add(&self, kind: NotificationType, message: impl Into<String>) {
        self.prepend(Notification::transient(kind, message));
    }

    fn prepend(&self, notification: Notification) {
        let capacity = self.capacity;
        self.list.send_modify(|list| {
            list.insert(0, notification);
            list.truncate(capacity);
        });
        self.publish_unread();
    }

    /// Replace the whole list with a history snapshot, keeping its order.
    pub fn replace_from_history(&self, records: Vec<BackendNotification>) {
        let mut notifications: Vec<Notification> =
            records.into_iter().map(Notification::from).collect();
        if notifications.len() > self.capacity {
            log::debug!(
                "[Store] History has {} records, keeping newest {}",
                notifications.len(),
                self.capacity
            );
            notifications.truncate(self.capacity);
        }
        log::info!("[Store] Loaded {} notification(s) from history", notifications.len());
        self.list.send_replace(notifications);
        self.publish_unread();
    }

    /// Start a history load. Pass the ticket to [`Self::apply_history`].
    pub fn begin_history_load(&self) -> HistoryTicket {
        HistoryTicket(self.history_generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Apply a history response unless a newer load has started since.
    ///
    /// Returns `false` when the response was stale and dropped.
    pub fn apply_history(&self, ticket: HistoryTicket, records: Vec<BackendNotification>) -> bool {
        let latest = self.history_generation.load(Ordering::SeqCst);
        if ticket.0 < latest {
            log::debug!(
                "[Store] Dropping stale history response (generation {} < {})",
                ticket.0,
                latest
            );
            return false;
        }
        self.replace_from_history(records);
        true
    }

    /// Mark one notification read, optimistically.
    ///
    /// The change is visible before the backend is called. On failure the
    /// whole list reverts to its state at the time of the call.
    pub async fn mark_as_read(&self, id: &str) -> ReadOutcome {
        if id.is_empty() {
            log::warn!("[Store] mark_as_read called with an empty id");
            return ReadOutcome::Skipped;
        }

        let pending = self.begin(format!("mark_as_read({id})"), |list| {
            for n in list.iter_mut().filter(|n| n.has_id(id)) {
                n.is_read = true;
            }
        });

        match self.api.mark_read(id).await {
            Ok(()) => {
                pending.commit();
                ReadOutcome::Confirmed
            }
            Err(e) => {
                log::error!("[Store] Backend rejected read for {}: {:#}", id, e);
                pending.restore(self);
                ReadOutcome::RolledBack
            }
        }
    }

    /// Mark every notification read, optimistically.
    ///
    /// One confirmation per previously unread item with an id, issued
    /// concurrently. Any failure restores the entire pre-command list, even if
    /// other confirmations succeeded.
    pub async fn mark_all_as_read(&self) -> ReadOutcome {
        let mut to_confirm = Vec::new();
        let pending = self.begin("mark_all_as_read".to_string(), |list| {
            to_confirm = list
                .iter()
                .filter(|n| !n.is_read)
                .filter_map(|n| n.id.clone())
                .collect();
            for n in list.iter_mut() {
                n.is_read = true;
            }
        });

        let results = join_all(to_confirm.iter().map(|id| self.api.mark_read(id))).await;
        let failures: Vec<_> = to_confirm
            .iter()
            .zip(results)
            .filter_map(|(id, r)| r.err().map(|e| (id, e)))
            .collect();

        if failures.is_empty() {
            pending.commit();
            return ReadOutcome::Confirmed;
        }

        for (id, e) in &failures {
            log::error!("[Store] Backend rejected read for {}: {:#}", id, e);
        }
        log::warn!(
            "[Store] {} of {} confirmation(s) failed",
            failures.len(),
            to_confirm.len()
        );
        pending.restore(self);
        ReadOutcome::RolledBack
    }

    /// Dismiss the entry at `index` locally. Out-of-range indexes do nothing.
    pub fn remove_at(&self, index: usize) -> Option<Notification> {
        let mut removed = None;
        self.list.send_if_modified(|list| {
            if index < list.len() {
                removed = Some(list.remove(index));
                true
            } else {
                false
            }
        });
        if removed.is_some() {
            self.publish_unread();
        } else {
            log::debug!("[Store] remove_at({}) out of range", index);
        }
        removed
    }

    /// Drop every notification locally.
    pub fn clear_all(&self) {
        self.list.send_replace(Vec::new());
        self.publish_unread();
    }

    /// Snapshot the list, apply `mutate`, publish, and hand back the snapshot.
    fn begin(&self, label: String, mutate: impl FnOnce(&mut Vec<Notification>)) -> PendingOperation {
        let mut snapshot = Vec::new();
        self.list.send_modify(|list| {
            snapshot = list.clone();
            mutate(list);
        });
        self.publish_unread();
        PendingOperation { label, snapshot }
    }

    fn publish_unread(&self) {
        let count = self.list.borrow().iter().filter(|n| !n.is_read).count();
        self.unread.send_if_modified(|current| {
            let changed = *current != count;
            *current = count;
            changed
        });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tokio::sync::Semaphore;

    use crate::api::HistoryScope;

    /// Scriptable [`NotificationApi`] for store and service tests.
    #[derive(Debug, Default)]
    pub(crate) struct FakeApi {
        pub history: Mutex<Vec<BackendNotification>>,
        pub failing_ids: Mutex<HashSet<String>>,
        pub fail_history: std::sync::atomic::AtomicBool,
        pub calls: Mutex<Vec<String>>,
        pub gate: Option<Semaphore>,
    }

    impl FakeApi {
        pub fn gated() -> Self {
            Self {
                gate: Some(Semaphore::new(0)),
                ..Self::default()
            }
        }

        pub fn fail_id(&self, id: &str) {
            self.failing_ids.lock().unwrap().insert(id.to_string());
        }

        pub fn release(&self, n: usize) {
            if let Some(gate) = &self.gate {
                gate.add_permits(n);
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub async fn wait_for_calls(&self, n: usize) {
            while self.calls.lock().unwrap().len() < n {
                tokio::task::yield_now().await;
            }
        }
    }

    #[async_trait]
    impl NotificationApi for FakeApi {
        async fn fetch_history(&self, _scope: HistoryScope) -> Result<Vec<BackendNotification>> {
            if self.fail_history.load(Ordering::SeqCst) {
                anyhow::bail!("history unavailable");
            }
            Ok(self.history.lock().unwrap().clone())
        }

        async fn mark_read(&self, id: &str) -> Result<()> {
            self.calls.lock().unwrap().push(id.to_string());
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            if self.failing_ids.lock().unwrap().contains(id) {
                anyhow::bail!("500 Internal Server Error");
            }
            Ok(())
        }
    }

    pub(crate) fn record(id: &str, message: &str, is_read: bool) -> BackendNotification {
        BackendNotification {
            id: id.to_string(),
            message: message.to_string(),
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            is_read,
        }
    }

    fn store_with(api: &Arc<FakeApi>) -> Arc<NotificationStore> {
        Arc::new(NotificationStore::new(50, Arc::clone(api) as Arc<dyn NotificationApi>))
    }

    #[test]
    fn test_push_is_prepended_unread() {
        let store = store_with(&Arc::new(FakeApi::default()));
        store.ingest_push("ReceiveMessage", "first");
        store.ingest_push("ReceiveAdminMessage", "second");

        let list = store.snapshot();
        assert_eq!(list[0].message, "second");
        assert_eq!(list[0].kind, NotificationType::Info);
        assert_eq!(list[1].kind, NotificationType::Success);
        assert!(list.iter().all(|n| !n.is_read && n.id.is_none()));
        assert_eq!(store.unread_count(), 2);
    }

    #[test]
    fn test_capacity_bound_keeps_newest_first() {
        let store = store_with(&Arc::new(FakeApi::default()));
        for i in 0..120 {
            store.ingest_push("ReceiveMessage", format!("msg {i}"));
            assert!(store.len() <= 50);
        }
        let list = store.snapshot();
        assert_eq!(list.len(), 50);
        assert_eq!(list[0].message, "msg 119");
        assert_eq!(list[49].message, "msg 70");
    }

    #[test]
    fn test_history_replace_is_authoritative() {
        let store = store_with(&Arc::new(FakeApi::default()));
        store.ingest_push("ReceiveMessage", "live");
        store.replace_from_history(vec![
            record("b", "Exam expired warning", false),
            record("a", "Your exam was submitted", true),
        ]);

        let list = store.snapshot();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id.as_deref(), Some("b"));
        assert_eq!(list[0].kind, NotificationType::Warning);
        assert_eq!(list[1].id.as_deref(), Some("a"));
        assert_eq!(list[1].kind, NotificationType::Success);
        assert_eq!(store.unread_count(), 1);
    }

    #[test]
    fn test_push_then_history_scenario() {
        let store = store_with(&Arc::new(FakeApi::default()));
        store.ingest_push("ReceiveMessage", "Exam submitted");
        assert_eq!(store.len(), 1);
        assert_eq!(store.snapshot()[0].kind, NotificationType::Success);
        assert_eq!(store.unread_count(), 1);

        store.replace_from_history(vec![record("a", "x", true)]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.snapshot()[0].id.as_deref(), Some("a"));
        assert_eq!(store.unread_count(), 0);
    }

    #[test]
    fn test_stale_history_ticket_dropped() {
        let store = store_with(&Arc::new(FakeApi::default()));
        let slow = store.begin_history_load();
        let fast = store.begin_history_load();

        assert!(store.apply_history(fast, vec![record("new", "fresh", false)]));
        assert!(!store.apply_history(slow, vec![record("old", "stale", false)]));
        assert_eq!(store.snapshot()[0].id.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_mark_as_read_confirmed() {
        let api = Arc::new(FakeApi::default());
        let store = store_with(&api);
        store.replace_from_history(vec![record("n1", "m", false), record("n2", "m", false)]);

        assert_eq!(store.mark_as_read("n1").await, ReadOutcome::Confirmed);
        assert!(store.snapshot()[0].is_read);
        assert!(!store.snapshot()[1].is_read);
        assert_eq!(store.unread_count(), 1);
        assert_eq!(api.calls(), vec!["n1".to_string()]);
    }

    #[tokio::test]
    async fn test_mark_as_read_rollback_restores_entire_snapshot() {
        let api = Arc::new(FakeApi::gated());
        api.fail_id("n1");
        let store = store_with(&api);
        store.replace_from_history(vec![record("n1", "m", false)]);
        let before = store.snapshot();

        let task = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.mark_as_read("n1").await }
        });
        api.wait_for_calls(1).await;

        // Optimistic state is visible while the confirmation is in flight
        assert!(store.snapshot()[0].is_read);
        assert_eq!(store.unread_count(), 0);

        // A concurrent push is discarded by the rollback
        store.ingest_push("ReceiveMessage", "arrived meanwhile");
        assert_eq!(store.len(), 2);

        api.release(1);
        assert_eq!(task.await.unwrap(), ReadOutcome::RolledBack);
        assert_eq!(store.snapshot(), before);
        assert_eq!(store.unread_count(), 1);
    }

    #[tokio::test]
    async fn test_mark_as_read_empty_id_skipped() {
        let api = Arc::new(FakeApi::default());
        let store = store_with(&api);
        assert_eq!(store.mark_as_read("").await, ReadOutcome::Skipped);
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_mark_as_read_absent_id_is_noop_locally() {
        let api = Arc::new(FakeApi::default());
        let store = store_with(&api);
        store.replace_from_history(vec![record("n1", "m", false)]);

        assert_eq!(store.mark_as_read("gone").await, ReadOutcome::Confirmed);
        assert!(!store.snapshot()[0].is_read);
    }

    #[tokio::test]
    async fn test_mark_all_as_read_confirms_unread_with_ids() {
        let api = Arc::new(FakeApi::default());
        let store = store_with(&api);
        store.replace_from_history(vec![
            record("a", "m", false),
            record("b", "m", true),
            record("c", "m", false),
        ]);
        store.ingest_push("ReceiveMessage", "no id");

        assert_eq!(store.mark_all_as_read().await, ReadOutcome::Confirmed);
        assert_eq!(store.unread_count(), 0);
        assert!(store.snapshot().iter().all(|n| n.is_read));

        let mut calls = api.calls();
        calls.sort();
        assert_eq!(calls, vec!["a".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn test_mark_all_as_read_partial_failure_reverts_everything() {
        let api = Arc::new(FakeApi::default());
        api.fail_id("c");
        let store = store_with(&api);
        store.replace_from_history(vec![record("a", "m", false), record("c", "m", false)]);
        let before = store.snapshot();

        assert_eq!(store.mark_all_as_read().await, ReadOutcome::RolledBack);
        assert_eq!(store.snapshot(), before);
        assert_eq!(store.unread_count(), 2);
        assert_eq!(api.calls().len(), 2);
    }

    #[test]
    fn test_remove_at_bounds() {
        let store = store_with(&Arc::new(FakeApi::default()));
        store.replace_from_history(vec![record("a", "m", false), record("b", "m", true)]);
        let rx = store.subscribe();

        assert!(store.remove_at(5).is_none());
        assert!(!rx.has_changed().unwrap());

        let removed = store.remove_at(0).unwrap();
        assert_eq!(removed.id.as_deref(), Some("a"));
        assert!(rx.has_changed().unwrap());
        assert_eq!(store.len(), 1);
        assert_eq!(store.unread_count(), 0);
    }

    #[test]
    fn test_clear_all() {
        let store = store_with(&Arc::new(FakeApi::default()));
        store.ingest_push("ReceiveMessage", "x");
        store.add(NotificationType::Error, "y");
        store.clear_all();
        assert!(store.is_empty());
        assert_eq!(store.unread_count(), 0);
    }

    #[tokio::test]
    async fn test_unread_watch_tracks_changes() {
        let store = store_with(&Arc::new(FakeApi::default()));
        let mut unread = store.watch_unread();

        store.ingest_push("ReceiveMessage", "x");
        unread.changed().await.unwrap();
        assert_eq!(*unread.borrow_and_update(), 1);

        store.clear_all();
        unread.changed().await.unwrap();
        assert_eq!(*unread.borrow_and_update(), 0);
    }
}
