use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::storage::SecureStorage;

/// Observable lifecycle of the persisted session token.
///
/// ```text
/// Uninitialized -> Loading -> Loaded(token | None)
/// Loaded(old) -> Optimistic(new) -> Loaded(new)                 write succeeded
/// Optimistic(new) -> Reconciling(new) -> Loaded(durable value)  write failed
/// ```
#[derive(Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Uninitialized,
    Loading,
    Loaded(Option<String>),
    Optimistic(Option<String>),
    Reconciling(Option<String>),
}

impl SessionState {
    /// True until the initial storage read has resolved
    pub fn is_loading(&self) -> bool {
        matches!(self, SessionState::Uninitialized | SessionState::Loading)
    }

    /// Token currently visible to the app (optimistic values included)
    pub fn token(&self) -> Option<&str> {
        match self {
            SessionState::Uninitialized | SessionState::Loading => None,
            SessionState::Loaded(token)
            | SessionState::Optimistic(token)
            | SessionState::Reconciling(token) => token.as_deref(),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            loading: self.is_loading(),
            token: self.token().map(str::to_string),
        }
    }
}

// Tokens never end up in logs or panic messages
impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn redact(token: &Option<String>) -> &'static str {
            if token.is_some() {
                "Some(<redacted>)"
            } else {
                "None"
            }
        }
        match self {
            SessionState::Uninitialized => write!(f, "Uninitialized"),
            SessionState::Loading => write!(f, "Loading"),
            SessionState::Loaded(t) => write!(f, "Loaded({})", redact(t)),
            SessionState::Optimistic(t) => write!(f, "Optimistic({})", redact(t)),
            SessionState::Reconciling(t) => write!(f, "Reconciling({})", redact(t)),
        }
    }
}

/// `(loading, token)` pair handed to UI consumers
#[derive(Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub loading: bool,
    pub token: Option<String>,
}

impl fmt::Debug for SessionSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSnapshot")
            .field("loading", &self.loading)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Persists a single named token in secure storage and exposes it as
/// observable state.
///
/// Storage failures never escape: reads degrade to "signed out" and failed
/// writes roll the observable state back to whatever is durably stored.
pub struct SessionStore {
    storage: Arc<dyn SecureStorage>,
    key: String,
    state: watch::Sender<SessionState>,
    // Bumped by every write; stale completions must not clobber newer state
    generation: AtomicU64,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn SecureStorage>, key: impl Into<String>) -> Self {
        let (state, _) = watch::channel(SessionState::Uninitialized);
        Self {
            storage,
            key: key.into(),
            state,
            generation: AtomicU64::new(0),
        }
    }

    /// Create a store and perform the initial load
    pub async fn open(storage: Arc<dyn SecureStorage>, key: impl Into<String>) -> Self {
        let store = Self::new(storage, key);
        store.load().await;
        store
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Fetch the durable value. Any storage error is logged and read as `None`.
    pub async fn read(&self) -> Option<String> {
        match self.storage.get_item(&self.key).await {
            Ok(value) => value,
            Err(e) => {
                error!(key = %self.key, error = %e, "Failed to load storage item");
                None
            }
        }
    }

    /// Initial load: `Loading` until the storage lookup resolves either way.
    pub async fn load(&self) {
        let generation = self.generation.load(Ordering::SeqCst);
        self.state.send_replace(SessionState::Loading);

        let value = self.read().await;

        // A write that started mid-load already owns the observable state
        let applied = self.state.send_if_modified(|state| {
            if self.generation.load(Ordering::SeqCst) == generation {
                *state = SessionState::Loaded(value);
                true
            } else {
                false
            }
        });
        debug!(key = %self.key, applied, "Session load resolved");
    }

    /// Store `value` (or delete on `None`), updating observable state first.
    ///
    /// Returns once the durable write and any reconciliation have finished.
    pub async fn write(&self, value: Option<String>) {
        let generation = self.begin_write(&value);
        self.commit(generation, value).await;
    }

    /// Fire-and-forget [`write`](Self::write): the optimistic update happens
    /// before this returns, the durable write runs on the runtime.
    pub fn set(self: &Arc<Self>, value: Option<String>) -> JoinHandle<()> {
        let generation = self.begin_write(&value);
        let store = Arc::clone(self);
        tokio::spawn(async move { store.commit(generation, value).await })
    }

    fn begin_write(&self, value: &Option<String>) -> u64 {
        let mut generation = 0;
        self.state.send_modify(|state| {
            generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *state = SessionState::Optimistic(value.clone());
        });
        generation
    }

    async fn commit(&self, generation: u64, value: Option<String>) {
        match self.storage.put_item(&self.key, value.as_deref()).await {
            Ok(()) => {
                self.state.send_if_modified(|state| {
                    if self.generation.load(Ordering::SeqCst) == generation {
                        *state = SessionState::Loaded(value);
                        true
                    } else {
                        false
                    }
                });
            }
            Err(e) => {
                error!(key = %self.key, error = %e, "Failed to save storage item");
                self.state.send_replace(SessionState::Reconciling(value));

                let reconciled = match self.storage.get_item(&self.key).await {
                    Ok(current) => current,
                    Err(e) => {
                        warn!(key = %self.key, error = %e, "Reconciliation read failed, clearing session");
                        None
                    }
                };
                self.state.send_replace(SessionState::Loaded(reconciled));
            }
        }
    }
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("key", &self.key)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::storage::{MemoryStorage, StorageError};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::Notify;

    /// Storage double whose reads and writes can be made to fail
    #[derive(Default)]
    struct FlakyStorage {
        inner: MemoryStorage,
        fail_reads: AtomicBool,
        fail_writes: AtomicBool,
    }

    #[async_trait]
    impl SecureStorage for FlakyStorage {
        async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(StorageError::Unavailable("device locked".to_string()));
            }
            self.inner.get_item(key).await
        }

        async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StorageError::Unavailable("device locked".to_string()));
            }
            self.inner.set_item(key, value).await
        }

        async fn delete_item(&self, key: &str) -> Result<(), StorageError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StorageError::Unavailable("device locked".to_string()));
            }
            self.inner.delete_item(key).await
        }
    }

    /// Storage double whose reads hold their result until released
    #[derive(Default)]
    struct GatedStorage {
        inner: MemoryStorage,
        read_started: Notify,
        release: Notify,
    }

    #[async_trait]
    impl SecureStorage for GatedStorage {
        async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
            let value = self.inner.get_item(key).await;
            self.read_started.notify_one();
            self.release.notified().await;
            value
        }

        async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
            self.inner.set_item(key, value).await
        }

        async fn delete_item(&self, key: &str) -> Result<(), StorageError> {
            self.inner.delete_item(key).await
        }
    }

    fn memory() -> Arc<MemoryStorage> {
        Arc::new(MemoryStorage::new())
    }

    #[tokio::test]
    async fn test_new_store_is_uninitialized_and_loading() {
        let store = SessionStore::new(memory(), "session");
        assert_eq!(store.state(), SessionState::Uninitialized);
        assert!(store.snapshot().loading);
        assert_eq!(store.snapshot().token, None);
    }

    #[tokio::test]
    async fn test_load_existing_token() {
        let storage = memory();
        storage.set_item("session", "abc123").await.unwrap();

        let store = SessionStore::open(storage, "session").await;
        assert_eq!(store.state(), SessionState::Loaded(Some("abc123".to_string())));
        assert!(!store.snapshot().loading);
    }

    #[tokio::test]
    async fn test_load_read_failure_resolves_to_signed_out() {
        let storage = Arc::new(FlakyStorage::default());
        storage.inner.set_item("session", "abc123").await.unwrap();
        storage.fail_reads.store(true, Ordering::SeqCst);

        let store = SessionStore::open(storage, "session").await;
        let snapshot = store.snapshot();
        assert!(!snapshot.loading);
        assert_eq!(snapshot.token, None);
        assert_eq!(store.state(), SessionState::Loaded(None));
    }

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let store = SessionStore::open(memory(), "session").await;
        store.write(Some("abc123".to_string())).await;

        assert_eq!(store.read().await.as_deref(), Some("abc123"));
        assert_eq!(store.state(), SessionState::Loaded(Some("abc123".to_string())));
    }

    #[tokio::test]
    async fn test_write_none_when_empty_is_idempotent() {
        let store = SessionStore::open(memory(), "session").await;
        store.write(None).await;
        store.write(None).await;

        assert_eq!(store.state(), SessionState::Loaded(None));
        assert_eq!(store.read().await, None);
    }

    #[tokio::test]
    async fn test_write_none_clears_token() {
        let storage = memory();
        storage.set_item("session", "abc123").await.unwrap();
        let store = SessionStore::open(storage.clone(), "session").await;

        store.write(None).await;
        assert_eq!(store.state(), SessionState::Loaded(None));
        assert_eq!(storage.get_item("session").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_updates_state_before_durable_write() {
        let store = Arc::new(SessionStore::open(memory(), "session").await);

        let handle = store.set(Some("abc123".to_string()));
        // Visible immediately, even though the durable write may not have run
        assert_eq!(store.snapshot().token.as_deref(), Some("abc123"));
        assert!(matches!(
            store.state(),
            SessionState::Optimistic(_) | SessionState::Loaded(_)
        ));

        handle.await.unwrap();
        assert_eq!(store.state(), SessionState::Loaded(Some("abc123".to_string())));
    }

    #[tokio::test]
    async fn test_failed_write_rolls_back_to_durable_value() {
        let storage = Arc::new(FlakyStorage::default());
        storage.inner.set_item("session", "old").await.unwrap();
        let store = SessionStore::open(storage.clone(), "session").await;

        storage.fail_writes.store(true, Ordering::SeqCst);
        store.write(Some("new".to_string())).await;

        assert_eq!(store.state(), SessionState::Loaded(Some("old".to_string())));
    }

    #[tokio::test]
    async fn test_failed_write_and_failed_reconcile_signs_out() {
        let storage = Arc::new(FlakyStorage::default());
        storage.inner.set_item("session", "old").await.unwrap();
        let store = SessionStore::open(storage.clone(), "session").await;

        storage.fail_writes.store(true, Ordering::SeqCst);
        storage.fail_reads.store(true, Ordering::SeqCst);
        store.write(Some("new".to_string())).await;

        assert_eq!(store.state(), SessionState::Loaded(None));
    }

    #[tokio::test]
    async fn test_subscribers_observe_transitions() {
        let store = Arc::new(SessionStore::open(memory(), "session").await);
        let mut rx = store.subscribe();
        assert_eq!(rx.borrow_and_update().token(), None);

        store.write(Some("abc123".to_string())).await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().token(), Some("abc123"));

        store.write(None).await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), SessionState::Loaded(None));
    }

    #[tokio::test]
    async fn test_stale_success_does_not_clobber_newer_write() {
        let store = SessionStore::open(memory(), "session").await;

        let first = store.begin_write(&Some("first".to_string()));
        let second = store.begin_write(&Some("second".to_string()));

        // The older write resolves last-but-one; newest optimistic value stays
        store.commit(first, Some("first".to_string())).await;
        assert_eq!(store.state(), SessionState::Optimistic(Some("second".to_string())));

        store.commit(second, Some("second".to_string())).await;
        assert_eq!(store.state(), SessionState::Loaded(Some("second".to_string())));
    }

    #[tokio::test]
    async fn test_load_resolving_after_write_keeps_written_value() {
        let storage = Arc::new(GatedStorage::default());
        storage.inner.set_item("session", "stale").await.unwrap();
        let store = Arc::new(SessionStore::new(storage.clone(), "session"));

        let loader = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.load().await })
        };
        storage.read_started.notified().await;
        assert_eq!(store.state(), SessionState::Loading);

        // Sign in while the initial read is still outstanding
        let writer = store.set(Some("fresh".to_string()));
        assert_eq!(store.state(), SessionState::Optimistic(Some("fresh".to_string())));
        writer.await.unwrap();
        assert_eq!(store.state(), SessionState::Loaded(Some("fresh".to_string())));

        // The load now resolves with the value it read before the write
        storage.release.notify_one();
        loader.await.unwrap();
        assert_eq!(store.state(), SessionState::Loaded(Some("fresh".to_string())));
        assert_eq!(
            storage.inner.get_item("session").await.unwrap().as_deref(),
            Some("fresh")
        );
    }

    #[tokio::test]
    async fn test_load_resolving_during_pending_write_keeps_optimistic_value() {
        let storage = Arc::new(GatedStorage::default());
        let store = Arc::new(SessionStore::new(storage.clone(), "session"));

        let loader = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.load().await })
        };
        storage.read_started.notified().await;

        // Optimistic update only; the durable write has not run yet
        let generation = store.begin_write(&Some("fresh".to_string()));

        storage.release.notify_one();
        loader.await.unwrap();
        assert_eq!(store.state(), SessionState::Optimistic(Some("fresh".to_string())));

        store.commit(generation, Some("fresh".to_string())).await;
        assert_eq!(store.state(), SessionState::Loaded(Some("fresh".to_string())));
    }

    #[test]
    fn test_debug_redacts_token() {
        let state = SessionState::Loaded(Some("super-secret".to_string()));
        let rendered = format!("{:?}", state);
        assert!(!rendered.contains("super-secret"));
        assert_eq!(rendered, "Loaded(Some(<redacted>))");

        let snapshot = state.snapshot();
        assert!(!format!("{:?}", snapshot).contains("super-secret"));
    }
}
