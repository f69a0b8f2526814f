//! Nested transaction-scope tracking.
//!
//! [`TransactionTracker`] models nested atomic scopes over one logical
//! connection as a stack of frames. The outermost frame is a real
//! transaction; inner frames either hold a savepoint of their own or are
//! "merged", sharing rollback fate with the nearest ancestor frame that
//! holds one (or the root).
//!
//! The important subtlety is the rollback flag of a merged frame: it is an
//! alias, not a copy. `set_rollback(true)` inside a merged scope flags the
//! owning ancestor, and that ancestor rolls back on its own exit even when
//! no error ever reached it directly.
//!
//! One tracker serves one logical connection from one logical thread of
//! control; the internal mutex serializes calls but concurrent use of a
//! single tracker from several tasks is outside the contract.

use tokio::sync::Mutex;

use strata_core::{StrataError, StrataResult};

use crate::backend::TransactionBackend;

/// A callback queued to run after the outermost commit, tagged with the
/// stack depth at which it was registered.
type OnCommitEntry = (usize, Box<dyn FnOnce() + Send + 'static>);

/// One entry of the scope stack.
struct ScopeFrame {
    /// The savepoint this frame owns, if any. `None` for the root frame
    /// (the transaction itself is its rollback boundary) and for merged
    /// frames (which have no boundary of their own).
    savepoint: Option<String>,
    /// Whether this frame must roll back instead of committing. Only
    /// meaningful on frames that own a boundary; merged frames alias the
    /// owning ancestor's flag and never set their own.
    needs_rollback: bool,
}

/// Mutable tracker state, kept behind a single lock so every transition
/// observes a consistent stack.
struct TrackerState {
    frames: Vec<ScopeFrame>,
    autocommit: bool,
    savepoint_counter: u64,
    on_commit: Vec<OnCommitEntry>,
}

impl TrackerState {
    /// Index of the frame whose rollback flag governs the frame at `index`:
    /// the frame itself when it owns a savepoint, otherwise the nearest
    /// ancestor holding one, otherwise the root.
    fn owner_of(&self, index: usize) -> usize {
        if self.frames[index].savepoint.is_some() {
            return index;
        }
        self.frames[..index]
            .iter()
            .rposition(|frame| frame.savepoint.is_some())
            .unwrap_or(0)
    }

    /// Drops callbacks registered at or above the given stack depth. Used
    /// when a savepoint rolls back: work registered inside the discarded
    /// scope must not run at commit time.
    fn discard_callbacks_at(&mut self, depth: usize) {
        self.on_commit.retain(|(registered, _)| *registered < depth);
    }

    fn next_savepoint_id(&mut self) -> String {
        self.savepoint_counter += 1;
        format!("sp_{}", self.savepoint_counter)
    }
}

/// Tracks nested atomic scopes for one logical connection.
///
/// All physical begin/commit/rollback/savepoint work is delegated to the
/// injected [`TransactionBackend`]; failures from it propagate verbatim.
///
/// # Examples
///
/// ```ignore
/// let tracker = TransactionTracker::new(&backend);
/// atomic(&tracker, true, || async {
///     // writes here commit together or not at all
///     Ok(())
/// }).await?;
/// ```
pub struct TransactionTracker<'a> {
    backend: &'a dyn TransactionBackend,
    state: Mutex<TrackerState>,
}

impl<'a> TransactionTracker<'a> {
    /// Creates a tracker for the given backend. Autocommit starts on and
    /// the scope stack empty.
    pub fn new(backend: &'a dyn TransactionBackend) -> Self {
        Self {
            backend,
            state: Mutex::new(TrackerState {
                frames: Vec::new(),
                autocommit: true,
                savepoint_counter: 0,
                on_commit: Vec::new(),
            }),
        }
    }

    /// Enters a new atomic scope.
    ///
    /// The first scope opens a real transaction, explicitly even under
    /// autocommit (some backends autocommit across savepoint boundaries
    /// otherwise). Nested scopes create a savepoint when `savepoint` is
    /// true and the backend supports them; otherwise the new frame is
    /// merged and shares rollback fate with its owning ancestor.
    pub async fn enter_scope(&self, savepoint: bool) -> StrataResult<()> {
        let mut state = self.state.lock().await;
        if state.frames.is_empty() {
            self.backend.execute_begin().await?;
            tracing::debug!("entered outermost atomic scope");
            state.frames.push(ScopeFrame {
                savepoint: None,
                needs_rollback: false,
            });
        } else if savepoint && self.backend.supports_savepoints() {
            let sid = state.next_savepoint_id();
            self.backend.execute_savepoint(&sid).await?;
            tracing::debug!(savepoint = %sid, "entered nested atomic scope");
            state.frames.push(ScopeFrame {
                savepoint: Some(sid),
                needs_rollback: false,
            });
        } else {
            tracing::debug!("entered merged atomic scope");
            state.frames.push(ScopeFrame {
                savepoint: None,
                needs_rollback: false,
            });
        }
        Ok(())
    }

    /// Exits the innermost scope.
    ///
    /// `errored` tells the tracker whether an error is propagating out of
    /// the scope body; the caller keeps and re-raises the error itself.
    /// Without an error the scope still rolls back if its effective
    /// rollback flag was set (the forced-rollback contract). A merged
    /// frame never performs a physical rollback: it flags its owning
    /// ancestor and lets that ancestor's exit do the work.
    pub async fn exit_scope(&self, errored: bool) -> StrataResult<()> {
        let mut state = self.state.lock().await;
        if state.frames.is_empty() {
            return Err(StrataError::TransactionManagement(
                "exit_scope called outside of an atomic scope".to_string(),
            ));
        }
        let top = state.frames.len() - 1;
        let owner = state.owner_of(top);
        let depth = state.frames.len();
        let is_root = top == 0;

        if errored {
            state.frames[owner].needs_rollback = true;
        }
        let needs_rollback = state.frames[owner].needs_rollback;
        let savepoint = state.frames[top].savepoint.clone();
        state.frames.truncate(top);

        if needs_rollback {
            if let Some(sid) = savepoint {
                // The flag dies with this frame: the failure is contained
                // and outer scopes remain committable.
                state.discard_callbacks_at(depth);
                tracing::debug!(savepoint = %sid, "rolling back scope to savepoint");
                self.backend.execute_savepoint_rollback(&sid).await?;
            } else if is_root {
                state.on_commit.clear();
                tracing::debug!("rolling back transaction");
                self.backend.execute_rollback().await?;
            }
            // Merged frame with an inherited flag: nothing physical happens
            // at this level.
        } else if let Some(sid) = savepoint {
            self.backend.execute_release_savepoint(&sid).await?;
        } else if is_root {
            // Taken before the commit so a failed commit discards them
            // instead of leaking them into a later transaction.
            let callbacks = std::mem::take(&mut state.on_commit);
            self.backend.execute_commit().await?;
            tracing::debug!("committed transaction");
            drop(state);
            for (_, callback) in callbacks {
                callback();
            }
        }
        Ok(())
    }

    /// Returns the effective rollback flag of the current scope: its own
    /// when it holds a savepoint or is the root, the owning ancestor's
    /// when merged. `false` outside any scope.
    pub async fn get_rollback(&self) -> bool {
        let state = self.state.lock().await;
        if state.frames.is_empty() {
            return false;
        }
        let owner = state.owner_of(state.frames.len() - 1);
        state.frames[owner].needs_rollback
    }

    /// Sets the effective rollback flag of the current scope.
    ///
    /// `set_rollback(true)` forces the scope to roll back on exit even if
    /// no error occurs; `set_rollback(false)` is the recovery half of the
    /// manual "prevent rollback" pattern.
    pub async fn set_rollback(&self, rollback: bool) -> StrataResult<()> {
        let mut state = self.state.lock().await;
        if state.frames.is_empty() {
            return Err(StrataError::TransactionManagement(
                "The rollback flag doesn't work outside of an atomic scope".to_string(),
            ));
        }
        let owner = state.owner_of(state.frames.len() - 1);
        state.frames[owner].needs_rollback = rollback;
        Ok(())
    }

    /// Returns whether autocommit is on for this connection.
    pub async fn get_autocommit(&self) -> bool {
        self.state.lock().await.autocommit
    }

    /// Changes the autocommit mode. Only legal at depth zero.
    pub async fn set_autocommit(&self, autocommit: bool) -> StrataResult<()> {
        let mut state = self.state.lock().await;
        if !state.frames.is_empty() {
            return Err(StrataError::TransactionManagement(
                "autocommit cannot be changed inside an atomic scope".to_string(),
            ));
        }
        state.autocommit = autocommit;
        Ok(())
    }

    /// Commits the open transaction directly. Only legal outside any
    /// atomic scope, for callers running with autocommit off.
    pub async fn commit(&self) -> StrataResult<()> {
        let mut state = self.state.lock().await;
        if !state.frames.is_empty() {
            return Err(StrataError::TransactionManagement(
                "cannot commit inside an atomic scope".to_string(),
            ));
        }
        let callbacks = std::mem::take(&mut state.on_commit);
        self.backend.execute_commit().await?;
        drop(state);
        for (_, callback) in callbacks {
            callback();
        }
        Ok(())
    }

    /// Rolls back the open transaction directly. Only legal outside any
    /// atomic scope.
    pub async fn rollback(&self) -> StrataResult<()> {
        let mut state = self.state.lock().await;
        if !state.frames.is_empty() {
            return Err(StrataError::TransactionManagement(
                "cannot rollback inside an atomic scope".to_string(),
            ));
        }
        state.on_commit.clear();
        self.backend.execute_rollback().await
    }

    /// Creates a savepoint inside the current transaction and returns its
    /// identifier, for manual partial rollback.
    pub async fn savepoint(&self) -> StrataResult<String> {
        let mut state = self.state.lock().await;
        if state.frames.is_empty() {
            return Err(StrataError::TransactionManagement(
                "cannot create a savepoint outside of a transaction".to_string(),
            ));
        }
        if !self.backend.supports_savepoints() {
            return Err(StrataError::TransactionManagement(
                "this backend does not support savepoints".to_string(),
            ));
        }
        let sid = state.next_savepoint_id();
        self.backend.execute_savepoint(&sid).await?;
        Ok(sid)
    }

    /// Rolls back to a savepoint previously returned by
    /// [`savepoint`](Self::savepoint).
    pub async fn savepoint_rollback(&self, sid: &str) -> StrataResult<()> {
        let state = self.state.lock().await;
        if state.frames.is_empty() {
            return Err(StrataError::TransactionManagement(
                "cannot roll back to a savepoint outside of a transaction".to_string(),
            ));
        }
        self.backend.execute_savepoint_rollback(sid).await
    }

    /// Releases a savepoint previously returned by
    /// [`savepoint`](Self::savepoint).
    pub async fn savepoint_commit(&self, sid: &str) -> StrataResult<()> {
        let state = self.state.lock().await;
        if state.frames.is_empty() {
            return Err(StrataError::TransactionManagement(
                "cannot release a savepoint outside of a transaction".to_string(),
            ));
        }
        self.backend.execute_release_savepoint(sid).await
    }

    /// Fails when any open scope is marked for rollback: once the
    /// transaction is dirty, further statements are refused until the
    /// dirty scope ends or the caller recovers explicitly with
    /// `set_rollback(false)` at that level. Entering a fresh savepoint
    /// scope does not lift the guard.
    pub async fn validate_no_broken_transaction(&self) -> StrataResult<()> {
        let state = self.state.lock().await;
        if state.frames.iter().any(|frame| frame.needs_rollback) {
            return Err(StrataError::TransactionManagement(
                "An error occurred in the current transaction. You can't \
                 execute queries until the end of the atomic scope"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Registers a callback to run after the outermost transaction
    /// commits. With no transaction open and autocommit on, the callback
    /// runs immediately. Callbacks registered in a scope that rolls back
    /// are discarded with it.
    pub async fn on_commit<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock().await;
        if state.frames.is_empty() && state.autocommit {
            drop(state);
            callback();
        } else {
            let depth = state.frames.len();
            state.on_commit.push((depth, Box::new(callback)));
        }
    }

    /// Returns the current scope nesting depth.
    pub async fn depth(&self) -> usize {
        self.state.lock().await.frames.len()
    }

    /// Returns whether any atomic scope is open.
    pub async fn in_atomic_block(&self) -> bool {
        !self.state.lock().await.frames.is_empty()
    }

    /// Returns the number of pending on-commit callbacks.
    pub async fn pending_callbacks(&self) -> usize {
        self.state.lock().await.on_commit.len()
    }
}

/// Runs a closure inside an atomic scope.
///
/// If the closure returns `Ok`, the scope commits (or releases its
/// savepoint); if it returns `Err`, the scope rolls back and the error is
/// returned unchanged. Nested calls create savepoints when `savepoint` is
/// true, merged frames otherwise.
///
/// # Examples
///
/// ```ignore
/// let value = atomic(&tracker, true, || async {
///     apply_all_the_things().await?;
///     Ok(42)
/// })
/// .await?;
/// ```
pub async fn atomic<F, Fut, T>(
    tracker: &TransactionTracker<'_>,
    savepoint: bool,
    f: F,
) -> StrataResult<T>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = StrataResult<T>>,
{
    tracker.enter_scope(savepoint).await?;
    match f().await {
        Ok(value) => {
            tracker.exit_scope(false).await?;
            Ok(value)
        }
        Err(err) => {
            // The scope exit must not mask the original failure.
            let _ = tracker.exit_scope(true).await;
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};

    /// A mock backend that records every operation it is asked to run.
    struct MockBackend {
        statements: Mutex<Vec<String>>,
        savepoints: bool,
    }

    impl MockBackend {
        fn new() -> Self {
            Self {
                statements: Mutex::new(Vec::new()),
                savepoints: true,
            }
        }

        fn without_savepoints() -> Self {
            Self {
                statements: Mutex::new(Vec::new()),
                savepoints: false,
            }
        }

        async fn statements(&self) -> Vec<String> {
            self.statements.lock().await.clone()
        }

        async fn push(&self, statement: impl Into<String>) {
            self.statements.lock().await.push(statement.into());
        }
    }

    #[async_trait::async_trait]
    impl TransactionBackend for MockBackend {
        async fn execute_begin(&self) -> StrataResult<()> {
            self.push("BEGIN").await;
            Ok(())
        }

        async fn execute_commit(&self) -> StrataResult<()> {
            self.push("COMMIT").await;
            Ok(())
        }

        async fn execute_rollback(&self) -> StrataResult<()> {
            self.push("ROLLBACK").await;
            Ok(())
        }

        async fn execute_savepoint(&self, id: &str) -> StrataResult<()> {
            self.push(format!("SAVEPOINT {id}")).await;
            Ok(())
        }

        async fn execute_savepoint_rollback(&self, id: &str) -> StrataResult<()> {
            self.push(format!("ROLLBACK TO SAVEPOINT {id}")).await;
            Ok(())
        }

        async fn execute_release_savepoint(&self, id: &str) -> StrataResult<()> {
            self.push(format!("RELEASE SAVEPOINT {id}")).await;
            Ok(())
        }

        fn supports_savepoints(&self) -> bool {
            self.savepoints
        }
    }

    fn boom() -> StrataError {
        StrataError::Database("boom".to_string())
    }

    // ── scope entry and exit ────────────────────────────────────────

    #[tokio::test]
    async fn test_outer_scope_commits() {
        let backend = MockBackend::new();
        let tracker = TransactionTracker::new(&backend);

        tracker.enter_scope(true).await.unwrap();
        tracker.exit_scope(false).await.unwrap();

        assert_eq!(backend.statements().await, vec!["BEGIN", "COMMIT"]);
    }

    #[tokio::test]
    async fn test_outer_scope_error_rolls_back() {
        let backend = MockBackend::new();
        let tracker = TransactionTracker::new(&backend);

        tracker.enter_scope(true).await.unwrap();
        tracker.exit_scope(true).await.unwrap();

        assert_eq!(backend.statements().await, vec!["BEGIN", "ROLLBACK"]);
    }

    #[tokio::test]
    async fn test_nested_scope_creates_and_releases_savepoint() {
        let backend = MockBackend::new();
        let tracker = TransactionTracker::new(&backend);

        tracker.enter_scope(true).await.unwrap();
        tracker.enter_scope(true).await.unwrap();
        tracker.exit_scope(false).await.unwrap();
        tracker.exit_scope(false).await.unwrap();

        assert_eq!(
            backend.statements().await,
            vec!["BEGIN", "SAVEPOINT sp_1", "RELEASE SAVEPOINT sp_1", "COMMIT"]
        );
    }

    #[tokio::test]
    async fn test_inner_error_contained_by_savepoint() {
        let backend = MockBackend::new();
        let tracker = TransactionTracker::new(&backend);

        tracker.enter_scope(true).await.unwrap();
        tracker.enter_scope(true).await.unwrap();
        tracker.exit_scope(true).await.unwrap();
        // The outer scope saw no error and stays committable.
        assert!(!tracker.get_rollback().await);
        tracker.exit_scope(false).await.unwrap();

        assert_eq!(
            backend.statements().await,
            vec![
                "BEGIN",
                "SAVEPOINT sp_1",
                "ROLLBACK TO SAVEPOINT sp_1",
                "COMMIT"
            ]
        );
    }

    #[tokio::test]
    async fn test_exit_scope_outside_errors() {
        let backend = MockBackend::new();
        let tracker = TransactionTracker::new(&backend);
        assert!(matches!(
            tracker.exit_scope(false).await,
            Err(StrataError::TransactionManagement(_))
        ));
    }

    // ── merged scopes ───────────────────────────────────────────────

    #[tokio::test]
    async fn test_merged_error_forces_outer_rollback() {
        let backend = MockBackend::new();
        let tracker = TransactionTracker::new(&backend);

        tracker.enter_scope(true).await.unwrap();
        tracker.enter_scope(false).await.unwrap();
        tracker.exit_scope(true).await.unwrap();
        // No exception reached the outer scope, but the inherited flag is
        // set and its exit must roll everything back.
        assert!(tracker.get_rollback().await);
        tracker.exit_scope(false).await.unwrap();

        assert_eq!(backend.statements().await, vec!["BEGIN", "ROLLBACK"]);
    }

    #[tokio::test]
    async fn test_merged_error_rolls_back_to_owning_savepoint() {
        // root -> savepoint scope -> merged scope. The merged failure is
        // absorbed at the savepoint boundary; the root still commits.
        let backend = MockBackend::new();
        let tracker = TransactionTracker::new(&backend);

        tracker.enter_scope(true).await.unwrap();
        tracker.enter_scope(true).await.unwrap();
        tracker.enter_scope(false).await.unwrap();
        tracker.exit_scope(true).await.unwrap();
        assert!(tracker.get_rollback().await);
        tracker.exit_scope(false).await.unwrap();
        assert!(!tracker.get_rollback().await);
        tracker.exit_scope(false).await.unwrap();

        assert_eq!(
            backend.statements().await,
            vec![
                "BEGIN",
                "SAVEPOINT sp_1",
                "ROLLBACK TO SAVEPOINT sp_1",
                "COMMIT"
            ]
        );
    }

    #[tokio::test]
    async fn test_merged_ladder_outer_rollback() {
        // Three levels, both inner ones merged: the innermost failure
        // travels all the way to the root.
        let backend = MockBackend::new();
        let tracker = TransactionTracker::new(&backend);

        tracker.enter_scope(true).await.unwrap();
        tracker.enter_scope(false).await.unwrap();
        tracker.enter_scope(false).await.unwrap();
        tracker.exit_scope(true).await.unwrap();
        assert!(tracker.get_rollback().await);
        tracker.exit_scope(false).await.unwrap();
        assert!(tracker.get_rollback().await);
        tracker.exit_scope(false).await.unwrap();

        assert_eq!(backend.statements().await, vec!["BEGIN", "ROLLBACK"]);
    }

    #[tokio::test]
    async fn test_unsupported_savepoints_degrade_to_merged() {
        let backend = MockBackend::without_savepoints();
        let tracker = TransactionTracker::new(&backend);

        tracker.enter_scope(true).await.unwrap();
        tracker.enter_scope(true).await.unwrap();
        tracker.exit_scope(true).await.unwrap();
        tracker.exit_scope(false).await.unwrap();

        // No savepoint statements at all; the inner failure takes the
        // whole transaction down.
        assert_eq!(backend.statements().await, vec!["BEGIN", "ROLLBACK"]);
    }

    // ── rollback flag ───────────────────────────────────────────────

    #[tokio::test]
    async fn test_force_rollback() {
        let backend = MockBackend::new();
        let tracker = TransactionTracker::new(&backend);

        tracker.enter_scope(true).await.unwrap();
        assert!(!tracker.get_rollback().await);
        tracker.set_rollback(true).await.unwrap();
        tracker.exit_scope(false).await.unwrap();

        assert_eq!(backend.statements().await, vec!["BEGIN", "ROLLBACK"]);
    }

    #[tokio::test]
    async fn test_force_rollback_inner_scope() {
        let backend = MockBackend::new();
        let tracker = TransactionTracker::new(&backend);

        tracker.enter_scope(true).await.unwrap();
        tracker.enter_scope(true).await.unwrap();
        tracker.set_rollback(true).await.unwrap();
        tracker.exit_scope(false).await.unwrap();
        assert!(!tracker.get_rollback().await);
        tracker.exit_scope(false).await.unwrap();

        assert_eq!(
            backend.statements().await,
            vec![
                "BEGIN",
                "SAVEPOINT sp_1",
                "ROLLBACK TO SAVEPOINT sp_1",
                "COMMIT"
            ]
        );
    }

    #[tokio::test]
    async fn test_get_rollback_idempotent() {
        let backend = MockBackend::new();
        let tracker = TransactionTracker::new(&backend);

        tracker.enter_scope(true).await.unwrap();
        tracker.set_rollback(true).await.unwrap();
        assert!(tracker.get_rollback().await);
        assert!(tracker.get_rollback().await);
        assert!(tracker.get_rollback().await);
        tracker.exit_scope(false).await.unwrap();
    }

    #[tokio::test]
    async fn test_set_rollback_outside_scope_errors() {
        let backend = MockBackend::new();
        let tracker = TransactionTracker::new(&backend);
        assert!(matches!(
            tracker.set_rollback(true).await,
            Err(StrataError::TransactionManagement(_))
        ));
    }

    #[tokio::test]
    async fn test_prevent_rollback_recovery() {
        let backend = MockBackend::new();
        let tracker = TransactionTracker::new(&backend);

        tracker.enter_scope(true).await.unwrap();
        let sid = tracker.savepoint().await.unwrap();
        assert_eq!(sid, "sp_1");

        // A failure inside a merged scope dirties the outer scope...
        tracker.enter_scope(false).await.unwrap();
        tracker.exit_scope(true).await.unwrap();
        assert!(tracker.get_rollback().await);

        // ...but the caller recovers manually and keeps it committable.
        tracker.set_rollback(false).await.unwrap();
        tracker.savepoint_rollback(&sid).await.unwrap();
        tracker.exit_scope(false).await.unwrap();

        assert_eq!(
            backend.statements().await,
            vec![
                "BEGIN",
                "SAVEPOINT sp_1",
                "ROLLBACK TO SAVEPOINT sp_1",
                "COMMIT"
            ]
        );
    }

    // ── dirty-scope guard ───────────────────────────────────────────

    #[tokio::test]
    async fn test_validate_no_broken_transaction() {
        let backend = MockBackend::new();
        let tracker = TransactionTracker::new(&backend);

        tracker.enter_scope(true).await.unwrap();
        assert!(tracker.validate_no_broken_transaction().await.is_ok());

        tracker.set_rollback(true).await.unwrap();
        assert!(matches!(
            tracker.validate_no_broken_transaction().await,
            Err(StrataError::TransactionManagement(_))
        ));

        tracker.set_rollback(false).await.unwrap();
        assert!(tracker.validate_no_broken_transaction().await.is_ok());
        tracker.exit_scope(false).await.unwrap();
    }

    // ── autocommit and direct commit/rollback ───────────────────────

    #[tokio::test]
    async fn test_set_autocommit_inside_scope_errors() {
        let backend = MockBackend::new();
        let tracker = TransactionTracker::new(&backend);

        assert!(tracker.get_autocommit().await);
        tracker.enter_scope(true).await.unwrap();
        assert!(matches!(
            tracker.set_autocommit(false).await,
            Err(StrataError::TransactionManagement(_))
        ));
        // The flag must be unchanged after the refused call.
        assert!(tracker.get_autocommit().await);
        tracker.exit_scope(false).await.unwrap();
    }

    #[tokio::test]
    async fn test_set_autocommit_outside_scope() {
        let backend = MockBackend::new();
        let tracker = TransactionTracker::new(&backend);

        tracker.set_autocommit(false).await.unwrap();
        assert!(!tracker.get_autocommit().await);
        tracker.set_autocommit(true).await.unwrap();
        assert!(tracker.get_autocommit().await);
    }

    #[tokio::test]
    async fn test_commit_inside_scope_errors() {
        let backend = MockBackend::new();
        let tracker = TransactionTracker::new(&backend);

        tracker.enter_scope(true).await.unwrap();
        assert!(matches!(
            tracker.commit().await,
            Err(StrataError::TransactionManagement(_))
        ));
        assert!(matches!(
            tracker.rollback().await,
            Err(StrataError::TransactionManagement(_))
        ));
        tracker.exit_scope(false).await.unwrap();
    }

    #[tokio::test]
    async fn test_direct_commit_outside_scope() {
        let backend = MockBackend::new();
        let tracker = TransactionTracker::new(&backend);

        tracker.set_autocommit(false).await.unwrap();
        tracker.commit().await.unwrap();
        assert_eq!(backend.statements().await, vec!["COMMIT"]);
    }

    // ── manual savepoints ───────────────────────────────────────────

    #[tokio::test]
    async fn test_savepoint_outside_transaction_errors() {
        let backend = MockBackend::new();
        let tracker = TransactionTracker::new(&backend);
        assert!(matches!(
            tracker.savepoint().await,
            Err(StrataError::TransactionManagement(_))
        ));
    }

    #[tokio::test]
    async fn test_savepoint_unsupported_errors() {
        let backend = MockBackend::without_savepoints();
        let tracker = TransactionTracker::new(&backend);

        tracker.enter_scope(true).await.unwrap();
        assert!(matches!(
            tracker.savepoint().await,
            Err(StrataError::TransactionManagement(_))
        ));
        tracker.exit_scope(false).await.unwrap();
    }

    #[tokio::test]
    async fn test_savepoint_commit_releases() {
        let backend = MockBackend::new();
        let tracker = TransactionTracker::new(&backend);

        tracker.enter_scope(true).await.unwrap();
        let sid = tracker.savepoint().await.unwrap();
        tracker.savepoint_commit(&sid).await.unwrap();
        tracker.exit_scope(false).await.unwrap();

        assert_eq!(
            backend.statements().await,
            vec!["BEGIN", "SAVEPOINT sp_1", "RELEASE SAVEPOINT sp_1", "COMMIT"]
        );
    }

    // ── depth tracking ──────────────────────────────────────────────

    #[tokio::test]
    async fn test_depth_tracking() {
        let backend = MockBackend::new();
        let tracker = TransactionTracker::new(&backend);

        assert_eq!(tracker.depth().await, 0);
        assert!(!tracker.in_atomic_block().await);

        tracker.enter_scope(true).await.unwrap();
        assert_eq!(tracker.depth().await, 1);
        assert!(tracker.in_atomic_block().await);

        tracker.enter_scope(true).await.unwrap();
        assert_eq!(tracker.depth().await, 2);

        tracker.exit_scope(false).await.unwrap();
        tracker.exit_scope(false).await.unwrap();
        assert_eq!(tracker.depth().await, 0);
    }

    // ── atomic combinator ───────────────────────────────────────────

    #[tokio::test]
    async fn test_atomic_commits_on_ok() {
        let backend = MockBackend::new();
        let tracker = TransactionTracker::new(&backend);

        let value = atomic(&tracker, true, || async { Ok(42) }).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(backend.statements().await, vec!["BEGIN", "COMMIT"]);
    }

    #[tokio::test]
    async fn test_atomic_rolls_back_on_err() {
        let backend = MockBackend::new();
        let tracker = TransactionTracker::new(&backend);

        let result: StrataResult<()> = atomic(&tracker, true, || async { Err(boom()) }).await;
        assert!(matches!(result, Err(StrataError::Database(_))));
        assert_eq!(backend.statements().await, vec!["BEGIN", "ROLLBACK"]);
    }

    #[tokio::test]
    async fn test_atomic_nested() {
        let backend = MockBackend::new();
        let tracker = TransactionTracker::new(&backend);

        let result = atomic(&tracker, true, || async {
            let inner: StrataResult<()> =
                atomic(&tracker, true, || async { Err(boom()) }).await;
            assert!(inner.is_err());
            Ok("outer survives")
        })
        .await
        .unwrap();

        assert_eq!(result, "outer survives");
        assert_eq!(
            backend.statements().await,
            vec![
                "BEGIN",
                "SAVEPOINT sp_1",
                "ROLLBACK TO SAVEPOINT sp_1",
                "COMMIT"
            ]
        );
    }

    // ── on-commit callbacks ─────────────────────────────────────────

    #[tokio::test]
    async fn test_on_commit_runs_after_commit_in_order() {
        let backend = MockBackend::new();
        let tracker = TransactionTracker::new(&backend);
        let order = Arc::new(StdMutex::new(Vec::new()));

        tracker.enter_scope(true).await.unwrap();
        for n in 1..=3 {
            let order = Arc::clone(&order);
            tracker
                .on_commit(move || order.lock().unwrap().push(n))
                .await;
        }
        assert_eq!(tracker.pending_callbacks().await, 3);
        tracker.exit_scope(false).await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(tracker.pending_callbacks().await, 0);
    }

    #[tokio::test]
    async fn test_on_commit_not_run_on_rollback() {
        let backend = MockBackend::new();
        let tracker = TransactionTracker::new(&backend);
        let counter = Arc::new(AtomicUsize::new(0));

        tracker.enter_scope(true).await.unwrap();
        let c = Arc::clone(&counter);
        tracker
            .on_commit(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        tracker.exit_scope(true).await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_on_commit_immediate_without_transaction() {
        let backend = MockBackend::new();
        let tracker = TransactionTracker::new(&backend);
        let counter = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&counter);
        tracker
            .on_commit(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_on_commit_discarded_with_rolled_back_scope() {
        let backend = MockBackend::new();
        let tracker = TransactionTracker::new(&backend);
        let order = Arc::new(StdMutex::new(Vec::new()));

        tracker.enter_scope(true).await.unwrap();
        let o = Arc::clone(&order);
        tracker.on_commit(move || o.lock().unwrap().push("outer")).await;

        tracker.enter_scope(true).await.unwrap();
        let o = Arc::clone(&order);
        tracker.on_commit(move || o.lock().unwrap().push("inner")).await;
        // The inner scope rolls back; its callback must die with it.
        tracker.exit_scope(true).await.unwrap();

        tracker.exit_scope(false).await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["outer"]);
    }

    #[tokio::test]
    async fn test_on_commit_stored_with_autocommit_off() {
        let backend = MockBackend::new();
        let tracker = TransactionTracker::new(&backend);
        let counter = Arc::new(AtomicUsize::new(0));

        tracker.set_autocommit(false).await.unwrap();
        let c = Arc::clone(&counter);
        tracker
            .on_commit(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tracker.commit().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
