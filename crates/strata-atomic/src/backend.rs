//! The transactional backend capability.
//!
//! [`TransactionBackend`] is the minimal interface the scope tracker needs
//! from a database connection. Concrete drivers live outside this crate;
//! the tracker only ever sees this trait, injected at construction.

use strata_core::StrataResult;

/// Begin/commit/rollback/savepoint primitives on one logical connection.
///
/// Implementations map these to whatever their driver speaks. Any error
/// returned here is treated as opaque: the tracker marks the current scope
/// as needing rollback and passes the error through unchanged.
#[async_trait::async_trait]
pub trait TransactionBackend: Send + Sync {
    /// Opens a transaction.
    async fn execute_begin(&self) -> StrataResult<()>;

    /// Commits the open transaction.
    async fn execute_commit(&self) -> StrataResult<()>;

    /// Rolls back the open transaction entirely.
    async fn execute_rollback(&self) -> StrataResult<()>;

    /// Creates a savepoint with the given identifier.
    async fn execute_savepoint(&self, id: &str) -> StrataResult<()>;

    /// Rolls back to a previously created savepoint.
    async fn execute_savepoint_rollback(&self, id: &str) -> StrataResult<()>;

    /// Releases a previously created savepoint.
    async fn execute_release_savepoint(&self, id: &str) -> StrataResult<()>;

    /// Whether this connection supports savepoints at all. Backends that
    /// return `false` get merged frames for every nested scope.
    fn supports_savepoints(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The trait must stay object-safe: the tracker holds `&dyn`.
    fn _assert_object_safe(_: &dyn TransactionBackend) {}
}
