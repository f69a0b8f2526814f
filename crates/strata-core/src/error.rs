//! Error types for the strata migration engine.
//!
//! All engine failures surface through the single [`StrataError`] enum.
//! Graph-resolution errors carry node identifiers; cycle errors carry the
//! exact offending cycle so the caller can point at the misconfigured
//! migrations rather than just learning that "a cycle exists".

use thiserror::Error;

/// Renders a dependency cycle as `scope.name -> scope.name -> ...`.
fn format_cycle(cycle: &[(String, String)]) -> String {
    cycle
        .iter()
        .map(|(app_label, name)| format!("{app_label}.{name}"))
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// The primary error type for the strata engine.
///
/// Covers graph-resolution failures, transaction-protocol misuse, opaque
/// backend statement failures, and configuration problems.
#[derive(Error, Debug)]
pub enum StrataError {
    // ── Graph resolution ─────────────────────────────────────────────

    /// A dependency edge references a node that was never added.
    ///
    /// This is a programmer error in the layer feeding the graph and is
    /// never recovered internally.
    #[error("Dependency references nonexistent node {0}")]
    MissingNode(String),

    /// A plan was requested for a node that is not in the graph.
    #[error("Node {0} is not a valid node")]
    InvalidNode(String),

    /// The graph contains an impossible-to-resolve dependency cycle.
    ///
    /// The payload is the cycle itself, from the first occurrence of the
    /// repeated node through the closing edge.
    #[error("Circular dependency detected: {}", format_cycle(.cycle))]
    CircularDependency {
        /// The offending cycle; first and last entries are the same node.
        cycle: Vec<(String, String)>,
    },

    // ── Transactions ─────────────────────────────────────────────────

    /// The transaction-scope protocol was misused (commit inside an atomic
    /// block, autocommit change at non-zero depth, queries on a dirty
    /// scope, and so on). Always surfaced, never silently fixed.
    #[error("Transaction management error: {0}")]
    TransactionManagement(String),

    /// An opaque failure from the transactional backend. The tracker only
    /// reacts by flipping its rollback flag; the message passes through
    /// verbatim.
    #[error("Database error: {0}")]
    Database(String),

    // ── Configuration ────────────────────────────────────────────────

    /// A settings value is missing or cannot be parsed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ── IO ───────────────────────────────────────────────────────────

    /// An I/O error occurred (e.g. while reading a settings file).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience type alias for `Result<T, StrataError>`.
pub type StrataResult<T> = Result<T, StrataError>;
