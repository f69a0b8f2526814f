//! # strata
//!
//! A schema-migration planning and nested-transaction engine.
//!
//! Strata has two independent components and one thin caller layer:
//!
//! - [`graph`] resolves migration dependency ordering: forward and backward
//!   plans, cycle detection, per-scope roots and leaves, and a cumulative
//!   project-state fold.
//! - [`atomic`] tracks nested transactional scopes over a single logical
//!   connection: savepoints, merged scopes, rollback flags, and autocommit
//!   guarding.
//! - [`executor`] wires the two together: it asks the graph for a plan and
//!   applies each step inside a scope from the tracker.
//!
//! The components never talk to each other directly, and neither performs
//! any I/O of its own: the graph consumes per-node
//! [`StateMutation`](strata_graph::StateMutation) capabilities, the tracker
//! an injected [`TransactionBackend`](strata_atomic::TransactionBackend),
//! and the executor a [`StepApplier`].

/// Core types, settings, and the error taxonomy.
pub use strata_core as core;

/// Migration dependency graph and plan resolution.
pub use strata_graph as graph;

/// Nested atomic transaction-scope tracking.
pub use strata_atomic as atomic;

pub mod executor;

// Re-export the working set at the crate root.
pub use executor::{Plan, PlanExecutor, PlanStep, Recorder, StepApplier};
pub use strata_atomic::{TransactionBackend, TransactionTracker};
pub use strata_core::{Settings, StrataError, StrataResult};
pub use strata_graph::{DependencyGraph, NodeKey, StateMutation};
