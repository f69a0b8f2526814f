//! # strata-graph
//!
//! The migration dependency graph for the strata engine. Migrations are
//! nodes identified by `(app_label, name)`; dependencies are directed edges.
//! The graph computes topologically valid application and unapplication
//! plans, detects cycles with exact diagnostics, finds per-scope roots and
//! leaves, and folds a cumulative project state from an ordered plan.
//!
//! ## Module Overview
//!
//! - [`node`] - `NodeKey` and the `StateMutation` capability trait
//! - [`graph`] - `DependencyGraph`
//!
//! The graph is a read-mostly structure: build it fully, then query it.
//! Queries are `&self` and safe to run concurrently once mutation stops;
//! the graph itself performs no locking.

pub mod graph;
pub mod node;

// Re-export key types at the crate root.
pub use graph::DependencyGraph;
pub use node::{NodeKey, StateMutation};
