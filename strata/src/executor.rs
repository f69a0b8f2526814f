//! Plan building and execution.
//!
//! This is the caller layer between the dependency graph and the
//! transaction tracker. [`PlanExecutor`] turns a graph plus a record of
//! applied migrations into an ordered [`Plan`] of forward or backward
//! [`PlanStep`]s, then executes the plan through an injected
//! [`StepApplier`], wrapping each step in an atomic scope from a
//! [`TransactionTracker`].
//!
//! The physical work of applying a step (DDL, data moves, whatever the
//! embedding system does) lives entirely behind `StepApplier`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use strata_atomic::TransactionTracker;
use strata_core::{StrataError, StrataResult};
use strata_graph::{DependencyGraph, NodeKey};

/// The capability that physically applies or reverts one migration node.
#[async_trait::async_trait]
pub trait StepApplier: Send + Sync {
    /// Applies the node's change.
    async fn apply(&self, node: &NodeKey) -> StrataResult<()>;

    /// Reverts the node's change.
    async fn unapply(&self, node: &NodeKey) -> StrataResult<()>;
}

/// A single step in a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    /// The migration node this step concerns.
    pub node: NodeKey,
    /// If `true`, this step reverts the node.
    pub backwards: bool,
}

impl PlanStep {
    /// Creates a forward (apply) step.
    pub fn forward(app_label: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            node: (app_label.into(), name.into()),
            backwards: false,
        }
    }

    /// Creates a backward (revert) step.
    pub fn backward(app_label: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            node: (app_label.into(), name.into()),
            backwards: true,
        }
    }
}

/// An ordered list of steps to execute sequentially.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    /// The ordered steps.
    pub steps: Vec<PlanStep>,
}

impl Plan {
    /// Creates a new empty plan.
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Appends a step.
    pub fn add_step(&mut self, step: PlanStep) {
        self.steps.push(step);
    }

    /// Returns whether the plan is empty.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns the number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    fn contains(&self, node: &NodeKey) -> bool {
        self.steps.iter().any(|step| &step.node == node)
    }
}

/// Tracks which migrations have been applied, with timestamps.
///
/// Purely in-memory; persisting the record is the embedding system's
/// concern. The applied set drives plan building.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    applied: HashMap<NodeKey, DateTime<Utc>>,
}

impl Recorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self {
            applied: HashMap::new(),
        }
    }

    /// Records a node as applied now.
    pub fn apply(&mut self, node: NodeKey) {
        self.applied.insert(node, Utc::now());
    }

    /// Records a node as unapplied.
    pub fn unapply(&mut self, node: &NodeKey) {
        self.applied.remove(node);
    }

    /// Returns whether a node has been applied.
    pub fn is_applied(&self, node: &NodeKey) -> bool {
        self.applied.contains_key(node)
    }

    /// Returns the applied nodes and their application times.
    pub fn applied(&self) -> &HashMap<NodeKey, DateTime<Utc>> {
        &self.applied
    }
}

/// Builds and executes migration plans.
pub struct PlanExecutor {
    recorder: Recorder,
    atomic: bool,
}

impl PlanExecutor {
    /// Creates an executor with an empty applied set. Steps run inside
    /// atomic scopes by default.
    pub fn new() -> Self {
        Self {
            recorder: Recorder::new(),
            atomic: true,
        }
    }

    /// Creates an executor with a pre-populated recorder.
    pub fn with_recorder(recorder: Recorder) -> Self {
        Self {
            recorder,
            atomic: true,
        }
    }

    /// Sets whether each step runs inside its own atomic scope.
    pub fn atomic(mut self, atomic: bool) -> Self {
        self.atomic = atomic;
        self
    }

    /// Returns a reference to the recorder.
    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    /// Returns a mutable reference to the recorder.
    pub fn recorder_mut(&mut self) -> &mut Recorder {
        &mut self.recorder
    }

    /// Builds a plan to reach the target.
    ///
    /// With no target, every unapplied node across all leaves' forward
    /// plans is applied, deduplicated in first-appearance order. With an
    /// unapplied target, its forward plan is applied minus already-applied
    /// nodes. With an applied target, its applied dependents are reverted
    /// dependents-first; the target itself stays applied (migrating *back
    /// to* a node keeps it).
    pub fn make_plan<S>(
        &self,
        graph: &DependencyGraph<S>,
        target: Option<&NodeKey>,
    ) -> StrataResult<Plan> {
        let mut plan = Plan::new();

        match target {
            None => {
                for leaf in graph.leaf_nodes() {
                    for node in graph.forwards_plan(&leaf)? {
                        if !self.recorder.is_applied(&node) && !plan.contains(&node) {
                            plan.add_step(PlanStep {
                                node,
                                backwards: false,
                            });
                        }
                    }
                }
            }
            Some(target) => {
                if !graph.contains(target) {
                    return Err(StrataError::InvalidNode(format!("{target:?}")));
                }
                if self.recorder.is_applied(target) {
                    for node in graph.backwards_plan(target)? {
                        if &node != target && self.recorder.is_applied(&node) {
                            plan.add_step(PlanStep {
                                node,
                                backwards: true,
                            });
                        }
                    }
                } else {
                    for node in graph.forwards_plan(target)? {
                        if !self.recorder.is_applied(&node) {
                            plan.add_step(PlanStep {
                                node,
                                backwards: false,
                            });
                        }
                    }
                }
            }
        }

        Ok(plan)
    }

    /// Executes a plan.
    ///
    /// Each step is applied (or unapplied) through the given applier. When
    /// the executor is atomic, the step runs inside its own savepoint
    /// scope: on failure the scope rolls back, the error propagates, and
    /// every remaining step is abandoned. Steps that completed stay
    /// recorded.
    pub async fn execute(
        &mut self,
        plan: &Plan,
        applier: &dyn StepApplier,
        tracker: &TransactionTracker<'_>,
    ) -> StrataResult<()> {
        for step in &plan.steps {
            tracing::debug!(node = ?step.node, backwards = step.backwards, "executing step");
            if self.atomic {
                tracker.enter_scope(true).await?;
                let result = match tracker.validate_no_broken_transaction().await {
                    Ok(()) => Self::run_step(step, applier).await,
                    Err(err) => Err(err),
                };
                match result {
                    Ok(()) => tracker.exit_scope(false).await?,
                    Err(err) => {
                        let _ = tracker.exit_scope(true).await;
                        return Err(err);
                    }
                }
            } else {
                Self::run_step(step, applier).await?;
            }

            if step.backwards {
                self.recorder.unapply(&step.node);
            } else {
                self.recorder.apply(step.node.clone());
            }
        }
        Ok(())
    }

    async fn run_step(step: &PlanStep, applier: &dyn StepApplier) -> StrataResult<()> {
        if step.backwards {
            applier.unapply(&step.node).await
        } else {
            applier.apply(&step.node).await
        }
    }
}

impl Default for PlanExecutor {
    fn default() -> Self {
        Self::new()
    }
}
