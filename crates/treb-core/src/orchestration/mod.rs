//! Dependency-graph orchestration.
//!
//! A plan document declares components and their deps. [`ExecutionPlan`]
//! validates and ranks them, then [`Executor`] runs each component's script in
//! rank order, ingesting every result before any dependent starts.

pub mod executor;
pub mod graph;
pub mod plan;

pub use executor::{ComponentOutcome, ComponentState, Executor, RunConfig, RunReport};
pub use graph::{ExecutionPlan, PlannedComponent};
pub use plan::{Component, OrchestrationPlan};
