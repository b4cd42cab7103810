//! Plan graph execution.
//!
//! A plan is a DAG of `TaskNode`s. `dag` validates a dependency listing and
//! produces a deterministic topological order. `executor` runs a plan in
//! readiness waves: every task whose dependencies have all succeeded is
//! dispatched together, and readiness is recomputed once the wave settles.

pub mod dag;
pub mod executor;

pub use dag::{is_topological, topological_order};
pub use executor::{ExecutionReport, Executor, ExecutorConfig};
