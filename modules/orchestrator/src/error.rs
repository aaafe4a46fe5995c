//! Error types for the orchestrator

use thiserror::Error;

/// Result type for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Errors that can occur while building or driving a graph.
///
/// Configuration problems never surface here: an unreadable or empty
/// pipeline document degrades to an empty graph with a warning. What does
/// surface is the one condition that cannot be scheduled around.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// The priority solve exceeded its recursion budget, which means the
    /// declared inputs and outputs form a loop.
    #[error("possible loop in graph {graph}: solve exceeded depth {depth} at module {module}")]
    CyclicGraph {
        graph: String,
        module: String,
        depth: u32,
    },
}
