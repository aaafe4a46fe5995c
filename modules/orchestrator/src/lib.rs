//! # Iris Orchestrator
//!
//! Arranges loaded modules into named graphs, solves an execution order
//! from their declared inputs and outputs, and drives one tick of every
//! graph per iteration from a dedicated worker thread per module. The
//! [`Manager`] supervises all graphs and owns the process lifecycle: it
//! starts them, reloads them when the pipeline document changes, and tears
//! everything down when a module raises the exit flag.

pub mod error;
pub mod graph;
pub mod manager;
pub mod module_host;
pub mod solver;

// Re-export public API
pub use error::{OrchestratorError, OrchestratorResult};
pub use graph::Graph;
pub use manager::{Manager, EXIT_FLAG_KEY};
pub use module_host::ModuleHost;
pub use solver::{ModuleIo, Solver, MAX_SOLVE_DEPTH};
