//! # Iris Loader
//!
//! Turns a directory of shared libraries into a table of versioned module
//! factories. Each library exports a four-symbol ABI (`name`, `version`,
//! `make`, `destroy`); libraries sharing a `name()` merge into one
//! [`Descriptor`] indexed by version. The [`Module`] trait defines the
//! contract the scheduler drives, and [`declare_module!`] emits the ABI
//! exports for plugin crates.

pub mod descriptor;
pub mod error;
pub mod loader;
pub mod module;

// Re-export public API
pub use descriptor::Descriptor;
pub use error::{LoaderError, LoaderResult};
pub use loader::{preload_dependencies, Loader};
pub use module::Module;
