//! # Iris Config
//!
//! Parses hierarchical JSON configuration documents into navigable token
//! trees and reports when the file changes on disk, which is what drives
//! pipeline hot-reloads.

pub mod error;
pub mod source;
pub mod token;

// Re-export public API
pub use error::{ConfigError, ConfigResult};
pub use source::Configuration;
pub use token::Token;
