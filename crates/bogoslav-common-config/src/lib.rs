//! Configuration types for Bogoslav.
//!
//! This crate provides the configuration used by the watcher, the dispatcher
//! and the CLI, loaded from `.bogoslav/config.yaml` files.

pub mod env;
pub mod loader;
pub mod types;

pub use env::*;
pub use loader::*;
pub use types::*;
