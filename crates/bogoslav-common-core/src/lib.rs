//! Bogoslav common core types.
//!
//! Identifiers and timestamps shared by the parser, session store and engine.

pub mod id;
pub mod timestamp;

pub use id::*;
pub use timestamp::*;
