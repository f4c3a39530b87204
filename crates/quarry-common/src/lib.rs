//! Shared types for the quarry workspace.

pub mod error;

pub use error::{ErrorKind, QuarryError, Result};
