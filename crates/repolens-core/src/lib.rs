//! # RepoLens Core
//!
//! Pure logic for RepoLens: data models, the structural tree builder,
//! heuristic framework/pattern detection, static symbol scanning, prompt
//! assembly, model-output parsing, and the storage, hosting and completion
//! traits the app crate implements.
//!
//! Nothing here performs network or filesystem I/O; the `repolens` crate
//! supplies SQLite storage, the GitHub client and the HTTP completion
//! provider.

pub mod completion;
pub mod error;
pub mod explain;
pub mod heuristics;
pub mod hosting;
pub mod json;
pub mod language;
pub mod models;
pub mod prompt;
pub mod store;
pub mod symbols;
pub mod tree;

pub use error::{LensError, Result};
