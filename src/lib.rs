//! # RepoLens
//!
//! Repository ingestion and AI-assisted code comprehension.
//!
//! RepoLens imports a repository from a hosting platform, builds a
//! navigable model of its files and symbols, detects frameworks and
//! architectural patterns with static heuristics, asks a completion
//! provider for structured explanations, and keeps multi-turn
//! conversations about a repository or one of its files.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌──────────────┐
//! │  GitHub  │──▶│  Ingestor  │──▶│    Store     │
//! │ REST API │   │ generations│   │ SQLite / mem │
//! └──────────┘   └────────────┘   └──────┬───────┘
//!                                        │
//!                      ┌─────────────────┤
//!                      ▼                 ▼
//!               ┌────────────┐    ┌──────────────┐
//!               │  Analysis  │    │ Conversation │
//!               │  (LLM+heur)│    │   (LLM chat) │
//!               └────────────┘    └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! lens init
//! lens repo add vercel/next.js --ref canary
//! lens sync vercel/next.js
//! lens analyze vercel/next.js
//! lens chat vercel/next.js "Where is routing implemented?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`context`] | Composition root wiring adapters into services |
//! | [`ingest`] | Repository registry, sync and lazy file access |
//! | [`analysis`] | File, symbol and repository explanations |
//! | [`conversation`] | Context-scoped chat with stored history |
//! | [`github`] | GitHub hosting adapter |
//! | [`completion`] | OpenAI-compatible and disabled providers |
//! | [`sqlite_store`] | SQLite storage backend |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`progress`] | Sync progress reporting |
//!
//! Pure domain logic (models, heuristics, tree building, prompt assembly,
//! output parsing, the storage trait) lives in the `repolens-core` crate.

pub mod analysis;
pub mod completion;
pub mod config;
pub mod context;
pub mod conversation;
pub mod db;
pub mod github;
pub mod ingest;
pub mod migrate;
pub mod progress;
pub mod sqlite_store;
