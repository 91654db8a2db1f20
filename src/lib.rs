//! Layered memory for a coding agent.
//!
//! Cairn gives an agent loop a short-term view of what it is doing right now
//! and a long-term record of what has worked in a project before:
//!
//! | Tier | Lifetime | Holds |
//! |------|----------|-------|
//! | **Working** | One session, in process | Cached file content, recent operations, tool calls, shell commands |
//! | **Persistent** | Across sessions, one JSON file per project | File access history, tool statistics, patterns, preferences, snippets |
//! | **Action history** | One session | A pre-image of the file touched by the latest destructive action |
//!
//! The [`MemoryManager`] ties the tiers together. Observations go to working
//! memory first and are reconciled into persistent memory under a session
//! sequence cursor, so repeating a sync never counts anything twice. When the
//! store cannot be written the manager carries on with working memory alone.
//!
//! # Architecture
//!
//! - **Storage**: a single versioned JSON document, rewritten atomically
//!   (temp file, fsync, rename) on every durable change
//! - **Transactions**: each change is staged on a copy of the document and
//!   committed only after the write succeeds
//! - **Retention**: per-file and global horizons bound the access history
//!
//! # Modules
//!
//! - [`config`]: configuration loading from TOML files and environment variables
//! - [`store`]: the on-disk document, its loading, upgrade and atomic writes
//! - [`memory`]: working and persistent memory, the manager and action history
//! - [`logging`]: tracing subscriber setup for embedding applications

pub mod config;
pub mod error;
pub mod logging;
pub mod memory;
pub mod store;

pub use config::CairnConfig;
pub use error::{MemoryError, Result};
pub use memory::history::{ActionHistory, DestructiveAction, SafetyNet};
pub use memory::manager::{MemoryContext, MemoryManager};
pub use memory::types::{FileOperation, PatternKind, Payload};
