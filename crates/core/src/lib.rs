//! orgmimic core library.
//!
//! This crate reproduces the public history of open-source repositories
//! inside private target repositories: it ranks each source's most active
//! contributors, binds them to configured synthetic identities, replays the
//! history oldest-first onto an amended branch with remapped authorship, and
//! force-pushes the result. Configuration, the error taxonomy, git object
//! access and the per-organization orchestration live here; the `orgmimic`
//! binary is a thin shell around [`TransplantEngine`].

pub mod config;
pub mod errors;
pub mod git;
pub mod history;
pub mod identity;
pub mod models;
pub mod retry;
pub mod secrets;
pub mod transplant;

// Re-exports for convenience.
pub use config::AppConfig;
pub use git::{GitClient, HistoryStore};
pub use identity::{IdentityMapper, MappingCache};
pub use transplant::TransplantEngine;
