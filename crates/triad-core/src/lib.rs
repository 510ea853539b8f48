//! Core library for the sync bridge — the identity/mapping store, the
//! status/priority vocabulary mapper, the git and file-watching primitives
//! System B's activities ride on, and the configuration/settings layer.
//!
//! This crate deliberately knows nothing about HTTP, SSE, or workflow
//! scheduling — those live in `triad-clients` and `triad-engine`. What's
//! here is the durable state and the domain types everything else shares.

pub mod config;
pub mod dedupe;
pub mod file_watcher;
pub mod lockfile;
pub mod mapping_store;
pub mod repo;
pub mod settings;
pub mod status_map;
pub mod types;

#[cfg(feature = "libgit2")]
pub mod git2_ops;
