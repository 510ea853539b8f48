//! Typed clients for the three systems kept in sync: H (identifier-keyed
//! REST tracker), V (UUID-keyed kanban with REST + SSE), and B (per-repo
//! JSONL+SQLite tracker driven through its `bd` CLI).

pub mod beads;
pub mod error;
pub mod huly;
pub mod types;
pub mod vibe;
