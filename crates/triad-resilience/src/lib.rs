//! Reliability primitives shared by the sync clients and the orchestration
//! engine: circuit breaking, rate limiting, and cooperative shutdown.
//!
//! These are deliberately generic — they know nothing about issues, projects,
//! or sync cycles. They exist so every external call (System H, V, B) and
//! every long-running loop (event intake, orchestration) gets the same
//! failure-handling behavior instead of each reimplementing retry/backoff.

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod shutdown;
