//! The orchestration engine: event intake, the sync controller, the durable
//! workflow contracts, the per-issue sync activities, conflict resolution,
//! and the external admin HTTP surface.
//!
//! Key modules:
//! - [`event_sources`] — webhook parsing, SSE→event conversion, file-watcher
//!   burst coalescing (C5)
//! - [`controller`] — per-project mutex, debounce, routing (C6)
//! - [`workflow`] — scheduled workflow lifecycle, signals, continue-as-new,
//!   activity retry policy (C7)
//! - [`activities`] — the per-cycle orchestration sequence (C8)
//! - [`conflict`] — field-level merge rules (C9)
//! - [`admin`] — health/metrics/config/trigger/webhook/events HTTP surface (C10)

pub mod activities;
pub mod admin;
pub mod api_error;
pub mod auth;
pub mod conflict;
pub mod controller;
pub mod event_bus;
pub mod event_sources;
pub mod origin_validation;
pub mod protocol;
pub mod rate_limit_middleware;
pub mod workflow;

pub use event_bus::EventBus;
