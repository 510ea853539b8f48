//! Wiring for the sync daemon binary: building the clients, mapping store,
//! controller, workflow handle and event sources described by
//! [`triad_engine`] into one running process, and driving the admin HTTP
//! surface alongside it.
//!
//! [`main`](../bin/triad-daemon) is a thin shell around [`service::build`]
//! and [`service::run`] so the wiring itself stays testable without a real
//! binary entry point.

pub mod service;
