//! Shared HTTP-status classification used by every client's error type.
//!
//! Each client (`huly`, `vibe`, `beads`) declares its own `thiserror` enum —
//! precise variants for its own failure modes — but all of them classify
//! transport-level failures through [`classify_http_status`] so the
//! retryable/non-retryable split stays consistent across the three clients.
//! The activity boundary in `triad-engine` collapses these further into its
//! own two-variant `ActivityError`.

/// Coarse error category, matching the taxonomy in the error handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 400/422, schema mismatch, enum out of range.
    Validation,
    /// 404 — counterpart gone, caller should treat this as a tombstone.
    NotFound,
    /// 401/403.
    AuthN,
    /// Timeout, connection refused, 5xx, SSE drop.
    Transient,
    /// 409 — conditionally retryable, one refetch-and-retry then give up.
    Conflict,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient | ErrorKind::Conflict)
    }
}

/// Classify an HTTP status code into the shared error taxonomy.
pub fn classify_http_status(status: u16) -> ErrorKind {
    match status {
        400 | 422 => ErrorKind::Validation,
        404 => ErrorKind::NotFound,
        401 | 403 => ErrorKind::AuthN,
        409 => ErrorKind::Conflict,
        s if s >= 500 => ErrorKind::Transient,
        _ => ErrorKind::Validation,
    }
}

/// Classify a `reqwest::Error` that never got an HTTP response (timeouts,
/// connection refused, DNS failures) as `Transient` per §7.
pub fn classify_transport_error(_err: &reqwest::Error) -> ErrorKind {
    ErrorKind::Transient
}
