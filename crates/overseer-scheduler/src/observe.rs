//! Collaborator boundaries: status publication and alert delivery.
//!
//! Both traits are fire-and-forget by contract — implementations must
//! swallow their own delivery failures and must never block the core.
//! The core only ever calls them; it never learns whether delivery worked.

use crate::status::StatusSnapshot;

/// Receives state-change events from the core.
///
/// The gateway implements this over a broadcast channel feeding WebSocket
/// clients; [`NullPublisher`] is the default when nobody is listening.
pub trait StatusPublisher: Send + Sync {
    /// Full status snapshot after any task changed phase.
    fn publish_status(&self, snapshot: &StatusSnapshot);

    /// One line of task output or scheduler logging.
    fn publish_log_line(&self, line: &str);
}

/// Receives failure notifications (FAILED / EXCEPTION terminal outcomes).
pub trait AlertSink: Send + Sync {
    /// `alert_type` is a short machine tag ("task_failed", "task_exception");
    /// `details` is the human-readable diagnostic.
    fn notify(&self, alert_type: &str, details: &str);
}

/// Publisher that drops everything.
#[derive(Default)]
pub struct NullPublisher;

impl StatusPublisher for NullPublisher {
    fn publish_status(&self, _snapshot: &StatusSnapshot) {}
    fn publish_log_line(&self, _line: &str) {}
}

/// Alert sink that drops everything.
#[derive(Default)]
pub struct NullAlerter;

impl AlertSink for NullAlerter {
    fn notify(&self, _alert_type: &str, _details: &str) {}
}
