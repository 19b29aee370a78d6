//! `overseer-scheduler` — the task scheduling and execution core.
//!
//! # Overview
//!
//! A [`TaskService`] owns the in-memory [`StatusTable`] and a set of
//! in-flight runners. A single poll loop scans the task store on a fixed
//! cadence (30 s by default) and launches every enabled, due task as an
//! independent Tokio task; the loop never waits on a runner. Each runner
//! spawns the task's script as a subprocess, streams its combined output,
//! and records exactly one terminal transition
//! (`SUCCESS | FAILED | EXCEPTION | STOPPED`).
//!
//! Administrative operations (run-now, restart, toggle, kill, add, remove,
//! plus per-id batch variants) interleave safely with the loop and with
//! running tasks: the active-runner map makes the launch check-and-insert
//! atomic, and every status read-modify-write goes through the table's
//! lock.
//!
//! Observers plug in through two fire-and-forget traits: [`StatusPublisher`]
//! (status snapshots + log lines, e.g. a WebSocket broadcaster) and
//! [`AlertSink`] (failure notifications, e.g. a webhook poster). Neither may
//! block or error back into the core.

pub mod error;
pub mod observe;
mod runner;
pub mod service;
pub mod status;

pub use error::{Result, SchedulerError};
pub use observe::{AlertSink, NullAlerter, NullPublisher, StatusPublisher};
pub use service::{BatchFailure, BatchOutcome, TaskService};
pub use status::{is_due, StatusRecord, StatusSnapshot, StatusTable, TaskPhase};
