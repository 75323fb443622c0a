//! # vigil-scheduler
//!
//! Periodic + one-shot scheduler: a tick loop evaluates due times for
//! recurring reminders (including the synthetic heartbeat) and one-time
//! reminders, persists next-run state atomically on every mutation, guards
//! against re-entrant runs of the same reminder id, and hands the actual
//! work to the lane queue wrapped in the resilient executor.

pub mod scheduler;
pub mod state;

pub use scheduler::{AgentInvoker, Scheduler, SchedulerHealth};
pub use state::{HeartbeatState, OneTimeReminder, Reminder, SchedulerState};

/// Reminder id synthesized for the heartbeat.
pub const HEARTBEAT_ID: &str = "self-heartbeat";
