//! Cron-driven pipeline scheduling.
//!
//! Each [`Schedule`] moves through `Idle -> Due -> Executing -> Completed |
//! Failed -> Idle`. A due schedule whose previous run is still executing is
//! skipped, never queued.

mod cron;
mod schedule;
mod service;

pub use cron::CronExpression;
pub use schedule::{
    InMemoryScheduleRepository, NewSchedule, Schedule, ScheduleRepository, ScheduleResult,
    ScheduleUpdate,
};
pub use service::{Scheduler, TriggerOutcome};
