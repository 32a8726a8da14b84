//! Background jobs.

pub mod schedule;
pub mod token_scan;

pub use schedule::{Schedule, ScheduleError};
