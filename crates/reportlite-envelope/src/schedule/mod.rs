//! SCHEDULED execution: a trigger predicate over wall-clock time and the
//! foreground supervisor that invokes the task whenever it fires.

pub mod supervisor;
pub mod trigger;

pub use supervisor::{Clock, ScheduleState, Supervisor, SupervisorReport, SystemClock};
pub use trigger::{CronTrigger, Trigger};

/// Fixed schedule: 12:00 on the 1st of every month.
pub const MONTHLY_REPORT: &str = "0 12 1 * *";

/// The next `count` fire times strictly after `from`.
pub fn upcoming<T, Tz>(trigger: &T, from: &chrono::DateTime<Tz>, count: usize) -> Vec<chrono::DateTime<Tz>>
where
    T: Trigger,
    Tz: chrono::TimeZone,
{
    let mut out = Vec::with_capacity(count);
    let mut cursor = from.clone();
    while out.len() < count {
        match trigger.next_after(&cursor) {
            Some(next) => {
                cursor = next.clone();
                out.push(next);
            }
            None => break,
        }
    }
    out
}
