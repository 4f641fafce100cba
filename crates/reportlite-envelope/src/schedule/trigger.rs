//! Trigger predicates over wall-clock time.

use chrono::{DateTime, TimeZone};
use croner::Cron;

use crate::error::{EnvelopeError, Result};

/// A time-based trigger. `matches` is the predicate; `next_after` finds the
/// first instant strictly after `after` where the predicate holds.
pub trait Trigger {
    fn describe(&self) -> String;

    fn matches<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> bool;

    fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>>;
}

/// Cron-expression trigger.
#[derive(Debug, Clone)]
pub struct CronTrigger {
    expr: String,
    cron: Cron,
}

impl CronTrigger {
    pub fn parse(expr: &str) -> Result<Self> {
        let cron = Cron::new(expr)
            .with_seconds_optional()
            .parse()
            .map_err(|e| EnvelopeError::Schedule {
                expr: expr.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            expr: expr.to_string(),
            cron,
        })
    }

    /// The fixed monthly report schedule.
    pub fn monthly_report() -> Result<Self> {
        Self::parse(super::MONTHLY_REPORT)
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }
}

impl Trigger for CronTrigger {
    fn describe(&self) -> String {
        format!("cron '{}'", self.expr)
    }

    fn matches<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> bool {
        self.cron.is_time_matching(at).unwrap_or(false)
    }

    fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        match self.cron.find_next_occurrence(after, false) {
            Ok(next) => Some(next),
            Err(e) => {
                tracing::warn!("No next occurrence for {}: {}", self.describe(), e);
                None
            }
        }
    }
}
