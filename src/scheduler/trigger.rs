// src/scheduler/trigger.rs
use std::fmt;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use croner::Cron;

/// When a job fires. Cron expressions are evaluated in UTC.
pub enum Trigger {
    Interval(Duration),
    Cron { expr: String, schedule: Cron },
}

impl Trigger {
    pub fn every(period: Duration) -> Result<Self> {
        if period.is_zero() {
            return Err(anyhow!("interval trigger needs a non-zero period"));
        }
        Ok(Trigger::Interval(period))
    }

    pub fn cron(expr: &str) -> Result<Self> {
        let schedule = Cron::new(expr)
            .parse()
            .with_context(|| format!("parsing cron expression {expr:?}"))?;
        Ok(Trigger::Cron {
            expr: expr.to_string(),
            schedule,
        })
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Interval(p) => chrono::Duration::from_std(*p)
                .ok()
                .and_then(|d| after.checked_add_signed(d)),
            Trigger::Cron { schedule, .. } => schedule.find_next_occurrence(&after, false).ok(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Trigger::Interval(p) => {
                let s = p.as_secs();
                if s == 0 {
                    format!("interval[{}ms]", p.as_millis())
                } else {
                    format!("interval[{}:{:02}:{:02}]", s / 3600, (s / 60) % 60, s % 60)
                }
            }
            Trigger::Cron { expr, .. } => format!("cron[{expr}]"),
        }
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}
