//! Trigger parsing and due-time calculation.
//!
//! A [`Trigger`] describes when a job fires: either a cron expression
//! (standard 5-field, extended 6-field with seconds, or a shortcut like
//! `@daily`) or a fixed interval (`@every 2h`). Parsing happens at
//! construction time, so an invalid expression is rejected when the job is
//! created, never during evaluation.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when parsing or evaluating triggers.
#[derive(Debug, Error)]
pub enum TriggerError {
    /// Invalid cron expression.
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    /// Invalid interval expression.
    #[error("invalid interval expression: {0}")]
    InvalidInterval(String),

    /// Invalid timezone.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// The schedule has no future occurrences.
    #[error("no more occurrences")]
    NoMoreOccurrences,
}

/// Serialized form of a trigger: the expression string plus timezone.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TriggerSpec {
    expression: String,
    #[serde(default = "default_timezone")]
    timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// A job trigger: cron schedule or fixed interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "TriggerSpec", into = "TriggerSpec")]
pub struct Trigger {
    /// The original expression string.
    expression: String,
    /// IANA timezone name the cron fields are evaluated in.
    timezone: String,
    /// Parsed form.
    kind: TriggerKind,
}

#[derive(Debug, Clone)]
enum TriggerKind {
    /// Cron schedule (always normalized to the 6-field form).
    Cron(Box<CronSchedule>),
    /// Fixed interval relative to the last execution.
    Interval(Duration),
}

impl Trigger {
    /// Parse a trigger expression in the UTC timezone.
    ///
    /// Supports:
    /// - Standard 5-field cron: `minute hour day month weekday`
    /// - Extended 6-field cron: `second minute hour day month weekday`
    /// - Shortcuts: `@yearly`, `@monthly`, `@weekly`, `@daily`, `@hourly`
    /// - Intervals: `@every 5m`, `@every 1h30m`
    pub fn parse(expression: impl Into<String>) -> Result<Self, TriggerError> {
        Self::with_timezone(expression, "UTC")
    }

    /// Parse a trigger expression evaluated in a specific timezone.
    pub fn with_timezone(
        expression: impl Into<String>,
        timezone: impl Into<String>,
    ) -> Result<Self, TriggerError> {
        let expression = expression.into();
        let timezone = timezone.into();

        timezone
            .parse::<Tz>()
            .map_err(|_| TriggerError::InvalidTimezone(timezone.clone()))?;

        let kind = Self::parse_expression(&expression)?;

        Ok(Self {
            expression,
            timezone,
            kind,
        })
    }

    /// Create a cron trigger from an expression.
    pub fn cron(expression: impl Into<String>) -> Result<Self, TriggerError> {
        let expression = expression.into();
        let kind = Self::parse_cron(expression.trim())?;
        Ok(Self {
            expression,
            timezone: default_timezone(),
            kind,
        })
    }

    /// Create a fixed-interval trigger.
    pub fn interval(every: Duration) -> Result<Self, TriggerError> {
        if every.is_zero() {
            return Err(TriggerError::InvalidInterval("0s".to_string()));
        }
        Ok(Self {
            expression: format!("@every {}", format_duration(every)),
            timezone: default_timezone(),
            kind: TriggerKind::Interval(every),
        })
    }

    fn parse_expression(expression: &str) -> Result<TriggerKind, TriggerError> {
        let trimmed = expression.trim();

        if trimmed.starts_with('@') {
            return Self::parse_shortcut(trimmed);
        }

        Self::parse_cron(trimmed)
    }

    /// Parse a shortcut expression (@daily, @every, etc.).
    fn parse_shortcut(expression: &str) -> Result<TriggerKind, TriggerError> {
        match expression.to_lowercase().as_str() {
            "@yearly" | "@annually" => Self::parse_cron("0 0 1 1 *"),
            "@monthly" => Self::parse_cron("0 0 1 * *"),
            "@weekly" => Self::parse_cron("0 0 * * SUN"),
            "@daily" | "@midnight" => Self::parse_cron("0 0 * * *"),
            "@hourly" => Self::parse_cron("0 * * * *"),
            s if s.starts_with("@every ") => {
                let duration = parse_duration(s[7..].trim())?;
                Ok(TriggerKind::Interval(duration))
            }
            _ => Err(TriggerError::InvalidCron(format!(
                "unknown shortcut: {}",
                expression
            ))),
        }
    }

    /// Parse a cron expression, normalizing 5-field form to 6-field.
    fn parse_cron(expression: &str) -> Result<TriggerKind, TriggerError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();

        let cron_expr = match fields.len() {
            5 => format!("0 {}", expression),
            6 => expression.to_string(),
            _ => {
                return Err(TriggerError::InvalidCron(format!(
                    "expected 5 or 6 fields, got {}",
                    fields.len()
                )));
            }
        };

        let schedule = CronSchedule::from_str(&cron_expr)
            .map_err(|e| TriggerError::InvalidCron(e.to_string()))?;

        Ok(TriggerKind::Cron(Box::new(schedule)))
    }

    /// Compute the next fire time strictly after the given instant.
    ///
    /// Pure and deterministic: the same inputs always produce the same
    /// output, which is what makes due-ness recomputable after a restart.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, TriggerError> {
        match &self.kind {
            TriggerKind::Cron(schedule) => {
                let tz: Tz = self
                    .timezone
                    .parse()
                    .map_err(|_| TriggerError::InvalidTimezone(self.timezone.clone()))?;
                let local_time = after.with_timezone(&tz);
                schedule
                    .after(&local_time)
                    .next()
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok_or(TriggerError::NoMoreOccurrences)
            }
            TriggerKind::Interval(every) => {
                let delta = chrono::Duration::from_std(*every)
                    .map_err(|_| TriggerError::InvalidInterval(self.expression.clone()))?;
                Ok(after + delta)
            }
        }
    }

    /// Whether the job is due at `now`, given when it last executed.
    ///
    /// A job that has never executed is due immediately; the first natural
    /// tick only applies once there is a last execution to anchor it.
    pub fn is_due(&self, last_execution: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_execution {
            None => true,
            Some(last) => self.next_after(last).map(|next| now >= next).unwrap_or(false),
        }
    }

    /// Get the original expression string.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Get the timezone name.
    pub fn timezone(&self) -> &str {
        &self.timezone
    }

    /// Whether this trigger is interval-based.
    pub fn is_interval(&self) -> bool {
        matches!(self.kind, TriggerKind::Interval(_))
    }
}

impl TryFrom<TriggerSpec> for Trigger {
    type Error = TriggerError;

    fn try_from(spec: TriggerSpec) -> Result<Self, Self::Error> {
        Self::with_timezone(spec.expression, spec.timezone)
    }
}

impl From<Trigger> for TriggerSpec {
    fn from(trigger: Trigger) -> Self {
        Self {
            expression: trigger.expression,
            timezone: trigger.timezone,
        }
    }
}

/// Parse a duration string like "5m", "1h", "1h30m", "30s".
fn parse_duration(s: &str) -> Result<Duration, TriggerError> {
    let mut total_secs: u64 = 0;
    let mut current_num = String::new();

    for c in s.chars() {
        if c.is_ascii_digit() {
            current_num.push(c);
        } else {
            let num: u64 = current_num
                .parse()
                .map_err(|_| TriggerError::InvalidInterval(s.to_string()))?;
            current_num.clear();

            match c {
                's' => total_secs += num,
                'm' => total_secs += num * 60,
                'h' => total_secs += num * 3600,
                'd' => total_secs += num * 86400,
                _ => return Err(TriggerError::InvalidInterval(s.to_string())),
            }
        }
    }

    if !current_num.is_empty() || total_secs == 0 {
        return Err(TriggerError::InvalidInterval(s.to_string()));
    }

    Ok(Duration::from_secs(total_secs))
}

/// Format a duration back into the "1h30m" form accepted by `@every`.
fn format_duration(d: Duration) -> String {
    let mut secs = d.as_secs();
    let mut out = String::new();

    for (unit, label) in [(86400, "d"), (3600, "h"), (60, "m")] {
        if secs >= unit {
            out.push_str(&format!("{}{}", secs / unit, label));
            secs %= unit;
        }
    }
    if secs > 0 || out.is_empty() {
        out.push_str(&format!("{}s", secs));
    }
    out
}
