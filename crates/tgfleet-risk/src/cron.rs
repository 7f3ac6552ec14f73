//! Minimal cron schedules for the recovery sweeps.
//! Format: "MIN HOUR DOM MON DOW". Minute and hour accept `*`, `*/N`, `N`
//! and comma lists; the day fields must be `*`.

use chrono::{DateTime, Duration, Timelike, Utc};
use tgfleet_core::error::{FleetError, Result};

/// Parsed schedule: the set of matching minutes and hours.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minutes: Vec<u32>,
    hours: Vec<u32>,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(FleetError::Config(format!(
                "cron '{expression}': need 5 fields (MIN HOUR DOM MON DOW)"
            )));
        }
        if let Some(field) = parts[2..].iter().find(|f| **f != "*") {
            return Err(FleetError::Config(format!(
                "cron '{expression}': day fields must be '*', got '{field}'"
            )));
        }

        let minutes = parse_field(parts[0], 0, 59)
            .ok_or_else(|| FleetError::Config(format!("cron '{expression}': bad minute field")))?;
        let hours = parse_field(parts[1], 0, 23)
            .ok_or_else(|| FleetError::Config(format!("cron '{expression}': bad hour field")))?;

        Ok(Self {
            expression: expression.to_string(),
            minutes,
            hours,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        self.minutes.contains(&at.minute()) && self.hours.contains(&at.hour())
    }

    /// First whole minute strictly after `after` that matches, within 48h.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after + Duration::minutes(1);
        let mut candidate = start
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(start);

        for _ in 0..(48 * 60) {
            if self.matches(candidate) {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }
        None
    }
}

fn parse_field(field: &str, min: u32, max: u32) -> Option<Vec<u32>> {
    if field == "*" {
        return Some((min..=max).collect());
    }

    if let Some(step) = field.strip_prefix("*/") {
        let n: usize = step.parse().ok()?;
        if n == 0 {
            return None;
        }
        return Some((min..=max).step_by(n).collect());
    }

    let mut values = Vec::new();
    for part in field.split(',') {
        let n: u32 = part.trim().parse().ok()?;
        if n < min || n > max {
            return None;
        }
        values.push(n);
    }
    values.sort_unstable();
    values.dedup();
    Some(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, h, m, s).unwrap()
    }

    #[test]
    fn test_every_five_minutes() {
        let cron = CronSchedule::parse("*/5 * * * *").unwrap();
        assert_eq!(cron.next_after(at(10, 2, 30)), Some(at(10, 5, 0)));
        assert_eq!(cron.next_after(at(10, 5, 0)), Some(at(10, 10, 0)));
    }

    #[test]
    fn test_top_of_hour() {
        let cron = CronSchedule::parse("0 * * * *").unwrap();
        assert_eq!(cron.next_after(at(10, 30, 0)), Some(at(11, 0, 0)));
    }

    #[test]
    fn test_list_and_fixed_hour() {
        let cron = CronSchedule::parse("15,45 3 * * *").unwrap();
        assert_eq!(cron.next_after(at(3, 20, 0)), Some(at(3, 45, 0)));
        let next = cron.next_after(at(4, 0, 0)).unwrap();
        assert_eq!((next.hour(), next.minute()), (3, 15));
        assert!(next > at(4, 0, 0));
    }

    #[test]
    fn test_rejects_bad_expressions() {
        for expr in ["bad", "*/0 * * * *", "61 * * * *", "0 * 1 * *", "0 24 * * *"] {
            assert!(CronSchedule::parse(expr).is_err(), "{expr}");
        }
    }
}
