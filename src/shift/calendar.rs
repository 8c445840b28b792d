//! Shift boundaries in local wall-clock time.

use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::config::{ConfigError, ShiftConfig};
use crate::types::ShiftWindow;

#[derive(Debug, Clone)]
pub struct ShiftCalendar {
    tz: Tz,
    boundaries: Vec<NaiveTime>,
    length: Duration,
    max_sleep: Duration,
}

impl ShiftCalendar {
    pub fn from_config(config: &ShiftConfig) -> Result<Self, ConfigError> {
        let tz: Tz = config.timezone.parse().map_err(|_| {
            ConfigError::Validation(vec![format!("shift.timezone: unknown timezone '{}'", config.timezone)])
        })?;
        let mut boundaries = config
            .boundaries
            .iter()
            .map(|b| {
                NaiveTime::parse_from_str(b, "%H:%M").map_err(|_| {
                    ConfigError::Validation(vec![format!("shift.boundaries: '{b}' is not HH:MM")])
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if boundaries.is_empty() {
            return Err(ConfigError::Validation(vec![
                "shift.boundaries: at least one boundary is required".to_string(),
            ]));
        }
        boundaries.sort();

        Ok(Self {
            tz,
            boundaries,
            length: Duration::hours(config.length_hours),
            max_sleep: Duration::hours(config.max_sleep_hours),
        })
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// First boundary strictly after `now`.
    pub fn next_boundary(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.with_timezone(&self.tz).date_naive();
        (0..=2)
            .filter_map(|offset| today.checked_add_signed(Duration::days(offset)))
            .flat_map(|day| self.boundaries.iter().map(move |t| day.and_time(*t)))
            .filter_map(|local| self.resolve(local))
            .find(|candidate| *candidate > now)
            // unreachable with at least one boundary per day
            .unwrap_or(now + self.length)
    }

    /// The shift that ends at `boundary`: `[boundary - length, boundary)`.
    pub fn window_ending_at(&self, boundary: DateTime<Utc>) -> ShiftWindow {
        ShiftWindow::ending_at(boundary, self.length)
    }

    /// Time to sleep until `boundary`, clamped to `[0, max_sleep]`.
    pub fn sleep_duration(&self, now: DateTime<Utc>, boundary: DateTime<Utc>) -> std::time::Duration {
        let until = (boundary - now).clamp(Duration::zero(), self.max_sleep);
        until.to_std().unwrap_or_default()
    }

    /// Local wall-clock time to UTC. Ambiguous times (DST fall-back) take the
    /// earlier instant; times inside a DST gap move one hour forward.
    fn resolve(&self, local: NaiveDateTime) -> Option<DateTime<Utc>> {
        let resolved = match self.tz.from_local_datetime(&local) {
            LocalResult::Single(t) => Some(t),
            LocalResult::Ambiguous(earliest, _) => Some(earliest),
            LocalResult::None => self.tz.from_local_datetime(&(local + Duration::hours(1))).earliest(),
        };
        resolved.map(|t| t.with_timezone(&Utc))
    }
}
