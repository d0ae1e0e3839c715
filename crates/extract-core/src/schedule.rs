//! Orchestrator working hours.
//!
//! The orchestrator runs always (`on`), never (`off`) or only inside a set of
//! weekly time ranges (`ranges`). Days are ISO weekday indexes (Monday = 1),
//! times are `HH:MM` strings where `24:00` closes a day.

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::{ExtractError, Result};
use crate::types::{SchedulerMode, WorkingState};

pub const MIN_DAY_INDEX: u8 = 1;
pub const MAX_DAY_INDEX: u8 = 7;

/// Parse `HH:MM` into seconds since midnight. `24:00` is accepted.
pub fn parse_time(s: &str) -> Option<u32> {
    let (h, m) = s.trim().split_once(':')?;
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
        return None;
    }
    let hours: u32 = h.parse().ok()?;
    let minutes: u32 = m.parse().ok()?;
    if minutes > 59 || hours > 24 || (hours == 24 && minutes != 0) {
        return None;
    }
    Some(hours * 3600 + minutes * 60)
}

// ---------------------------------------------------------------------------
// TimeRange
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    #[serde(rename = "dayfrom")]
    pub day_from: u8,
    #[serde(rename = "dayto")]
    pub day_to: u8,
    #[serde(rename = "timefrom")]
    pub time_from: String,
    #[serde(rename = "timeto")]
    pub time_to: String,
}

impl Default for TimeRange {
    fn default() -> Self {
        Self {
            day_from: MIN_DAY_INDEX,
            day_to: MAX_DAY_INDEX,
            time_from: "00:00".into(),
            time_to: "24:00".into(),
        }
    }
}

impl TimeRange {
    pub fn new(
        day_from: u8,
        day_to: u8,
        time_from: impl Into<String>,
        time_to: impl Into<String>,
    ) -> Result<Self> {
        let range = Self {
            day_from,
            day_to,
            time_from: time_from.into(),
            time_to: time_to.into(),
        };
        if !range.check_validity() {
            return Err(ExtractError::InvalidTimeRange(range.to_string()));
        }
        Ok(range)
    }

    pub fn check_validity(&self) -> bool {
        let day_ok = |d: u8| (MIN_DAY_INDEX..=MAX_DAY_INDEX).contains(&d);
        day_ok(self.day_from)
            && day_ok(self.day_to)
            && parse_time(&self.time_from).is_some()
            && parse_time(&self.time_to).is_some()
    }

    pub fn is_in_range(&self, at: NaiveDateTime) -> bool {
        self.fits_day(at) && self.fits_time(at)
    }

    fn fits_day(&self, at: NaiveDateTime) -> bool {
        let day = at.weekday().number_from_monday() as u8;
        if self.day_from <= self.day_to {
            day >= self.day_from && day <= self.day_to
        } else {
            // Wraps over the week end, e.g. Saturday..Tuesday.
            day >= self.day_from || day <= self.day_to
        }
    }

    fn fits_time(&self, at: NaiveDateTime) -> bool {
        let (Some(start), Some(end)) = (parse_time(&self.time_from), parse_time(&self.time_to))
        else {
            return false;
        };
        let secs = at.num_seconds_from_midnight();
        secs >= start && secs <= end
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "days {}-{} {}-{}",
            self.day_from, self.day_to, self.time_from, self.time_to
        )
    }
}

// ---------------------------------------------------------------------------
// OrchestratorSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    #[serde(default = "default_frequency")]
    pub frequency_secs: u32,
    #[serde(default = "default_mode")]
    pub mode: SchedulerMode,
    #[serde(default)]
    pub ranges: Vec<TimeRange>,
}

fn default_frequency() -> u32 {
    20
}

fn default_mode() -> SchedulerMode {
    SchedulerMode::On
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            frequency_secs: default_frequency(),
            mode: default_mode(),
            ranges: Vec::new(),
        }
    }
}

impl OrchestratorSettings {
    pub fn is_valid(&self) -> bool {
        if self.frequency_secs < 1 {
            return false;
        }
        if self.mode != SchedulerMode::Ranges {
            return true;
        }
        self.ranges.iter().all(TimeRange::check_validity)
    }

    pub fn is_in_ranges(&self, at: NaiveDateTime) -> bool {
        self.ranges.iter().any(|r| r.is_in_range(at))
    }

    pub fn is_working(&self, at: NaiveDateTime) -> bool {
        match self.mode {
            SchedulerMode::Off => false,
            SchedulerMode::On => true,
            SchedulerMode::Ranges => self.is_in_ranges(at),
        }
    }

    pub fn state(&self, at: NaiveDateTime) -> WorkingState {
        if self.is_working(at) {
            return WorkingState::Running;
        }
        match self.mode {
            SchedulerMode::Off => WorkingState::Stopped,
            SchedulerMode::Ranges if self.ranges.is_empty() => WorkingState::ScheduleConfigError,
            _ => WorkingState::ScheduledStop,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
