//! Check-in vocabulary shared by the stores, the composer and the daemon.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CheckinError, Result};

pub const MIN_VALUE: i32 = 1;
pub const MAX_VALUE: i32 = 10;

/// A behavioral dimension a user can rate from 1 to 10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckInType {
    Mood,
    Focus,
    Motivation,
    Energy,
    Stress,
}

impl CheckInType {
    pub const ALL: [CheckInType; 5] = [
        CheckInType::Mood,
        CheckInType::Focus,
        CheckInType::Motivation,
        CheckInType::Energy,
        CheckInType::Stress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckInType::Mood => "mood",
            CheckInType::Focus => "focus",
            CheckInType::Motivation => "motivation",
            CheckInType::Energy => "energy",
            CheckInType::Stress => "stress",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            CheckInType::Mood => "😊",
            CheckInType::Focus => "🎯",
            CheckInType::Motivation => "🔥",
            CheckInType::Energy => "⚡",
            CheckInType::Stress => "😰",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CheckInType::Mood => "Mood",
            CheckInType::Focus => "Focus",
            CheckInType::Motivation => "Motivation",
            CheckInType::Energy => "Energy",
            CheckInType::Stress => "Stress",
        }
    }
}

impl fmt::Display for CheckInType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckInType {
    type Err = CheckinError;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mood" => Ok(CheckInType::Mood),
            "focus" => Ok(CheckInType::Focus),
            "motivation" => Ok(CheckInType::Motivation),
            "energy" => Ok(CheckInType::Energy),
            "stress" => Ok(CheckInType::Stress),
            other => Err(CheckinError::Validation(format!(
                "unknown check-in type '{other}'"
            ))),
        }
    }
}

/// Who caused a check-in to be recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggeredBy {
    Scheduled,
    Manual,
}

impl TriggeredBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggeredBy::Scheduled => "scheduled",
            TriggeredBy::Manual => "manual",
        }
    }
}

impl FromStr for TriggeredBy {
    type Err = CheckinError;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value {
            "scheduled" => Ok(TriggeredBy::Scheduled),
            "manual" => Ok(TriggeredBy::Manual),
            other => Err(CheckinError::Validation(format!(
                "unknown trigger '{other}'"
            ))),
        }
    }
}

pub fn validate_value(value: i32) -> Result<i32> {
    if (MIN_VALUE..=MAX_VALUE).contains(&value) {
        Ok(value)
    } else {
        Err(CheckinError::Validation(format!(
            "check-in value {value} is outside {MIN_VALUE}..={MAX_VALUE}"
        )))
    }
}

/// A 24h wall-clock minute, always rendered as `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay {
    hour: u32,
    minute: u32,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(CheckinError::Validation(format!(
                "invalid time {hour:02}:{minute:02}"
            )));
        }
        Ok(Self { hour, minute })
    }

    /// `hour` is taken modulo 24.
    pub const fn on_the_hour(hour: u32) -> Self {
        Self {
            hour: hour % 24,
            minute: 0,
        }
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = CheckinError;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || CheckinError::Validation(format!("invalid time '{value}', expected HH:MM"));
        let (h, m) = value.trim().split_once(':').ok_or_else(invalid)?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return Err(invalid());
        }
        let hour: u32 = h.parse().map_err(|_| invalid())?;
        let minute: u32 = m.parse().map_err(|_| invalid())?;
        TimeOfDay::new(hour, minute)
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_types_case_insensitively() {
        assert_eq!("Energy".parse::<CheckInType>().unwrap(), CheckInType::Energy);
        assert!("sleep".parse::<CheckInType>().is_err());
    }

    #[test]
    fn time_of_day_accepts_single_digit_hour() {
        let t: TimeOfDay = "9:05".parse().unwrap();
        assert_eq!(t.to_string(), "09:05");
        assert!("24:00".parse::<TimeOfDay>().is_err());
        assert!("12:5".parse::<TimeOfDay>().is_err());
        assert!("noon".parse::<TimeOfDay>().is_err());
    }

    #[test]
    fn value_bounds_are_inclusive() {
        assert!(validate_value(1).is_ok());
        assert!(validate_value(10).is_ok());
        assert!(validate_value(0).is_err());
        assert!(validate_value(15).is_err());
    }
}
