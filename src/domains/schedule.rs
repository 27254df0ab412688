use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::domains::checkin::{CheckInType, TimeOfDay};
use crate::error::{CheckinError, Result};

pub const SCHEDULE_VERSION: u32 = 1;

/// A time of day plus the check-in types that may be asked then.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSlot {
    pub time: TimeOfDay,
    pub types: Vec<CheckInType>,
}

/// Persisted form of the slot list. Older rows that hold a bare JSON array
/// are read as version 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleDocument {
    pub version: u32,
    pub slots: Vec<ScheduleSlot>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDocument {
    Versioned { version: u32, slots: Vec<ScheduleSlot> },
    Bare(Vec<ScheduleSlot>),
}

impl ScheduleDocument {
    pub fn new(slots: Vec<ScheduleSlot>) -> Self {
        Self {
            version: SCHEDULE_VERSION,
            slots,
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let parsed: RawDocument = serde_json::from_str(raw)
            .map_err(|e| CheckinError::Validation(format!("invalid schedule document: {e}")))?;
        let doc = match parsed {
            RawDocument::Versioned { version, slots } => {
                if version != SCHEDULE_VERSION {
                    return Err(CheckinError::Validation(format!(
                        "unsupported schedule version {version}"
                    )));
                }
                Self { version, slots }
            }
            RawDocument::Bare(slots) => Self::new(slots),
        };
        doc.validate_slots()?;
        Ok(doc)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| CheckinError::Serialization(e.to_string()))
    }

    /// Every slot needs at least one type and slot times must be unique.
    pub fn validate_slots(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for slot in &self.slots {
            if slot.types.is_empty() {
                return Err(CheckinError::Validation(format!(
                    "slot {} has no check-in types",
                    slot.time
                )));
            }
            if !seen.insert(slot.time) {
                return Err(CheckinError::Validation(format!(
                    "duplicate slot time {}",
                    slot.time
                )));
            }
        }
        Ok(())
    }

    pub fn validate_for(&self, enabled: bool) -> Result<()> {
        self.validate_slots()?;
        if enabled && self.slots.is_empty() {
            return Err(CheckinError::Validation(
                "an enabled schedule needs at least one slot".to_string(),
            ));
        }
        Ok(())
    }

    pub fn slots_at(&self, time: TimeOfDay) -> impl Iterator<Item = &ScheduleSlot> {
        self.slots.iter().filter(move |slot| slot.time == time)
    }
}

pub fn default_slots() -> Vec<ScheduleSlot> {
    let slot = |h: u32, types: [CheckInType; 2]| ScheduleSlot {
        time: TimeOfDay::on_the_hour(h),
        types: types.to_vec(),
    };
    vec![
        slot(9, [CheckInType::Mood, CheckInType::Energy]),
        slot(14, [CheckInType::Focus, CheckInType::Motivation]),
        slot(18, [CheckInType::Mood, CheckInType::Stress]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_array_as_current_version() {
        let doc = ScheduleDocument::parse(r#"[{"time":"09:00","types":["mood","energy"]}]"#).unwrap();
        assert_eq!(doc.version, SCHEDULE_VERSION);
        assert_eq!(doc.slots[0].types, vec![CheckInType::Mood, CheckInType::Energy]);
    }

    #[test]
    fn rejects_bad_documents() {
        assert!(ScheduleDocument::parse(r#"[{"time":"25:00","types":["mood"]}]"#).is_err());
        assert!(ScheduleDocument::parse(r#"[{"time":"09:00","types":[]}]"#).is_err());
        assert!(ScheduleDocument::parse(r#"[{"time":"09:00","types":["sleep"]}]"#).is_err());
        assert!(ScheduleDocument::parse(
            r#"{"version":1,"slots":[{"time":"09:00","types":["mood"]},{"time":"09:00","types":["focus"]}]}"#
        )
        .is_err());
        assert!(ScheduleDocument::parse(r#"{"version":2,"slots":[]}"#).is_err());
    }

    #[test]
    fn enabled_schedule_must_have_slots() {
        let empty = ScheduleDocument::new(Vec::new());
        assert!(empty.validate_for(false).is_ok());
        assert!(empty.validate_for(true).is_err());
    }

    #[test]
    fn round_trips_through_json() {
        let doc = ScheduleDocument::new(default_slots());
        let parsed = ScheduleDocument::parse(&doc.to_json().unwrap()).unwrap();
        assert_eq!(parsed, doc);
    }
}
