use crate::error::AppError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, Duration, Weekday};

const DAY_KEY_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Calendar day a task or closed-day snapshot belongs to, rendered `YYYY-MM-DD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DayKey(Date);

impl DayKey {
    pub fn new(date: Date) -> Self {
        Self(date)
    }

    pub fn parse(raw: &str) -> Result<Self, AppError> {
        Date::parse(raw.trim(), DAY_KEY_FORMAT)
            .map(Self)
            .map_err(|_| AppError::invalid_input(format!("day must be YYYY-MM-DD: {raw}")))
    }

    pub fn date(&self) -> Date {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(Duration::days(1)))
    }

    pub fn is_monday(&self) -> bool {
        self.0.weekday() == Weekday::Monday
    }

    pub fn iso_week(&self) -> u8 {
        self.0.iso_week()
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self.0.format(DAY_KEY_FORMAT).map_err(|_| fmt::Error)?;
        f.write_str(&rendered)
    }
}

impl Serialize for DayKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DayKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DayKey::parse(&raw).map_err(|err| serde::de::Error::custom(err.message()))
    }
}
