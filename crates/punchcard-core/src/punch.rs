//! Turning resolved date/time values into validated punches.
//!
//! Device exports disagree on date and time notation, so parsing walks a
//! fixed, ordered list of formats and takes the first match. Spreadsheet
//! converters may also hand over Excel serial numbers, which are accepted
//! for both fields.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc};
use serde_json::Value;

use crate::config::IngestConfig;
use crate::error::RecordError;
use crate::models::{PunchMode, TimeValueType};

/// Day-first notations come before month-first ones, so `03/04/2025` is 3 April.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%Y/%m/%d", "%d.%m.%Y", "%m/%d/%Y", "%d-%b-%Y",
    "%d %b %Y", "%b %d, %Y",
];

const TIME_FORMATS: &[&str] = &[
    "%H:%M:%S", "%H:%M:%S%.f", "%H:%M", "%I:%M:%S %p", "%I:%M %p", "%I:%M%p", "%H.%M",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %I:%M:%S %p",
];

/// Largest serial Excel can represent (9999-12-31).
const MAX_EXCEL_SERIAL: f64 = 2_958_465.0;

/// A punch that passed parsing and window validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PunchCandidate {
    pub check_in: DateTime<Utc>,
    pub mode: PunchMode,
}

pub fn parse_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::Number(n) => n.as_f64().and_then(excel_serial_date),
        Value::String(s) => parse_date_str(s.trim()),
        _ => None,
    }
}

fn parse_date_str(s: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .or_else(|| parse_datetime_str(s).map(|dt| dt.date()))
}

pub fn parse_time(token: &str) -> Option<NaiveTime> {
    let token = token.trim();
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(token, fmt).ok())
        .or_else(|| parse_datetime_str(token).map(|dt| dt.time()))
}

/// RFC 3339 values keep their own wall-clock reading; the offset they carry
/// is dropped in favour of the configured device offset.
fn parse_datetime_str(s: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.naive_local()))
}

fn excel_serial_date(serial: f64) -> Option<NaiveDate> {
    if !(1.0..=MAX_EXCEL_SERIAL).contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(TimeDelta::days(serial.trunc() as i64))
}

fn excel_fraction_time(serial: f64) -> Option<NaiveTime> {
    if !(0.0..=MAX_EXCEL_SERIAL).contains(&serial) {
        return None;
    }
    let seconds = (serial.fract() * 86_400.0).round() as u32;
    NaiveTime::from_num_seconds_from_midnight_opt(seconds.min(86_399), 0)
}

/// Split a time field into its tokens.
///
/// Meridiem markers separated by a space (`"8:00 AM 5:30 PM"`) stay attached
/// to the preceding token.
pub fn split_time_tokens(raw: &str, kind: TimeValueType) -> Vec<String> {
    match kind {
        TimeValueType::Single => vec![raw.trim().to_string()],
        TimeValueType::SpaceSeparated => {
            let mut tokens: Vec<String> = Vec::new();
            for part in raw.split_whitespace() {
                let is_meridiem = matches!(part.to_ascii_uppercase().as_str(), "AM" | "PM");
                match tokens.last_mut() {
                    Some(last) if is_meridiem => {
                        last.push(' ');
                        last.push_str(part);
                    }
                    _ => tokens.push(part.to_string()),
                }
            }
            tokens
        }
    }
}

/// Reject punches in the future or older than `horizon_days` calendar days.
///
/// The horizon is measured in whole days on the device's wall clock, so a
/// punch dated exactly `horizon_days` ago is still accepted at any hour.
pub fn check_window(
    check_in: DateTime<Utc>,
    now: DateTime<Utc>,
    horizon_days: i64,
    offset: FixedOffset,
) -> Result<(), RecordError> {
    let local = check_in.with_timezone(&offset);
    if check_in > now {
        return Err(RecordError::FutureTimestamp(local.to_rfc3339()));
    }
    let today = now.with_timezone(&offset).date_naive();
    if (today - local.date_naive()).num_days() > horizon_days {
        return Err(RecordError::OutsideWindow {
            timestamp: local.to_rfc3339(),
            horizon_days,
        });
    }
    Ok(())
}

/// Builds punch candidates from the resolved fields of one record.
#[derive(Debug, Clone)]
pub struct PunchParser {
    offset: FixedOffset,
    single_horizon_days: i64,
    multi_horizon_days: i64,
}

impl PunchParser {
    pub fn new(config: &IngestConfig) -> Self {
        Self {
            offset: config.device_offset,
            single_horizon_days: config.single_horizon_days,
            multi_horizon_days: config.multi_horizon_days,
        }
    }

    pub fn horizon_days(&self, kind: TimeValueType) -> i64 {
        match kind {
            TimeValueType::Single => self.single_horizon_days,
            TimeValueType::SpaceSeparated => self.multi_horizon_days,
        }
    }

    /// Expand one record into independently validated candidates.
    ///
    /// An unparsable date fails the whole record; every time token is
    /// judged on its own, so one bad token leaves its siblings intact.
    pub fn candidates(
        &self,
        date: &Value,
        time: &Value,
        kind: TimeValueType,
        marker: Option<PunchMode>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Result<PunchCandidate, RecordError>>, RecordError> {
        let day = parse_date(date).ok_or_else(|| RecordError::InvalidTimestamp(render(date)))?;
        let horizon = self.horizon_days(kind);

        let tokens = match time {
            Value::Number(n) => {
                let time = n
                    .as_f64()
                    .and_then(excel_fraction_time)
                    .ok_or_else(|| RecordError::InvalidTimestamp(n.to_string()))?;
                vec![time.format("%H:%M:%S").to_string()]
            }
            Value::String(s) => split_time_tokens(s, kind),
            other => return Err(RecordError::InvalidTimestamp(render(other))),
        };

        let candidates = tokens
            .iter()
            .enumerate()
            .map(|(position, token)| -> Result<PunchCandidate, RecordError> {
                let time = parse_time(token).ok_or_else(|| {
                    RecordError::InvalidTimestamp(format!("{} {token}", render(date)))
                })?;
                let check_in = NaiveDateTime::new(day, time)
                    .and_local_timezone(self.offset)
                    .single()
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok_or_else(|| RecordError::InvalidTimestamp(token.clone()))?;
                check_window(check_in, now, horizon, self.offset)?;
                Ok(PunchCandidate {
                    check_in,
                    mode: marker.unwrap_or_else(|| PunchMode::alternating(position)),
                })
            })
            .collect();
        Ok(candidates)
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
