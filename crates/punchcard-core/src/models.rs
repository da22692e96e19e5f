use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::path::FieldPath;

/// How the time field of a vendor record is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeValueType {
    /// One punch per record.
    #[default]
    Single,
    /// Several punches per record, separated by whitespace (`"08:00 12:30 17:45"`).
    SpaceSeparated,
}

impl TimeValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeValueType::Single => "single",
            TimeValueType::SpaceSeparated => "space_separated",
        }
    }
}

impl fmt::Display for TimeValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TimeValueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "single" => Ok(TimeValueType::Single),
            "space_separated" => Ok(TimeValueType::SpaceSeparated),
            _ => Err(format!("Unknown time value type: {s}")),
        }
    }
}

/// User-configured mapping describing where the fields live in a vendor file.
///
/// Immutable once a job references it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatDescriptor {
    pub id: Uuid,
    pub name: String,
    /// Path to the array of records inside the normalized file.
    pub entry_point_path: FieldPath,
    pub employee_number_path: FieldPath,
    pub date_path: FieldPath,
    pub time_path: FieldPath,
    /// Optional in/out marker. Without it punches alternate in, out, in, ...
    #[serde(default)]
    pub mode_path: Option<FieldPath>,
    #[serde(default)]
    pub time_value_type: TimeValueType,
    pub created_at: DateTime<Utc>,
}

/// DTO for registering a new format descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFormatDescriptor {
    pub name: String,
    #[serde(default)]
    pub entry_point_path: FieldPath,
    pub employee_number_path: FieldPath,
    pub date_path: FieldPath,
    pub time_path: FieldPath,
    #[serde(default)]
    pub mode_path: Option<FieldPath>,
    #[serde(default)]
    pub time_value_type: TimeValueType,
}

/// Direction of a punch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PunchMode {
    In,
    Out,
}

impl PunchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PunchMode::In => "in",
            PunchMode::Out => "out",
        }
    }

    /// Mode for the n-th punch of a record when the file carries no marker.
    pub fn alternating(position: usize) -> Self {
        if position % 2 == 0 {
            PunchMode::In
        } else {
            PunchMode::Out
        }
    }

    /// Interpret a vendor marker. Devices commonly export `in`/`out`,
    /// `0`/`1`, `check-in`/`check-out` or `I`/`O`.
    pub fn from_marker(marker: &str) -> Option<Self> {
        match marker.trim().to_lowercase().as_str() {
            "in" | "i" | "0" | "checkin" | "check-in" | "check in" | "c/in" => Some(PunchMode::In),
            "out" | "o" | "1" | "checkout" | "check-out" | "check out" | "c/out" => {
                Some(PunchMode::Out)
            }
            _ => None,
        }
    }
}

impl fmt::Display for PunchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PunchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in" => Ok(PunchMode::In),
            "out" => Ok(PunchMode::Out),
            _ => Err(format!("Unknown punch mode: {s}")),
        }
    }
}

/// How an attendance record entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Manual,
    Auto,
    Bulk,
    Force,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Manual => "manual",
            EntryType::Auto => "auto",
            EntryType::Bulk => "bulk",
            EntryType::Force => "force",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(EntryType::Manual),
            "auto" => Ok(EntryType::Auto),
            "bulk" => Ok(EntryType::Bulk),
            "force" => Ok(EntryType::Force),
            _ => Err(format!("Unknown entry type: {s}")),
        }
    }
}

/// A stored punch. Unique on `(user_id, check_in)`.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub check_in: DateTime<Utc>,
    pub mode: PunchMode,
    pub entry_type: EntryType,
    pub job_id: Option<Uuid>,
    pub added_at: DateTime<Utc>,
}

/// DTO for upserting a punch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewAttendanceRecord {
    pub user_id: Uuid,
    pub check_in: DateTime<Utc>,
    pub mode: PunchMode,
    pub entry_type: EntryType,
    pub job_id: Option<Uuid>,
}

/// One line of a job's failure report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedEntry {
    /// Zero-based position in the record array; `None` for job-wide entries.
    pub row: Option<usize>,
    pub employee_number: Option<String>,
    pub reason: String,
}

impl FailedEntry {
    pub fn record(row: usize, employee_number: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            row: Some(row),
            employee_number,
            reason: reason.into(),
        }
    }

    pub fn job(reason: impl Into<String>) -> Self {
        Self {
            row: None,
            employee_number: None,
            reason: reason.into(),
        }
    }
}

/// Compute a SHA-256 hash of raw bytes, returned as 64-char hex.
pub fn compute_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}
