use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Opaque student identifier as stored by the institution.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentId(pub String);

impl StudentId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordKind {
    NewEntry,
    ReEnrolled,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::NewEntry => "NI",
            RecordKind::ReEnrolled => "REI",
        }
    }
}

/// One observation of a student being present in an academic period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    pub student_id: StudentId,
    pub period_id: String,
    pub record_kind: RecordKind,
}

impl EnrollmentRecord {
    pub fn new(student_id: impl Into<String>, period_id: impl Into<String>, record_kind: RecordKind) -> Self {
        Self {
            student_id: StudentId::new(student_id),
            period_id: period_id.into(),
            record_kind,
        }
    }
}

/// Academic grade a report is produced for. Program ids are prefixed with
/// the grade code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Grade {
    #[serde(rename = "LL")]
    Licenciatura,
    #[serde(rename = "EL")]
    Especialidad,
    #[serde(rename = "ML")]
    Maestria,
}

impl Grade {
    pub const ALL: [Grade; 3] = [Grade::Licenciatura, Grade::Especialidad, Grade::Maestria];

    pub fn code(&self) -> &'static str {
        match self {
            Grade::Licenciatura => "LL",
            Grade::Especialidad => "EL",
            Grade::Maestria => "ML",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Grade::Licenciatura => "Licenciatura",
            Grade::Especialidad => "Especialidad",
            Grade::Maestria => "Maestría",
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Grade {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "LL" => Ok(Grade::Licenciatura),
            "EL" => Ok(Grade::Especialidad),
            "ML" => Ok(Grade::Maestria),
            other => Err(format!("unknown grade {other:?}, expected LL, EL or ML")),
        }
    }
}

/// Distinct student counts observed in one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeriodSummary {
    pub period_id: String,
    pub new_entries: usize,
    pub re_enrolled: usize,
}

/// An attendance row with its program attached, across every grade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgramRecord {
    pub period_id: String,
    pub student_id: StudentId,
    pub full_name: String,
    pub grade: Grade,
    pub program_id: String,
    pub program_name: String,
    pub record_kind: RecordKind,
}

/// Distinct students of one program in one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgramSummary {
    pub program_id: String,
    pub period_id: String,
    pub new_entries: usize,
    pub total_students: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grades_parse_from_codes() {
        assert_eq!("ll".parse::<Grade>().unwrap(), Grade::Licenciatura);
        assert_eq!(" EL ".parse::<Grade>().unwrap(), Grade::Especialidad);
        assert_eq!("ML".parse::<Grade>().unwrap(), Grade::Maestria);
        assert!("DL".parse::<Grade>().is_err());
    }

    #[test]
    fn record_kinds_use_source_codes() {
        assert_eq!(RecordKind::NewEntry.as_str(), "NI");
        assert_eq!(RecordKind::ReEnrolled.as_str(), "REI");
    }
}
