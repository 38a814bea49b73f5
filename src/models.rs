use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectDefinition {
    pub name: String,
    pub max_score: i32,
}

impl SubjectDefinition {
    pub fn new(name: impl Into<String>, max_score: i32) -> Self {
        Self {
            name: name.into(),
            max_score,
        }
    }
}

/// A raw score reported by one student for one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectScore {
    pub subject_name: String,
    pub score: i32,
}

impl SubjectScore {
    pub fn new(subject_name: impl Into<String>, score: i32) -> Self {
        Self {
            subject_name: subject_name.into(),
            score,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Grade {
    Fail,
    Pass,
    Fair,
    Good,
    Excellent,
}

impl Grade {
    pub fn as_str(self) -> &'static str {
        match self {
            Grade::Excellent => "Excellent",
            Grade::Good => "Good",
            Grade::Fair => "Fair",
            Grade::Pass => "Pass",
            Grade::Fail => "Fail",
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Grade {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Excellent" => Ok(Grade::Excellent),
            "Good" => Ok(Grade::Good),
            "Fair" => Ok(Grade::Fair),
            "Pass" => Ok(Grade::Pass),
            "Fail" => Ok(Grade::Fail),
            other => anyhow::bail!("unknown grade {other:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectReport {
    pub subject_name: String,
    pub score: i32,
    pub subject_percentage: f64,
    pub subject_position: usize,
    pub subject_grade: Grade,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentReport {
    pub student_id: String,
    pub total_score: i64,
    pub total_score_percentage: f64,
    pub class_position: usize,
    pub class_grade: Grade,
    pub subject_reports: Vec<SubjectReport>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassReport {
    pub total_students: usize,
    pub highest_student_score: i64,
    pub highest_student_score_as_percentage: f64,
    pub lowest_student_score: i64,
    pub lowest_student_score_as_percentage: f64,
    pub generated_at: DateTime<Utc>,
}

/// Output of a single report computation, keyed by student ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedReport {
    pub class: ClassReport,
    pub students: BTreeMap<String, StudentReport>,
}

#[derive(Debug, Clone)]
pub struct ClassSummary {
    pub id: Uuid,
    pub name: String,
    pub student_count: i64,
    pub report_generated_at: Option<DateTime<Utc>>,
}

/// Everything the engine needs for one class, loaded in a single read.
#[derive(Debug, Clone)]
pub struct ClassSnapshot {
    pub class_id: Uuid,
    pub class_name: String,
    pub subjects: Vec<SubjectDefinition>,
    pub scores: BTreeMap<String, Vec<SubjectScore>>,
}

#[derive(Debug, Clone)]
pub struct StoredReport {
    pub class_name: String,
    pub student_names: BTreeMap<String, String>,
    pub report: ComputedReport,
}

/// One student's stored results, with enough class context to read them.
#[derive(Debug, Clone)]
pub struct StoredStudentReport {
    pub class_name: String,
    pub student_name: String,
    pub class: ClassReport,
    pub report: StudentReport,
}

#[derive(Debug, Clone)]
pub struct StudentSummary {
    pub id: Uuid,
    pub name: String,
    pub subject_count: i64,
    pub class_position: Option<usize>,
    pub total_score: Option<i64>,
    pub class_grade: Option<Grade>,
}

#[derive(Debug, Clone)]
pub struct ClassDetail {
    pub id: Uuid,
    pub name: String,
    pub subjects: Vec<SubjectDefinition>,
    pub student_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub report_generated_at: Option<DateTime<Utc>>,
}
