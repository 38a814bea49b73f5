use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::grading;
use crate::models::{
    ClassReport, ComputedReport, StudentReport, SubjectDefinition, SubjectReport, SubjectScore,
};

/// Input that breaks the engine's preconditions. Callers are expected to
/// validate before computing, so any of these reaching the engine is a bug
/// upstream and aborts the whole computation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReportError {
    #[error("class has no subjects")]
    NoSubjects,
    #[error("subject {subject} has an invalid max score {max_score}")]
    InvalidMaxScore { subject: String, max_score: i32 },
    #[error("subject {0} is defined more than once")]
    DuplicateSubject(String),
    #[error("no student scores were supplied")]
    NoStudents,
    #[error("student {student_id} references unknown subject {subject}")]
    UnknownSubject { student_id: String, subject: String },
    #[error("student {student_id} scored {score} in {subject}, outside 0..={max_score}")]
    ScoreOutOfRange {
        student_id: String,
        subject: String,
        score: i32,
        max_score: i32,
    },
    #[error("student {student_id} has more than one score for {subject}")]
    DuplicateScore { student_id: String, subject: String },
}

/// Computes the class summary and one report per student from a complete
/// snapshot of scores.
///
/// Students are visited in ascending ID order and both rankings use a stable
/// sort, so among equal scores the smaller student ID takes the better
/// position. Each student's subject reports follow the order of `subjects`.
pub fn compute_report(
    subjects: &[SubjectDefinition],
    scores: &BTreeMap<String, Vec<SubjectScore>>,
    generated_at: DateTime<Utc>,
) -> Result<ComputedReport, ReportError> {
    if subjects.is_empty() {
        return Err(ReportError::NoSubjects);
    }

    let mut max_scores: HashMap<&str, i32> = HashMap::with_capacity(subjects.len());
    let mut total_max_score: i64 = 0;
    for subject in subjects {
        if subject.max_score < 1 {
            return Err(ReportError::InvalidMaxScore {
                subject: subject.name.clone(),
                max_score: subject.max_score,
            });
        }
        if max_scores
            .insert(subject.name.as_str(), subject.max_score)
            .is_some()
        {
            return Err(ReportError::DuplicateSubject(subject.name.clone()));
        }
        total_max_score += i64::from(subject.max_score);
    }

    if scores.is_empty() {
        return Err(ReportError::NoStudents);
    }

    let mut by_subject: HashMap<&str, Vec<(&str, i32)>> = HashMap::with_capacity(subjects.len());
    let mut totals: Vec<(&str, i64)> = Vec::with_capacity(scores.len());

    for (student_id, entries) in scores {
        let mut seen: HashSet<&str> = HashSet::with_capacity(entries.len());
        let mut total_score: i64 = 0;

        for entry in entries {
            let subject = entry.subject_name.as_str();
            let max_score = *max_scores.get(subject).ok_or_else(|| ReportError::UnknownSubject {
                student_id: student_id.clone(),
                subject: subject.to_string(),
            })?;

            if !(0..=max_score).contains(&entry.score) {
                return Err(ReportError::ScoreOutOfRange {
                    student_id: student_id.clone(),
                    subject: subject.to_string(),
                    score: entry.score,
                    max_score,
                });
            }
            if !seen.insert(subject) {
                return Err(ReportError::DuplicateScore {
                    student_id: student_id.clone(),
                    subject: subject.to_string(),
                });
            }

            total_score += i64::from(entry.score);
            by_subject
                .entry(subject)
                .or_default()
                .push((student_id.as_str(), entry.score));
        }

        totals.push((student_id.as_str(), total_score));
    }

    let mut subject_reports: HashMap<&str, Vec<SubjectReport>> =
        HashMap::with_capacity(scores.len());
    for subject in subjects {
        let Some(entries) = by_subject.remove(subject.name.as_str()) else {
            continue;
        };

        for (student_id, score, position) in grading::rank_descending(entries) {
            let subject_percentage =
                grading::percentage(i64::from(score), i64::from(subject.max_score));
            subject_reports
                .entry(student_id)
                .or_default()
                .push(SubjectReport {
                    subject_name: subject.name.clone(),
                    score,
                    subject_percentage,
                    subject_position: position,
                    subject_grade: grading::grade(subject_percentage),
                });
        }
    }

    let mut students = BTreeMap::new();
    for (student_id, total_score, class_position) in grading::rank_descending(totals) {
        let total_score_percentage = grading::percentage(total_score, total_max_score);
        students.insert(
            student_id.to_string(),
            StudentReport {
                student_id: student_id.to_string(),
                total_score,
                total_score_percentage,
                class_position,
                class_grade: grading::grade(total_score_percentage),
                subject_reports: subject_reports.remove(student_id).unwrap_or_default(),
                generated_at,
            },
        );
    }

    let highest = students.values().map(|report| report.total_score).max();
    let lowest = students.values().map(|report| report.total_score).min();
    let (Some(highest), Some(lowest)) = (highest, lowest) else {
        return Err(ReportError::NoStudents);
    };

    Ok(ComputedReport {
        class: ClassReport {
            total_students: students.len(),
            highest_student_score: highest,
            highest_student_score_as_percentage: grading::percentage(highest, total_max_score),
            lowest_student_score: lowest,
            lowest_student_score_as_percentage: grading::percentage(lowest, total_max_score),
            generated_at,
        },
        students,
    })
}
