use std::collections::HashSet;

use crate::models::{SubjectDefinition, SubjectScore};

/// A rejected request. The message is meant for the person who sent it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing class name")]
    MissingClassName,
    #[error("missing student name")]
    MissingStudentName,
    #[error("a class needs at least one subject")]
    NoSubjects,
    #[error("{required} class subjects are required, got {actual}")]
    SubjectCount { required: usize, actual: usize },
    #[error("subject {index} is missing a subject name")]
    MissingSubjectName { index: usize },
    #[error("subject {subject} has an invalid max score {max_score}")]
    InvalidMaxScore { subject: String, max_score: i32 },
    #[error("subject {0} is listed more than once")]
    DuplicateSubject(String),
    #[error("subject name {0} does not exist, check spelling as subject names are case sensitive")]
    UnknownSubject(String),
    #[error("subject {subject} has an invalid score {score}")]
    NegativeScore { subject: String, score: i32 },
    #[error("student score ({score}) for subject {subject} exceeds the maximum score ({max_score}) for this subject")]
    ScoreAboveMax {
        subject: String,
        score: i32,
        max_score: i32,
    },
    #[error("class {0} does not exist")]
    UnknownClass(String),
    #[error("student {0} has no results in this class")]
    UnknownStudent(String),
    #[error("class name {0} already exists")]
    DuplicateClass(String),
    #[error("student name {0} has already been added to this class")]
    DuplicateStudent(String),
    #[error("cannot add student record to class with a finalized report")]
    ReportFinalized,
    #[error("a report has already been generated for this class")]
    ReportExists,
    #[error("no report has been generated for this class yet")]
    ReportMissing,
    #[error("a minimum of {required} students is required to generate a report for this class, found {actual}")]
    InsufficientStudents { required: usize, actual: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rules {
    pub required_subjects: usize,
    pub min_students: usize,
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            required_subjects: 10,
            min_students: 2,
        }
    }
}

pub fn new_class(
    name: &str,
    subjects: &[SubjectDefinition],
    rules: &Rules,
) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::MissingClassName);
    }

    if subjects.is_empty() {
        return Err(ValidationError::NoSubjects);
    }

    if subjects.len() != rules.required_subjects {
        return Err(ValidationError::SubjectCount {
            required: rules.required_subjects,
            actual: subjects.len(),
        });
    }

    let mut names = HashSet::with_capacity(subjects.len());
    for (index, subject) in subjects.iter().enumerate() {
        if subject.name.trim().is_empty() {
            return Err(ValidationError::MissingSubjectName { index: index + 1 });
        }
        if subject.max_score < 1 {
            return Err(ValidationError::InvalidMaxScore {
                subject: subject.name.clone(),
                max_score: subject.max_score,
            });
        }
        if !names.insert(subject.name.as_str()) {
            return Err(ValidationError::DuplicateSubject(subject.name.clone()));
        }
    }

    Ok(())
}

/// Checks one student's scores against the class catalogue.
pub fn student_record(
    name: &str,
    scores: &[SubjectScore],
    subjects: &[SubjectDefinition],
    rules: &Rules,
) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::MissingStudentName);
    }

    if scores.len() != rules.required_subjects {
        return Err(ValidationError::SubjectCount {
            required: rules.required_subjects,
            actual: scores.len(),
        });
    }

    let mut seen = HashSet::with_capacity(scores.len());
    for (index, entry) in scores.iter().enumerate() {
        if entry.subject_name.trim().is_empty() {
            return Err(ValidationError::MissingSubjectName { index: index + 1 });
        }
        if entry.score < 0 {
            return Err(ValidationError::NegativeScore {
                subject: entry.subject_name.clone(),
                score: entry.score,
            });
        }

        let subject = subjects
            .iter()
            .find(|subject| subject.name == entry.subject_name)
            .ok_or_else(|| ValidationError::UnknownSubject(entry.subject_name.clone()))?;

        if entry.score > subject.max_score {
            return Err(ValidationError::ScoreAboveMax {
                subject: entry.subject_name.clone(),
                score: entry.score,
                max_score: subject.max_score,
            });
        }
        if !seen.insert(entry.subject_name.as_str()) {
            return Err(ValidationError::DuplicateSubject(entry.subject_name.clone()));
        }
    }

    Ok(())
}

pub fn report_ready(student_count: usize, rules: &Rules) -> Result<(), ValidationError> {
    let required = rules.min_students.max(1);
    if student_count < required {
        return Err(ValidationError::InsufficientStudents {
            required,
            actual: student_count,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> Rules {
        Rules {
            required_subjects: 2,
            min_students: 2,
        }
    }

    fn catalogue() -> Vec<SubjectDefinition> {
        vec![
            SubjectDefinition::new("Geography", 50),
            SubjectDefinition::new("History", 80),
        ]
    }

    #[test]
    fn accepts_well_formed_class() {
        assert_eq!(new_class("JSS 1A", &catalogue(), &rules()), Ok(()));
    }

    #[test]
    fn rejects_class_without_name_or_wrong_subject_count() {
        assert_eq!(
            new_class("  ", &catalogue(), &rules()),
            Err(ValidationError::MissingClassName)
        );
        assert_eq!(
            new_class("JSS 1A", &catalogue()[..1], &rules()),
            Err(ValidationError::SubjectCount {
                required: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn rejects_bad_subject_definitions() {
        let unnamed = vec![
            SubjectDefinition::new("Geography", 50),
            SubjectDefinition::new("", 80),
        ];
        assert_eq!(
            new_class("JSS 1A", &unnamed, &rules()),
            Err(ValidationError::MissingSubjectName { index: 2 })
        );

        let zero_max = vec![
            SubjectDefinition::new("Geography", 0),
            SubjectDefinition::new("History", 80),
        ];
        assert!(matches!(
            new_class("JSS 1A", &zero_max, &rules()),
            Err(ValidationError::InvalidMaxScore { max_score: 0, .. })
        ));

        let repeated = vec![
            SubjectDefinition::new("History", 50),
            SubjectDefinition::new("History", 80),
        ];
        assert_eq!(
            new_class("JSS 1A", &repeated, &rules()),
            Err(ValidationError::DuplicateSubject("History".to_string()))
        );
    }

    #[test]
    fn accepts_scores_within_bounds() {
        let scores = vec![
            SubjectScore::new("History", 80),
            SubjectScore::new("Geography", 0),
        ];
        assert_eq!(
            student_record("Ada", &scores, &catalogue(), &rules()),
            Ok(())
        );
    }

    #[test]
    fn rejects_scores_outside_catalogue_or_bounds() {
        let misspelt = vec![
            SubjectScore::new("history", 10),
            SubjectScore::new("Geography", 10),
        ];
        assert_eq!(
            student_record("Ada", &misspelt, &catalogue(), &rules()),
            Err(ValidationError::UnknownSubject("history".to_string()))
        );

        let too_high = vec![
            SubjectScore::new("History", 10),
            SubjectScore::new("Geography", 51),
        ];
        assert!(matches!(
            student_record("Ada", &too_high, &catalogue(), &rules()),
            Err(ValidationError::ScoreAboveMax { score: 51, max_score: 50, .. })
        ));

        let negative = vec![
            SubjectScore::new("History", -3),
            SubjectScore::new("Geography", 10),
        ];
        assert!(matches!(
            student_record("Ada", &negative, &catalogue(), &rules()),
            Err(ValidationError::NegativeScore { score: -3, .. })
        ));

        let repeated = vec![
            SubjectScore::new("History", 3),
            SubjectScore::new("History", 10),
        ];
        assert_eq!(
            student_record("Ada", &repeated, &catalogue(), &rules()),
            Err(ValidationError::DuplicateSubject("History".to_string()))
        );
    }

    #[test]
    fn rejects_incomplete_record() {
        let scores = vec![SubjectScore::new("History", 10)];
        assert_eq!(
            student_record("Ada", &scores, &catalogue(), &rules()),
            Err(ValidationError::SubjectCount {
                required: 2,
                actual: 1
            })
        );
        assert_eq!(
            student_record("", &scores, &catalogue(), &rules()),
            Err(ValidationError::MissingStudentName)
        );
    }

    #[test]
    fn blank_subject_name_in_record_is_missing() {
        let scores = vec![
            SubjectScore::new("History", 10),
            SubjectScore::new("   ", 10),
        ];
        assert_eq!(
            student_record("Ada", &scores, &catalogue(), &rules()),
            Err(ValidationError::MissingSubjectName { index: 2 })
        );
    }

    #[test]
    fn empty_catalogue_is_rejected_even_when_rules_allow_it() {
        let lax = Rules {
            required_subjects: 0,
            min_students: 0,
        };
        assert_eq!(
            new_class("JSS 1A", &[], &lax),
            Err(ValidationError::NoSubjects)
        );
        assert_eq!(
            new_class("JSS 1A", &[], &rules()),
            Err(ValidationError::NoSubjects)
        );
    }

    #[test]
    fn report_never_ready_without_students() {
        let lax = Rules {
            required_subjects: 2,
            min_students: 0,
        };
        assert_eq!(
            report_ready(0, &lax),
            Err(ValidationError::InsufficientStudents {
                required: 1,
                actual: 0
            })
        );
        assert_eq!(report_ready(1, &lax), Ok(()));
    }

    #[test]
    fn report_needs_minimum_students() {
        assert_eq!(
            report_ready(1, &rules()),
            Err(ValidationError::InsufficientStudents {
                required: 2,
                actual: 1
            })
        );
        assert_eq!(report_ready(2, &rules()), Ok(()));
    }
}
