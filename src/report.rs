use std::fmt::Write;

use serde::Serialize;

use crate::models::{
    ClassDetail, ClassReport, StoredReport, StoredStudentReport, StudentReport, StudentSummary,
};

#[derive(Serialize)]
struct ReportDocument<'a> {
    class_name: &'a str,
    summary: &'a ClassReport,
    students: Vec<NamedStudent<'a>>,
}

#[derive(Serialize)]
struct StudentDocument<'a> {
    class_name: &'a str,
    name: &'a str,
    summary: &'a ClassReport,
    #[serde(flatten)]
    report: &'a StudentReport,
}

#[derive(Serialize)]
struct NamedStudent<'a> {
    name: &'a str,
    #[serde(flatten)]
    report: &'a StudentReport,
}

/// Students in class-position order, paired with their display names.
fn ranked_students(stored: &StoredReport) -> Vec<(&str, &StudentReport)> {
    let mut students: Vec<(&str, &StudentReport)> = stored
        .report
        .students
        .values()
        .map(|student| {
            let name = stored
                .student_names
                .get(&student.student_id)
                .map(String::as_str)
                .unwrap_or(student.student_id.as_str());
            (name, student)
        })
        .collect();
    students.sort_by_key(|(_, student)| student.class_position);
    students
}

pub fn build_report(stored: &StoredReport) -> String {
    let summary = &stored.report.class;
    let students = ranked_students(stored);

    let mut output = String::new();

    let _ = writeln!(output, "# Class Performance Report");
    let _ = writeln!(
        output,
        "Generated for {} at {}",
        stored.class_name,
        summary.generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");
    let _ = writeln!(output, "- Students: {}", summary.total_students);
    let _ = writeln!(
        output,
        "- Highest total: {} ({:.1}%)",
        summary.highest_student_score, summary.highest_student_score_as_percentage
    );
    let _ = writeln!(
        output,
        "- Lowest total: {} ({:.1}%)",
        summary.lowest_student_score, summary.lowest_student_score_as_percentage
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Class Ranking");

    if students.is_empty() {
        let _ = writeln!(output, "No student results recorded for this class.");
    } else {
        let _ = writeln!(output, "| Position | Student | Total | Percentage | Grade |");
        let _ = writeln!(output, "| --- | --- | --- | --- | --- |");
        for (name, student) in students.iter() {
            let _ = writeln!(
                output,
                "| {} | {} | {} | {:.1}% | {} |",
                student.class_position,
                name,
                student.total_score,
                student.total_score_percentage,
                student.class_grade
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Subject Results");

    for (name, student) in students.iter() {
        let _ = writeln!(output);
        let _ = writeln!(output, "### {} (position {})", name, student.class_position);

        if student.subject_reports.is_empty() {
            let _ = writeln!(output, "No subject scores recorded.");
            continue;
        }

        for subject in student.subject_reports.iter() {
            let _ = writeln!(
                output,
                "- {}: {} ({:.1}%), position {}, {}",
                subject.subject_name,
                subject.score,
                subject.subject_percentage,
                subject.subject_position,
                subject.subject_grade
            );
        }
    }

    output
}

pub fn build_json(stored: &StoredReport) -> anyhow::Result<String> {
    let document = ReportDocument {
        class_name: &stored.class_name,
        summary: &stored.report.class,
        students: ranked_students(stored)
            .into_iter()
            .map(|(name, report)| NamedStudent { name, report })
            .collect(),
    };
    Ok(serde_json::to_string_pretty(&document)?)
}

pub fn build_student_report(stored: &StoredStudentReport) -> String {
    let student = &stored.report;
    let mut output = String::new();

    let _ = writeln!(output, "# Student Report: {}", stored.student_name);
    let _ = writeln!(
        output,
        "{} at {}",
        stored.class_name,
        student.generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Overall");
    let _ = writeln!(
        output,
        "- Position: {} of {}",
        student.class_position, stored.class.total_students
    );
    let _ = writeln!(
        output,
        "- Total: {} ({:.1}%), {}",
        student.total_score, student.total_score_percentage, student.class_grade
    );
    let _ = writeln!(
        output,
        "- Class range: {} to {}",
        stored.class.lowest_student_score, stored.class.highest_student_score
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Subjects");

    if student.subject_reports.is_empty() {
        let _ = writeln!(output, "No subject scores recorded.");
        return output;
    }

    let _ = writeln!(output, "| Subject | Score | Percentage | Position | Grade |");
    let _ = writeln!(output, "| --- | --- | --- | --- | --- |");
    for subject in student.subject_reports.iter() {
        let _ = writeln!(
            output,
            "| {} | {} | {:.1}% | {} | {} |",
            subject.subject_name,
            subject.score,
            subject.subject_percentage,
            subject.subject_position,
            subject.subject_grade
        );
    }

    output
}

pub fn build_student_json(stored: &StoredStudentReport) -> anyhow::Result<String> {
    let document = StudentDocument {
        class_name: &stored.class_name,
        name: &stored.student_name,
        summary: &stored.class,
        report: &stored.report,
    };
    Ok(serde_json::to_string_pretty(&document)?)
}

pub fn build_student_list(students: &[StudentSummary]) -> String {
    let mut output = String::new();

    if students.is_empty() {
        let _ = writeln!(output, "No students recorded for this class.");
        return output;
    }

    for student in students {
        let standing = match (student.class_position, student.total_score, student.class_grade) {
            (Some(position), Some(total), Some(grade)) => {
                format!("position {position}, total {total}, {grade}")
            }
            _ => "not ranked".to_string(),
        };
        let _ = writeln!(
            output,
            "- {} ({}) {} subjects, {}",
            student.name, student.id, student.subject_count, standing
        );
    }

    output
}

pub fn build_class_details(class: &ClassDetail) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# {}", class.name);
    let _ = writeln!(output, "- ID: {}", class.id);
    let _ = writeln!(output, "- Students: {}", class.student_count);
    let _ = writeln!(
        output,
        "- Created: {}",
        class.created_at.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(
        output,
        "- Updated: {}",
        class.updated_at.format("%Y-%m-%d %H:%M UTC")
    );
    match class.report_generated_at {
        Some(at) => {
            let _ = writeln!(
                output,
                "- Report: generated {}",
                at.format("%Y-%m-%d %H:%M UTC")
            );
        }
        None => {
            let _ = writeln!(output, "- Report: not generated");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Subjects");
    for subject in class.subjects.iter() {
        let _ = writeln!(output, "- {} (max {})", subject.name, subject.max_score);
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::compute_report;
    use crate::models::{Grade, SubjectDefinition, SubjectScore};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn sample() -> StoredReport {
        let subjects = vec![
            SubjectDefinition::new("Mathematics", 100),
            SubjectDefinition::new("French", 40),
        ];
        let mut scores = BTreeMap::new();
        scores.insert(
            "id-ada".to_string(),
            vec![
                SubjectScore::new("Mathematics", 45),
                SubjectScore::new("French", 20),
            ],
        );
        scores.insert(
            "id-bola".to_string(),
            vec![
                SubjectScore::new("Mathematics", 88),
                SubjectScore::new("French", 36),
            ],
        );
        let generated_at = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap();
        let report = compute_report(&subjects, &scores, generated_at).unwrap();

        let mut student_names = BTreeMap::new();
        student_names.insert("id-ada".to_string(), "Ada Okafor".to_string());
        student_names.insert("id-bola".to_string(), "Bola Ade".to_string());

        StoredReport {
            class_name: "SS 1 Gold".to_string(),
            student_names,
            report,
        }
    }

    #[test]
    fn markdown_lists_students_by_position() {
        let output = build_report(&sample());

        assert!(output.starts_with("# Class Performance Report"));
        assert!(output.contains("Generated for SS 1 Gold at 2026-07-01 12:00 UTC"));
        assert!(output.contains("- Highest total: 124 (88.6%)"));
        assert!(output.contains("- Lowest total: 65 (46.4%)"));
        assert!(output.contains("| 1 | Bola Ade | 124 | 88.6% | Excellent |"));
        assert!(output.contains("| 2 | Ada Okafor | 65 | 46.4% | Pass |"));
        assert!(output.contains("- French: 20 (50.0%), position 2, Fair"));

        let bola = output.find("### Bola Ade").unwrap();
        let ada = output.find("### Ada Okafor").unwrap();
        assert!(bola < ada);
    }

    #[test]
    fn unnamed_students_fall_back_to_id() {
        let mut stored = sample();
        stored.student_names.clear();
        let output = build_report(&stored);
        assert!(output.contains("### id-bola (position 1)"));
    }

    #[test]
    fn json_carries_names_and_grades() {
        let json = build_json(&sample()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["class_name"], "SS 1 Gold");
        assert_eq!(value["summary"]["total_students"], 2);
        assert_eq!(value["students"][0]["name"], "Bola Ade");
        assert_eq!(value["students"][0]["class_position"], 1);
        assert_eq!(value["students"][0]["class_grade"], "Excellent");
        assert_eq!(
            value["students"][1]["subject_reports"][0]["subject_name"],
            "Mathematics"
        );
    }

    fn bola() -> StoredStudentReport {
        let mut stored = sample();
        StoredStudentReport {
            class_name: stored.class_name,
            student_name: "Bola Ade".to_string(),
            class: stored.report.class,
            report: stored.report.students.remove("id-bola").unwrap(),
        }
    }

    #[test]
    fn student_markdown_shows_standing_and_subjects() {
        let output = build_student_report(&bola());

        assert!(output.starts_with("# Student Report: Bola Ade"));
        assert!(output.contains("SS 1 Gold at 2026-07-01 12:00 UTC"));
        assert!(output.contains("- Position: 1 of 2"));
        assert!(output.contains("- Total: 124 (88.6%), Excellent"));
        assert!(output.contains("- Class range: 65 to 124"));
        assert!(output.contains("| Mathematics | 88 | 88.0% | 1 | Excellent |"));
        assert!(output.contains("| French | 36 | 90.0% | 1 | Excellent |"));
    }

    #[test]
    fn student_json_flattens_report() {
        let json = build_student_json(&bola()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["name"], "Bola Ade");
        assert_eq!(value["class_name"], "SS 1 Gold");
        assert_eq!(value["student_id"], "id-bola");
        assert_eq!(value["class_position"], 1);
        assert_eq!(value["summary"]["lowest_student_score"], 65);
        assert_eq!(value["subject_reports"][1]["subject_name"], "French");
    }

    #[test]
    fn student_list_marks_unranked_students() {
        let ranked = StudentSummary {
            id: Uuid::nil(),
            name: "Bola Ade".to_string(),
            subject_count: 2,
            class_position: Some(1),
            total_score: Some(124),
            class_grade: Some(Grade::Excellent),
        };
        let pending = StudentSummary {
            id: Uuid::nil(),
            name: "Chidi Eze".to_string(),
            subject_count: 2,
            class_position: None,
            total_score: None,
            class_grade: None,
        };

        let output = build_student_list(&[ranked, pending]);
        assert!(output.contains("- Bola Ade (00000000-0000-0000-0000-000000000000) 2 subjects, position 1, total 124, Excellent"));
        assert!(output.contains("- Chidi Eze (00000000-0000-0000-0000-000000000000) 2 subjects, not ranked"));
        assert_eq!(
            build_student_list(&[]),
            "No students recorded for this class.\n"
        );
    }

    #[test]
    fn class_details_list_catalogue_in_order() {
        let created = Utc.with_ymd_and_hms(2026, 6, 1, 8, 30, 0).unwrap();
        let class = ClassDetail {
            id: Uuid::nil(),
            name: "SS 1 Gold".to_string(),
            subjects: vec![
                SubjectDefinition::new("Mathematics", 100),
                SubjectDefinition::new("French", 40),
            ],
            student_count: 2,
            created_at: created,
            updated_at: created,
            report_generated_at: None,
        };

        let output = build_class_details(&class);
        assert!(output.starts_with("# SS 1 Gold"));
        assert!(output.contains("- Students: 2"));
        assert!(output.contains("- Created: 2026-06-01 08:30 UTC"));
        assert!(output.contains("- Report: not generated"));
        let maths = output.find("- Mathematics (max 100)").unwrap();
        let french = output.find("- French (max 40)").unwrap();
        assert!(maths < french);
    }
}
