use std::collections::{BTreeMap, HashMap};

use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{
    ClassDetail, ClassReport, ClassSnapshot, ClassSummary, ComputedReport, Grade, StoredReport,
    StoredStudentReport, StudentReport, StudentSummary, SubjectDefinition, SubjectReport,
    SubjectScore,
};
use crate::validate::{self, Rules, ValidationError};

const SEED_CLASS_ID: &str = "6f0c7a52-9a8e-4d5b-a2de-1c40f35b8e11";
const SEED_SUBJECTS: [(&str, i32); 10] = [
    ("Mathematics", 100),
    ("English Language", 100),
    ("Basic Science", 80),
    ("Social Studies", 60),
    ("Civic Education", 50),
    ("Agricultural Science", 70),
    ("Computer Studies", 100),
    ("French", 40),
    ("Fine Art", 50),
    ("Physical Education", 30),
];

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool, rules: &Rules) -> anyhow::Result<Uuid> {
    let class_id = Uuid::parse_str(SEED_CLASS_ID)?;
    let existing = sqlx::query("SELECT id FROM class_reports.classes WHERE id = $1")
        .bind(class_id)
        .fetch_optional(pool)
        .await?;
    if existing.is_some() {
        debug!(%class_id, "seed class already present");
        return Ok(class_id);
    }

    if rules.required_subjects > SEED_SUBJECTS.len() {
        anyhow::bail!(
            "seed data only covers {} subjects but {} are required",
            SEED_SUBJECTS.len(),
            rules.required_subjects
        );
    }
    let subjects: Vec<SubjectDefinition> = SEED_SUBJECTS
        .iter()
        .take(rules.required_subjects)
        .map(|(name, max_score)| SubjectDefinition::new(*name, *max_score))
        .collect();

    insert_class(pool, class_id, "JSS 2 Emerald", &subjects, rules).await?;

    let students = [
        ("Chiamaka Obi", 0.91),
        ("Tunde Bakare", 0.74),
        ("Amina Yusuf", 0.74),
        ("Kelechi Eze", 0.52),
        ("Ifeoma Nwosu", 0.38),
    ];
    for (offset, (name, ratio)) in students.iter().enumerate() {
        let scores: Vec<SubjectScore> = subjects
            .iter()
            .enumerate()
            .map(|(index, subject)| {
                let wobble = ((index + offset) % 3) as f64 * 0.04 - 0.04;
                let ratio = (ratio + wobble).clamp(0.0, 1.0);
                SubjectScore::new(
                    subject.name.clone(),
                    (f64::from(subject.max_score) * ratio).round() as i32,
                )
            })
            .collect();
        add_student(pool, class_id, name, &scores, rules).await?;
    }

    Ok(class_id)
}

pub async fn create_class(
    pool: &PgPool,
    name: &str,
    subjects: &[SubjectDefinition],
    rules: &Rules,
) -> anyhow::Result<Uuid> {
    insert_class(pool, Uuid::new_v4(), name, subjects, rules).await
}

async fn insert_class(
    pool: &PgPool,
    class_id: Uuid,
    name: &str,
    subjects: &[SubjectDefinition],
    rules: &Rules,
) -> anyhow::Result<Uuid> {
    validate::new_class(name, subjects, rules)?;

    let mut tx = pool.begin().await?;
    let inserted = sqlx::query(
        r#"
        INSERT INTO class_reports.classes (id, name)
        VALUES ($1, $2)
        ON CONFLICT (name) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(class_id)
    .bind(name.trim())
    .fetch_optional(&mut *tx)
    .await?;

    if inserted.is_none() {
        return Err(ValidationError::DuplicateClass(name.trim().to_string()).into());
    }

    for (ordinal, subject) in subjects.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO class_reports.subjects (class_id, name, max_score, ordinal)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(class_id)
        .bind(&subject.name)
        .bind(subject.max_score)
        .bind(i32::try_from(ordinal)?)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    info!(%class_id, name, subjects = subjects.len(), "class created");
    Ok(class_id)
}

pub async fn add_student(
    pool: &PgPool,
    class_id: Uuid,
    name: &str,
    scores: &[SubjectScore],
    rules: &Rules,
) -> anyhow::Result<Uuid> {
    let mut tx = pool.begin().await?;
    lock_class(&mut tx, class_id).await?;

    if report_exists(&mut tx, class_id).await? {
        return Err(ValidationError::ReportFinalized.into());
    }

    let subjects = fetch_subjects(&mut tx, class_id).await?;
    validate::student_record(name, scores, &subjects, rules)?;

    let student_id = insert_student(&mut tx, class_id, name, scores).await?;
    tx.commit().await?;

    info!(%class_id, %student_id, "student record added");
    Ok(student_id)
}

async fn insert_student(
    tx: &mut Transaction<'_, Postgres>,
    class_id: Uuid,
    name: &str,
    scores: &[SubjectScore],
) -> anyhow::Result<Uuid> {
    let inserted = sqlx::query(
        r#"
        INSERT INTO class_reports.students (id, class_id, full_name)
        VALUES ($1, $2, $3)
        ON CONFLICT (class_id, full_name) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(class_id)
    .bind(name.trim())
    .fetch_optional(&mut **tx)
    .await?;

    let Some(row) = inserted else {
        return Err(ValidationError::DuplicateStudent(name.trim().to_string()).into());
    };
    let student_id: Uuid = row.get("id");

    for entry in scores {
        sqlx::query(
            r#"
            INSERT INTO class_reports.scores (student_id, subject_name, score)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(student_id)
        .bind(&entry.subject_name)
        .bind(entry.score)
        .execute(&mut **tx)
        .await?;
    }

    sqlx::query("UPDATE class_reports.classes SET updated_at = now() WHERE id = $1")
        .bind(class_id)
        .execute(&mut **tx)
        .await?;

    Ok(student_id)
}

/// Imports long-format rows (`student_name,subject,score`). Every record is
/// checked before anything is written, so a bad row leaves the class untouched.
pub async fn import_csv(
    pool: &PgPool,
    class_id: Uuid,
    csv_path: &std::path::Path,
    rules: &Rules,
) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        student_name: String,
        subject: String,
        score: i32,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut order: Vec<String> = Vec::new();
    let mut records: HashMap<String, Vec<SubjectScore>> = HashMap::new();

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let name = row.student_name.trim().to_string();
        let entry = records.entry(name.clone()).or_insert_with(|| {
            order.push(name);
            Vec::new()
        });
        entry.push(SubjectScore::new(row.subject.trim(), row.score));
    }

    let mut tx = pool.begin().await?;
    lock_class(&mut tx, class_id).await?;
    if report_exists(&mut tx, class_id).await? {
        return Err(ValidationError::ReportFinalized.into());
    }

    let subjects = fetch_subjects(&mut tx, class_id).await?;
    for name in &order {
        validate::student_record(name, &records[name], &subjects, rules)
            .with_context(|| format!("record for {name}"))?;
    }

    for name in &order {
        insert_student(&mut tx, class_id, name, &records[name]).await?;
    }
    tx.commit().await?;

    info!(%class_id, students = order.len(), "csv import committed");
    Ok(order.len())
}

pub async fn list_classes(
    pool: &PgPool,
    has_report: Option<bool>,
) -> anyhow::Result<Vec<ClassSummary>> {
    let mut query = String::from(
        "SELECT c.id, c.name, cs.generated_at, \
         (SELECT COUNT(*) FROM class_reports.students s WHERE s.class_id = c.id) AS student_count \
         FROM class_reports.classes c \
         LEFT JOIN class_reports.class_summaries cs ON cs.class_id = c.id",
    );

    match has_report {
        Some(true) => query.push_str(" WHERE cs.class_id IS NOT NULL"),
        Some(false) => query.push_str(" WHERE cs.class_id IS NULL"),
        None => {}
    }
    query.push_str(" ORDER BY c.created_at, c.name");

    let rows = sqlx::query(&query).fetch_all(pool).await?;
    let mut classes = Vec::with_capacity(rows.len());

    for row in rows {
        classes.push(ClassSummary {
            id: row.get("id"),
            name: row.get("name"),
            student_count: row.get("student_count"),
            report_generated_at: row.get("generated_at"),
        });
    }

    Ok(classes)
}

/// Reads the subjects and every student's scores for a class that has no
/// report yet and enough students to rank.
pub async fn load_snapshot(
    pool: &PgPool,
    class_id: Uuid,
    rules: &Rules,
) -> anyhow::Result<ClassSnapshot> {
    let mut tx = pool.begin().await?;
    let class_name = lock_class(&mut tx, class_id).await?;

    if report_exists(&mut tx, class_id).await? {
        return Err(ValidationError::ReportExists.into());
    }

    let subjects = fetch_subjects(&mut tx, class_id).await?;

    let rows = sqlx::query(
        r#"
        SELECT s.id AS student_id, sc.subject_name, sc.score
        FROM class_reports.students s
        LEFT JOIN class_reports.scores sc ON sc.student_id = s.id
        WHERE s.class_id = $1
        "#,
    )
    .bind(class_id)
    .fetch_all(&mut *tx)
    .await?;
    tx.commit().await?;

    let mut scores: BTreeMap<String, Vec<SubjectScore>> = BTreeMap::new();
    for row in rows {
        let student_id: Uuid = row.get("student_id");
        let entry = scores.entry(student_id.to_string()).or_default();
        let subject_name: Option<String> = row.get("subject_name");
        let score: Option<i32> = row.get("score");
        if let (Some(subject_name), Some(score)) = (subject_name, score) {
            entry.push(SubjectScore::new(subject_name, score));
        }
    }

    validate::report_ready(scores.len(), rules)?;

    Ok(ClassSnapshot {
        class_id,
        class_name,
        subjects,
        scores,
    })
}

/// Persists a computed report in one transaction. A class only ever gets one
/// report; a second attempt is rejected and nothing is written.
pub async fn save_report(
    pool: &PgPool,
    class_id: Uuid,
    report: &ComputedReport,
) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;
    lock_class(&mut tx, class_id).await?;

    let class = &report.class;
    let inserted = sqlx::query(
        r#"
        INSERT INTO class_reports.class_summaries
        (class_id, total_students, highest_score, highest_percentage,
         lowest_score, lowest_percentage, generated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (class_id) DO NOTHING
        "#,
    )
    .bind(class_id)
    .bind(i32::try_from(class.total_students)?)
    .bind(class.highest_student_score)
    .bind(class.highest_student_score_as_percentage)
    .bind(class.lowest_student_score)
    .bind(class.lowest_student_score_as_percentage)
    .bind(class.generated_at)
    .execute(&mut *tx)
    .await?;

    if inserted.rows_affected() == 0 {
        return Err(ValidationError::ReportExists.into());
    }

    for student in report.students.values() {
        let student_id = Uuid::parse_str(&student.student_id)
            .with_context(|| format!("invalid student id {}", student.student_id))?;

        let updated = sqlx::query(
            r#"
            INSERT INTO class_reports.student_results
            (student_id, class_id, total_score, total_percentage,
             class_position, class_grade, generated_at)
            SELECT $1, $2, $3, $4, $5, $6, $7
            WHERE EXISTS (
                SELECT 1 FROM class_reports.students WHERE id = $1 AND class_id = $2
            )
            "#,
        )
        .bind(student_id)
        .bind(class_id)
        .bind(student.total_score)
        .bind(student.total_score_percentage)
        .bind(i32::try_from(student.class_position)?)
        .bind(student.class_grade.as_str())
        .bind(student.generated_at)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            anyhow::bail!("no record found for student {student_id} in class {class_id}");
        }

        for (ordinal, subject) in student.subject_reports.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO class_reports.subject_results
                (student_id, subject_name, ordinal, score, percentage, position, grade)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(student_id)
            .bind(&subject.subject_name)
            .bind(i32::try_from(ordinal)?)
            .bind(subject.score)
            .bind(subject.subject_percentage)
            .bind(i32::try_from(subject.subject_position)?)
            .bind(subject.subject_grade.as_str())
            .execute(&mut *tx)
            .await?;
        }
    }

    sqlx::query("UPDATE class_reports.classes SET updated_at = now() WHERE id = $1")
        .bind(class_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn load_report(pool: &PgPool, class_id: Uuid) -> anyhow::Result<StoredReport> {
    read_results(pool, class_id, None).await
}

pub async fn load_student_report(
    pool: &PgPool,
    class_id: Uuid,
    student_id: Uuid,
) -> anyhow::Result<StoredStudentReport> {
    let mut stored = read_results(pool, class_id, Some(student_id)).await?;
    let key = student_id.to_string();

    let report = stored
        .report
        .students
        .remove(&key)
        .ok_or_else(|| ValidationError::UnknownStudent(key.clone()))?;
    let student_name = stored.student_names.remove(&key).unwrap_or(key);

    Ok(StoredStudentReport {
        class_name: stored.class_name,
        student_name,
        class: stored.report.class,
        report,
    })
}

/// Reads a stored report, optionally narrowed to a single student.
async fn read_results(
    pool: &PgPool,
    class_id: Uuid,
    only_student: Option<Uuid>,
) -> anyhow::Result<StoredReport> {
    let mut tx = pool.begin().await?;
    let class_name = lock_class(&mut tx, class_id).await?;

    let summary = sqlx::query(
        r#"
        SELECT total_students, highest_score, highest_percentage,
               lowest_score, lowest_percentage, generated_at
        FROM class_reports.class_summaries
        WHERE class_id = $1
        "#,
    )
    .bind(class_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(ValidationError::ReportMissing)?;

    let total_students: i32 = summary.get("total_students");
    let class = ClassReport {
        total_students: usize::try_from(total_students)?,
        highest_student_score: summary.get("highest_score"),
        highest_student_score_as_percentage: summary.get("highest_percentage"),
        lowest_student_score: summary.get("lowest_score"),
        lowest_student_score_as_percentage: summary.get("lowest_percentage"),
        generated_at: summary.get("generated_at"),
    };

    let student_rows = sqlx::query(
        r#"
        SELECT r.student_id, s.full_name, r.total_score, r.total_percentage,
               r.class_position, r.class_grade, r.generated_at
        FROM class_reports.student_results r
        JOIN class_reports.students s ON s.id = r.student_id
        WHERE r.class_id = $1 AND ($2::uuid IS NULL OR r.student_id = $2)
        "#,
    )
    .bind(class_id)
    .bind(only_student)
    .fetch_all(&mut *tx)
    .await?;

    let subject_rows = sqlx::query(
        r#"
        SELECT sr.student_id, sr.subject_name, sr.score, sr.percentage, sr.position, sr.grade
        FROM class_reports.subject_results sr
        JOIN class_reports.students s ON s.id = sr.student_id
        WHERE s.class_id = $1 AND ($2::uuid IS NULL OR sr.student_id = $2)
        ORDER BY sr.student_id, sr.ordinal
        "#,
    )
    .bind(class_id)
    .bind(only_student)
    .fetch_all(&mut *tx)
    .await?;
    tx.commit().await?;

    let mut subject_reports: HashMap<Uuid, Vec<SubjectReport>> = HashMap::new();
    for row in subject_rows {
        let grade: String = row.get("grade");
        let position: i32 = row.get("position");
        subject_reports
            .entry(row.get("student_id"))
            .or_default()
            .push(SubjectReport {
                subject_name: row.get("subject_name"),
                score: row.get("score"),
                subject_percentage: row.get("percentage"),
                subject_position: usize::try_from(position)?,
                subject_grade: grade.parse()?,
            });
    }

    let mut students = BTreeMap::new();
    let mut student_names: BTreeMap<String, String> = BTreeMap::new();
    for row in student_rows {
        let student_id: Uuid = row.get("student_id");
        let grade: String = row.get("class_grade");
        let position: i32 = row.get("class_position");
        let generated_at: DateTime<Utc> = row.get("generated_at");
        let class_grade: Grade = grade.parse()?;

        student_names.insert(student_id.to_string(), row.get("full_name"));
        students.insert(
            student_id.to_string(),
            StudentReport {
                student_id: student_id.to_string(),
                total_score: row.get("total_score"),
                total_score_percentage: row.get("total_percentage"),
                class_position: usize::try_from(position)?,
                class_grade,
                subject_reports: subject_reports.remove(&student_id).unwrap_or_default(),
                generated_at,
            },
        );
    }

    Ok(StoredReport {
        class_name,
        student_names,
        report: ComputedReport { class, students },
    })
}

pub async fn load_class(pool: &PgPool, class_id: Uuid) -> anyhow::Result<ClassDetail> {
    let mut tx = pool.begin().await?;
    let row = sqlx::query(
        r#"
        SELECT c.id, c.name, c.created_at, c.updated_at, cs.generated_at,
               (SELECT COUNT(*) FROM class_reports.students s WHERE s.class_id = c.id) AS student_count
        FROM class_reports.classes c
        LEFT JOIN class_reports.class_summaries cs ON cs.class_id = c.id
        WHERE c.id = $1
        "#,
    )
    .bind(class_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ValidationError::UnknownClass(class_id.to_string()))?;

    let subjects = fetch_subjects(&mut tx, class_id).await?;
    tx.commit().await?;

    Ok(ClassDetail {
        id: row.get("id"),
        name: row.get("name"),
        subjects,
        student_count: row.get("student_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        report_generated_at: row.get("generated_at"),
    })
}

/// Students of a class, ranked first once a report exists, then by name.
pub async fn list_students(pool: &PgPool, class_id: Uuid) -> anyhow::Result<Vec<StudentSummary>> {
    let mut tx = pool.begin().await?;
    lock_class(&mut tx, class_id).await?;

    let rows = sqlx::query(
        r#"
        SELECT s.id, s.full_name, r.class_position, r.total_score, r.class_grade,
               (SELECT COUNT(*) FROM class_reports.scores sc WHERE sc.student_id = s.id) AS subject_count
        FROM class_reports.students s
        LEFT JOIN class_reports.student_results r ON r.student_id = s.id
        WHERE s.class_id = $1
        ORDER BY r.class_position NULLS LAST, s.full_name
        "#,
    )
    .bind(class_id)
    .fetch_all(&mut *tx)
    .await?;
    tx.commit().await?;

    let mut students = Vec::with_capacity(rows.len());
    for row in rows {
        let position: Option<i32> = row.get("class_position");
        let grade: Option<String> = row.get("class_grade");
        students.push(StudentSummary {
            id: row.get("id"),
            name: row.get("full_name"),
            subject_count: row.get("subject_count"),
            class_position: position.map(usize::try_from).transpose()?,
            total_score: row.get("total_score"),
            class_grade: grade.as_deref().map(str::parse::<Grade>).transpose()?,
        });
    }

    Ok(students)
}

async fn lock_class(tx: &mut Transaction<'_, Postgres>, class_id: Uuid) -> anyhow::Result<String> {
    let row = sqlx::query("SELECT name FROM class_reports.classes WHERE id = $1 FOR UPDATE")
        .bind(class_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| ValidationError::UnknownClass(class_id.to_string()))?;
    Ok(row.get("name"))
}

async fn report_exists(tx: &mut Transaction<'_, Postgres>, class_id: Uuid) -> anyhow::Result<bool> {
    let row = sqlx::query("SELECT 1 FROM class_reports.class_summaries WHERE class_id = $1")
        .bind(class_id)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(row.is_some())
}

async fn fetch_subjects(
    tx: &mut Transaction<'_, Postgres>,
    class_id: Uuid,
) -> anyhow::Result<Vec<SubjectDefinition>> {
    let rows = sqlx::query(
        "SELECT name, max_score FROM class_reports.subjects WHERE class_id = $1 ORDER BY ordinal",
    )
    .bind(class_id)
    .fetch_all(&mut **tx)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| SubjectDefinition {
            name: row.get("name"),
            max_score: row.get("max_score"),
        })
        .collect())
}
