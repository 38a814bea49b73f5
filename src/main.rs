use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod config;
mod db;
mod engine;
mod grading;
mod jobs;
mod models;
mod report;
mod validate;

use config::Config;
use jobs::ReportJobs;
use models::{SubjectDefinition, SubjectScore};
use validate::{Rules, ValidationError};

#[derive(Parser)]
#[command(name = "class-report")]
#[command(about = "Ranked, graded performance reports for a class", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a sample class with students
    Seed,
    /// Create a class and its subject catalogue
    CreateClass {
        #[arg(long)]
        name: String,
        /// Subject as NAME:MAX_SCORE, repeated once per subject
        #[arg(long = "subject", value_parser = parse_subject, required = true)]
        subjects: Vec<SubjectDefinition>,
    },
    /// Add one student's scores to a class
    AddStudent {
        #[arg(long)]
        class: Uuid,
        #[arg(long)]
        name: String,
        /// Score as SUBJECT=SCORE, repeated once per subject
        #[arg(long = "score", value_parser = parse_score, required = true)]
        scores: Vec<SubjectScore>,
    },
    /// Import student scores from a CSV file (student_name,subject,score)
    Import {
        #[arg(long)]
        class: Uuid,
        #[arg(long)]
        csv: PathBuf,
    },
    /// List classes
    Classes {
        #[arg(long, conflicts_with = "without_report")]
        with_report: bool,
        #[arg(long)]
        without_report: bool,
    },
    /// Show one class with its subject catalogue
    Class {
        #[arg(long)]
        class: Uuid,
    },
    /// List the students of a class with their standing
    Students {
        #[arg(long)]
        class: Uuid,
    },
    /// Compute and store the report for a class, or for every class without one
    #[command(group(
        ArgGroup::new("target")
            .args(["class", "pending"])
            .required(true)
            .multiple(false)
    ))]
    Generate {
        #[arg(long)]
        class: Option<Uuid>,
        #[arg(long)]
        pending: bool,
    },
    /// Print or write a stored report, for the whole class or one student
    Show {
        #[arg(long)]
        class: Uuid,
        #[arg(long)]
        student: Option<Uuid>,
        #[arg(long, value_enum, default_value_t = Format::Markdown)]
        format: Format,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Markdown,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    let outcome = run(cli.command, &pool, &config.rules).await;
    pool.close().await;

    if let Some(message) = outcome.as_ref().err().and_then(rejection_message) {
        eprintln!("{message}");
        std::process::exit(2);
    }

    outcome
}

async fn run(command: Commands, pool: &PgPool, rules: &Rules) -> anyhow::Result<()> {
    match command {
        Commands::InitDb => {
            db::init_db(pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let class_id = db::seed(pool, rules).await?;
            println!("Seed class ready: {class_id}.");
        }
        Commands::CreateClass { name, subjects } => {
            let class_id = db::create_class(pool, &name, &subjects, rules).await?;
            println!("Created class {name} ({class_id}).");
        }
        Commands::AddStudent {
            class,
            name,
            scores,
        } => {
            let student_id = db::add_student(pool, class, &name, &scores, rules).await?;
            println!("Added {name} ({student_id}).");
        }
        Commands::Import { class, csv } => {
            let inserted = db::import_csv(pool, class, &csv, rules).await?;
            println!("Imported {inserted} students from {}.", csv.display());
        }
        Commands::Classes {
            with_report,
            without_report,
        } => {
            let filter = match (with_report, without_report) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let classes = db::list_classes(pool, filter).await?;

            if classes.is_empty() {
                println!("No classes found.");
                return Ok(());
            }

            for class in classes {
                let status = match class.report_generated_at {
                    Some(at) => format!("report generated {}", at.format("%Y-%m-%d %H:%M UTC")),
                    None => "no report".to_string(),
                };
                println!(
                    "- {} ({}) {} students, {}",
                    class.name, class.id, class.student_count, status
                );
            }
        }
        Commands::Generate {
            class: Some(class_id),
            ..
        } => {
            generate_report(pool.clone(), class_id, *rules).await?;
            println!("Report generated for class {class_id}.");
        }
        Commands::Generate { class: None, .. } => {
            let pending = db::list_classes(pool, Some(false)).await?;
            if pending.is_empty() {
                println!("Every class already has a report.");
                return Ok(());
            }

            let mut jobs = ReportJobs::new();
            for class in pending {
                jobs.spawn(class.id, generate_report(pool.clone(), class.id, *rules));
            }
            info!(in_flight = jobs.in_flight(), "waiting for report jobs");

            let summary = jobs.wait().await;
            println!(
                "Generated {} reports, {} failed.",
                summary.completed, summary.failed
            );
        }
        Commands::Class { class } => {
            let detail = db::load_class(pool, class).await?;
            print!("{}", report::build_class_details(&detail));
        }
        Commands::Students { class } => {
            let students = db::list_students(pool, class).await?;
            print!("{}", report::build_student_list(&students));
        }
        Commands::Show {
            class,
            student: Some(student_id),
            format,
            out,
        } => {
            let stored = db::load_student_report(pool, class, student_id).await?;
            let rendered = match format {
                Format::Markdown => report::build_student_report(&stored),
                Format::Json => report::build_student_json(&stored)?,
            };
            write_output(rendered, out)?;
        }
        Commands::Show {
            class,
            student: None,
            format,
            out,
        } => {
            let stored = db::load_report(pool, class).await?;
            let rendered = match format {
                Format::Markdown => report::build_report(&stored),
                Format::Json => report::build_json(&stored)?,
            };
            write_output(rendered, out)?;
        }
    }

    Ok(())
}

fn write_output(rendered: String, out: Option<PathBuf>) -> anyhow::Result<()> {
    match out {
        Some(path) => {
            std::fs::write(&path, rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Report written to {}.", path.display());
        }
        None => print!("{rendered}"),
    }
    Ok(())
}

/// The user-facing message for a rejected request, with any added context kept.
fn rejection_message(err: &anyhow::Error) -> Option<String> {
    err.downcast_ref::<ValidationError>()?;
    Some(format!("Request rejected: {err:#}"))
}

async fn generate_report(pool: PgPool, class_id: Uuid, rules: Rules) -> anyhow::Result<()> {
    let snapshot = db::load_snapshot(&pool, class_id, &rules).await?;

    let report = engine::compute_report(&snapshot.subjects, &snapshot.scores, Utc::now())
        .map_err(|err| {
            error!(%class_id, class = %snapshot.class_name, "report computation failed: {err}");
            anyhow::anyhow!("report generation failed for class {class_id}")
        })?;

    db::save_report(&pool, snapshot.class_id, &report).await?;
    info!(
        %class_id,
        students = report.class.total_students,
        highest = report.class.highest_student_score,
        lowest = report.class.lowest_student_score,
        "report saved"
    );
    Ok(())
}

fn parse_subject(raw: &str) -> Result<SubjectDefinition, String> {
    let (name, max_score) = raw
        .rsplit_once(':')
        .ok_or_else(|| format!("expected NAME:MAX_SCORE, got {raw:?}"))?;
    let max_score = max_score
        .trim()
        .parse()
        .map_err(|err| format!("invalid max score in {raw:?}: {err}"))?;
    Ok(SubjectDefinition::new(name.trim(), max_score))
}

fn parse_score(raw: &str) -> Result<SubjectScore, String> {
    let (subject, score) = raw
        .rsplit_once('=')
        .ok_or_else(|| format!("expected SUBJECT=SCORE, got {raw:?}"))?;
    let score = score
        .trim()
        .parse()
        .map_err(|err| format!("invalid score in {raw:?}: {err}"))?;
    Ok(SubjectScore::new(subject.trim(), score))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_argument_splits_on_last_colon() {
        assert_eq!(
            parse_subject("Further Maths: Paper 2:60"),
            Ok(SubjectDefinition::new("Further Maths: Paper 2", 60))
        );
        assert!(parse_subject("Mathematics").is_err());
        assert!(parse_subject("Mathematics:lots").is_err());
    }

    #[test]
    fn score_argument_splits_on_equals() {
        assert_eq!(
            parse_score("Basic Science = 71"),
            Ok(SubjectScore::new("Basic Science", 71))
        );
        assert!(parse_score("Basic Science 71").is_err());
    }

    #[test]
    fn generate_requires_exactly_one_target() {
        assert!(Cli::try_parse_from(["class-report", "generate"]).is_err());
        assert!(Cli::try_parse_from(["class-report", "generate", "--pending"]).is_ok());
        let id = Uuid::new_v4().to_string();
        assert!(
            Cli::try_parse_from(["class-report", "generate", "--pending", "--class", id.as_str()]).is_err()
        );
    }

    #[test]
    fn rejection_keeps_import_context() {
        let err = anyhow::Error::new(ValidationError::UnknownSubject("Histroy".to_string()))
            .context("record for Ada Okafor");
        assert_eq!(
            rejection_message(&err).as_deref(),
            Some(
                "Request rejected: record for Ada Okafor: subject name Histroy does not exist, \
                 check spelling as subject names are case sensitive"
            )
        );

        let bare = anyhow::Error::new(ValidationError::ReportExists);
        assert_eq!(
            rejection_message(&bare).as_deref(),
            Some("Request rejected: a report has already been generated for this class")
        );

        assert_eq!(rejection_message(&anyhow::anyhow!("connection reset")), None);
    }

    #[test]
    fn show_accepts_optional_student() {
        let class = Uuid::new_v4();
        let student = Uuid::new_v4();
        let cli = Cli::try_parse_from([
            "class-report",
            "show",
            "--class",
            class.to_string().as_str(),
            "--student",
            student.to_string().as_str(),
            "--format",
            "json",
        ])
        .unwrap();

        match cli.command {
            Commands::Show {
                class: parsed_class,
                student: Some(parsed_student),
                format: Format::Json,
                out: None,
            } => {
                assert_eq!(parsed_class, class);
                assert_eq!(parsed_student, student);
            }
            _ => panic!("expected show for one student"),
        }

        assert!(Cli::try_parse_from(["class-report", "students"]).is_err());
        assert!(Cli::try_parse_from(["class-report", "class", "--class", "not-a-uuid"]).is_err());
    }

    #[test]
    fn create_class_collects_repeated_subjects() {
        let cli = Cli::try_parse_from([
            "class-report",
            "create-class",
            "--name",
            "JSS 1A",
            "--subject",
            "Mathematics:100",
            "--subject",
            "French:40",
        ])
        .unwrap();

        match cli.command {
            Commands::CreateClass { name, subjects } => {
                assert_eq!(name, "JSS 1A");
                assert_eq!(subjects.len(), 2);
                assert_eq!(subjects[1], SubjectDefinition::new("French", 40));
            }
            _ => panic!("expected create-class"),
        }
    }
}
