use anyhow::Context;

use crate::validate::Rules;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub rules: Rules,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set to a production Postgres instance")?;
        Self::from_lookup(database_url, |key| std::env::var(key).ok())
    }

    fn from_lookup(
        database_url: String,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let defaults = Rules::default();
        Ok(Self {
            database_url,
            max_connections: at_least(
                parse_or(&lookup, "DB_MAX_CONNECTIONS", 5)?,
                1,
                "DB_MAX_CONNECTIONS",
            )?,
            rules: Rules {
                required_subjects: at_least(
                    parse_or(&lookup, "REQUIRED_CLASS_SUBJECTS", defaults.required_subjects)?,
                    1,
                    "REQUIRED_CLASS_SUBJECTS",
                )?,
                min_students: at_least(
                    parse_or(&lookup, "MIN_STUDENTS_FOR_REPORT", defaults.min_students)?,
                    2,
                    "MIN_STUDENTS_FOR_REPORT",
                )?,
            },
        })
    }
}

fn parse_or<T>(lookup: impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a number, got {raw:?}")),
        _ => Ok(default),
    }
}

fn at_least<T>(value: T, min: T, key: &str) -> anyhow::Result<T>
where
    T: PartialOrd + std::fmt::Display,
{
    if value < min {
        anyhow::bail!("{key} must be at least {min}, got {value}");
    }
    Ok(value)
}
