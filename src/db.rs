use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{EnrollmentRecord, Grade, ProgramRecord, RecordKind, StudentId};
use crate::settings::DatabaseSettings;

pub async fn connect(settings: &DatabaseSettings) -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to the enrolment Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn ping(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

async fn upsert_enrolment(
    pool: &PgPool,
    student: (&str, &str),
    program: (&str, &str, Grade),
    entry_period_id: &str,
) -> anyhow::Result<()> {
    let (student_id, full_name) = student;
    let (program_id, program_name, grade) = program;

    sqlx::query(
        r#"
        INSERT INTO trajectory.programs (id, name, grade)
        VALUES ($1, $2, $3)
        ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, grade = EXCLUDED.grade
        "#,
    )
    .bind(program_id)
    .bind(program_name)
    .bind(grade.code())
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO trajectory.students (id, full_name)
        VALUES ($1, $2)
        ON CONFLICT (id) DO UPDATE SET full_name = EXCLUDED.full_name
        "#,
    )
    .bind(student_id)
    .bind(full_name)
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO trajectory.student_programs (student_id, program_id, entry_period_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (student_id, program_id) DO UPDATE SET entry_period_id = EXCLUDED.entry_period_id
        "#,
    )
    .bind(student_id)
    .bind(program_id)
    .bind(entry_period_id)
    .execute(pool)
    .await?;

    Ok(())
}

async fn insert_attendance(
    pool: &PgPool,
    student_id: &str,
    program_id: &str,
    period_id: &str,
    source_key: &str,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO trajectory.attendance (id, student_id, program_id, period_id, source_key)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(program_id)
    .bind(period_id)
    .bind(source_key)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Loads a small licenciatura cohort set covering three generations.
pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let program = ("LLADM", "Administración 2020", Grade::Licenciatura);
    let students = [
        ("1", "Avila Reyes Ana", "202101"),
        ("2", "Bravo Soto Luis", "202101"),
        ("3", "Castro Gil Marta", "202102"),
        ("4", "Duarte Paz Jorge", "202102"),
        ("5", "Esquivel Luna Sofía", "202201"),
    ];
    for (id, name, entry) in students {
        upsert_enrolment(pool, (id, name), program, entry).await?;
    }

    let attendance = [
        ("1", "202101"),
        ("2", "202101"),
        ("3", "202102"),
        ("4", "202102"),
        ("5", "202201"),
        ("1", "202102"),
        ("1", "202201"),
        ("2", "202102"),
        ("3", "202201"),
        ("3", "202202"),
        ("4", "202201"),
    ];
    for (student_id, period_id) in attendance {
        let source_key = format!("seed-{student_id}-{period_id}");
        insert_attendance(pool, student_id, program.0, period_id, &source_key).await?;
    }

    Ok(())
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        student_id: String,
        full_name: String,
        program_id: String,
        program_name: String,
        grade: Grade,
        entry_period_id: String,
        period_id: String,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid CSV row {}", line + 1))?;
        upsert_enrolment(
            pool,
            (row.student_id.as_str(), row.full_name.as_str()),
            (row.program_id.as_str(), row.program_name.as_str(), row.grade),
            &row.entry_period_id,
        )
        .await?;

        let source_key = row
            .source_key
            .filter(|key| !key.trim().is_empty())
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        if insert_attendance(pool, &row.student_id, &row.program_id, &row.period_id, &source_key).await? {
            inserted += 1;
        }
    }

    Ok(inserted)
}

/// Attendance of one grade within a year range. A row is a new entry when
/// the attended period is the student's entry period for that program.
pub async fn fetch_enrollments(
    pool: &PgPool,
    grade: Grade,
    year_start: i32,
    year_end: i32,
) -> anyhow::Result<Vec<EnrollmentRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT a.student_id, a.period_id,
               (a.period_id = sp.entry_period_id) AS is_new_entry
        FROM trajectory.attendance a
        JOIN trajectory.student_programs sp
          ON sp.student_id = a.student_id AND sp.program_id = a.program_id
        JOIN trajectory.programs p ON p.id = sp.program_id
        WHERE p.grade = $1
          AND LEFT(a.period_id, 4) BETWEEN $2 AND $3
        ORDER BY a.period_id ASC, a.student_id ASC
        "#,
    )
    .bind(grade.code())
    .bind(format!("{year_start:04}"))
    .bind(format!("{year_end:04}"))
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to fetch enrolments for {grade}"))?;

    let records: Vec<EnrollmentRecord> = rows
        .into_iter()
        .map(|row| {
            let is_new_entry: bool = row.get("is_new_entry");
            EnrollmentRecord {
                student_id: StudentId(row.get("student_id")),
                period_id: row.get("period_id"),
                record_kind: if is_new_entry {
                    RecordKind::NewEntry
                } else {
                    RecordKind::ReEnrolled
                },
            }
        })
        .collect();

    info!(%grade, year_start, year_end, rows = records.len(), "fetched enrolments");
    debug!(
        new_entries = records.iter().filter(|r| r.record_kind == RecordKind::NewEntry).count(),
        "new-entry rows"
    );
    Ok(records)
}

/// Every attendance row in the year range with student and program details,
/// all grades together. Newest periods first, then by name.
pub async fn fetch_consolidated(
    pool: &PgPool,
    year_start: i32,
    year_end: i32,
) -> anyhow::Result<Vec<ProgramRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT a.period_id, a.student_id, s.full_name,
               p.grade, p.id AS program_id, p.name AS program_name,
               (a.period_id = sp.entry_period_id) AS is_new_entry
        FROM trajectory.attendance a
        JOIN trajectory.students s ON s.id = a.student_id
        JOIN trajectory.student_programs sp
          ON sp.student_id = a.student_id AND sp.program_id = a.program_id
        JOIN trajectory.programs p ON p.id = sp.program_id
        WHERE LEFT(a.period_id, 4) BETWEEN $1 AND $2
        ORDER BY a.period_id DESC, s.full_name ASC, p.id ASC
        "#,
    )
    .bind(format!("{year_start:04}"))
    .bind(format!("{year_end:04}"))
    .fetch_all(pool)
    .await
    .context("failed to fetch consolidated attendance")?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let grade: String = row.get("grade");
        let is_new_entry: bool = row.get("is_new_entry");
        records.push(ProgramRecord {
            period_id: row.get("period_id"),
            student_id: StudentId(row.get("student_id")),
            full_name: row.get("full_name"),
            grade: grade.parse().map_err(anyhow::Error::msg)?,
            program_id: row.get("program_id"),
            program_name: row.get("program_name"),
            record_kind: if is_new_entry {
                RecordKind::NewEntry
            } else {
                RecordKind::ReEnrolled
            },
        });
    }

    info!(year_start, year_end, rows = records.len(), "fetched consolidated attendance");
    Ok(records)
}
