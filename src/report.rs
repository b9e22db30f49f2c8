use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDate;

use crate::engine::TrajectoryReport;
use crate::indicators::INDICATOR_HEADERS;
use crate::models::{EnrollmentRecord, Grade, PeriodSummary, ProgramRecord, ProgramSummary, RecordKind};
use crate::trajectory::TrajectoryMatrix;

pub fn summarize_by_period(records: &[EnrollmentRecord]) -> Vec<PeriodSummary> {
    let mut map: BTreeMap<&str, (BTreeSet<&str>, BTreeSet<&str>)> = BTreeMap::new();

    for record in records {
        let entry = map.entry(record.period_id.as_str()).or_default();
        match record.record_kind {
            RecordKind::NewEntry => entry.0.insert(record.student_id.0.as_str()),
            RecordKind::ReEnrolled => entry.1.insert(record.student_id.0.as_str()),
        };
    }

    map.into_iter()
        .map(|(period_id, (new_entries, re_enrolled))| PeriodSummary {
            period_id: period_id.to_string(),
            new_entries: new_entries.len(),
            re_enrolled: re_enrolled.len(),
        })
        .collect()
}

/// New entrants and distinct students per program and period for one grade.
pub fn summarize_by_program(records: &[ProgramRecord], grade: Grade) -> Vec<ProgramSummary> {
    let mut map: BTreeMap<(&str, &str), (BTreeSet<&str>, BTreeSet<&str>)> = BTreeMap::new();

    for record in records.iter().filter(|r| r.grade == grade) {
        let entry = map
            .entry((record.program_id.as_str(), record.period_id.as_str()))
            .or_default();
        if record.record_kind == RecordKind::NewEntry {
            entry.0.insert(record.student_id.0.as_str());
        }
        entry.1.insert(record.student_id.0.as_str());
    }

    map.into_iter()
        .map(|((program_id, period_id), (new_entries, students))| ProgramSummary {
            program_id: program_id.to_string(),
            period_id: period_id.to_string(),
            new_entries: new_entries.len(),
            total_students: students.len(),
        })
        .collect()
}

pub fn write_matrix_csv<W: io::Write>(writer: W, matrix: &TrajectoryMatrix) -> anyhow::Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(matrix.column_labels())?;
    for (generation, row) in matrix.rows() {
        let mut record = Vec::with_capacity(row.len() + 1);
        record.push(generation.to_string());
        record.extend(row.iter().map(usize::to_string));
        csv.write_record(&record)?;
    }
    csv.flush()?;
    Ok(())
}

pub fn write_indicators_csv<W: io::Write>(writer: W, report: &TrajectoryReport) -> anyhow::Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(INDICATOR_HEADERS)?;
    for row in &report.indicators {
        csv.write_record(row.to_record())?;
    }
    csv.flush()?;
    Ok(())
}

pub fn write_records_csv<W: io::Write>(
    writer: W,
    records: &[EnrollmentRecord],
    kind: RecordKind,
) -> anyhow::Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(["periodo_id", "estudiante_id", "tipo"])?;
    for record in records.iter().filter(|r| r.record_kind == kind) {
        csv.write_record([record.period_id.as_str(), record.student_id.0.as_str(), kind.as_str()])?;
    }
    csv.flush()?;
    Ok(())
}

pub fn write_period_summary_csv<W: io::Write>(writer: W, periods: &[PeriodSummary]) -> anyhow::Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(["periodo_id", "nuevo_ingreso", "reinscritos"])?;
    for period in periods {
        csv.serialize((&period.period_id, period.new_entries, period.re_enrolled))?;
    }
    csv.flush()?;
    Ok(())
}

pub fn write_program_summary_csv<W: io::Write>(writer: W, programs: &[ProgramSummary]) -> anyhow::Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(["programa_id", "periodo_id", "nuevo_ingreso", "total_estudiantes"])?;
    for program in programs {
        csv.serialize((
            &program.program_id,
            &program.period_id,
            program.new_entries,
            program.total_students,
        ))?;
    }
    csv.flush()?;
    Ok(())
}

/// All attendance rows of every grade, one line each.
pub fn write_consolidated_csv<W: io::Write>(writer: W, records: &[ProgramRecord]) -> anyhow::Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record([
        "periodo_id",
        "estudiante_id",
        "nombre",
        "grado",
        "programa_id",
        "programa",
        "tipo",
    ])?;
    for record in records {
        csv.write_record([
            record.period_id.as_str(),
            record.student_id.0.as_str(),
            record.full_name.as_str(),
            record.grade.code(),
            record.program_id.as_str(),
            record.program_name.as_str(),
            record.record_kind.as_str(),
        ])?;
    }
    csv.flush()?;
    Ok(())
}

pub fn report_stem(grade: Grade, date: NaiveDate) -> String {
    format!(
        "Trayectoria_online_{}_{}",
        grade.display_name(),
        date.format("%Y%m%d")
    )
}

pub fn build_report(
    grade: Grade,
    year_start: i32,
    year_end: i32,
    report: &TrajectoryReport,
    periods: &[PeriodSummary],
    programs: &[ProgramSummary],
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Trayectoria {} ({})", grade.display_name(), grade.code());
    let _ = writeln!(output, "Periodos {year_start}-{year_end}");
    let _ = writeln!(output);
    let _ = writeln!(output, "## Resumen por periodo");

    if periods.is_empty() {
        let _ = writeln!(output, "No enrolment records for this range.");
    } else {
        for period in periods {
            let _ = writeln!(
                output,
                "- {}: {} nuevo ingreso, {} reinscritos",
                period.period_id, period.new_entries, period.re_enrolled
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Resumen por programa");

    if programs.is_empty() {
        let _ = writeln!(output, "No program activity for this range.");
    } else {
        for program in programs {
            let _ = writeln!(
                output,
                "- {} {}: {} nuevo ingreso, {} estudiantes",
                program.program_id, program.period_id, program.new_entries, program.total_students
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Trayectoria");

    if report.matrix.is_empty() {
        let _ = writeln!(output, "No cohorts could be resolved.");
    } else {
        let labels = report.matrix.column_labels();
        let _ = writeln!(output, "| {} |", labels.join(" | "));
        let _ = writeln!(output, "|{}", "---|".repeat(labels.len()));
        for (generation, row) in report.matrix.rows() {
            let cells: Vec<String> = row.iter().map(usize::to_string).collect();
            let _ = writeln!(output, "| {} | {} |", generation, cells.join(" | "));
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Indicadores FIMPES");

    if report.indicators.is_empty() {
        let _ = writeln!(output, "No indicators for this range.");
    } else {
        let _ = writeln!(output, "| {} |", INDICATOR_HEADERS.join(" | "));
        let _ = writeln!(output, "|{}", "---|".repeat(INDICATOR_HEADERS.len()));
        for row in &report.indicators {
            let _ = writeln!(output, "| {} |", row.to_record().join(" | "));
        }
        let summary = &report.summary;
        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "- Retención 1er año: promedio {}, mediana {}",
            summary.mean_first_year_retention, summary.median_first_year_retention
        );
        let _ = writeln!(output, "- Total nuevo ingreso: {}", summary.total_new_entrants);
        let _ = writeln!(output, "- Total egresados (P6): {}", summary.total_graduates);
        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "N/D: dato no disponible. Celda vacía: indicador indefinido (cero alumnos de nuevo ingreso). \
             Egresados se reporta N/D, no 0, cuando la trayectoria no llega a P6."
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Anomalías");

    if report.anomalies.is_empty() {
        let _ = writeln!(output, "No data-quality issues found.");
    } else {
        for (label, count) in report.anomalies.counts() {
            let _ = writeln!(output, "- {label}: {count}");
        }
    }

    output
}

fn create(path: &Path) -> anyhow::Result<std::fs::File> {
    std::fs::File::create(path).with_context(|| format!("failed to create {}", path.display()))
}

/// Writes every table of one grade under `out_dir`; returns the written paths.
pub fn write_report_files(
    out_dir: &Path,
    grade: Grade,
    (year_start, year_end): (i32, i32),
    date: NaiveDate,
    records: &[EnrollmentRecord],
    consolidated: &[ProgramRecord],
    report: &TrajectoryReport,
) -> anyhow::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    let stem = report_stem(grade, date);
    let path = |suffix: &str| out_dir.join(format!("{stem}{suffix}"));
    let periods = summarize_by_period(records);
    let programs = summarize_by_program(consolidated, grade);

    let consolidated_path = path("_datos_consolidados.csv");
    write_consolidated_csv(create(&consolidated_path)?, consolidated)?;

    let matrix_path = path("_trayectoria.csv");
    write_matrix_csv(create(&matrix_path)?, &report.matrix)?;

    let indicators_path = path("_cuadro_fimpes.csv");
    write_indicators_csv(create(&indicators_path)?, report)?;

    let new_entries_path = path("_nuevo_ingreso.csv");
    write_records_csv(create(&new_entries_path)?, records, RecordKind::NewEntry)?;

    let re_enrolled_path = path("_reinscritos.csv");
    write_records_csv(create(&re_enrolled_path)?, records, RecordKind::ReEnrolled)?;

    let periods_path = path("_resumen_periodos.csv");
    write_period_summary_csv(create(&periods_path)?, &periods)?;

    let programs_path = path("_programas.csv");
    write_program_summary_csv(create(&programs_path)?, &programs)?;

    let anomalies_path = path("_anomalias.json");
    serde_json::to_writer_pretty(create(&anomalies_path)?, &report.anomalies)?;

    let markdown_path = path(".md");
    std::fs::write(
        &markdown_path,
        build_report(grade, year_start, year_end, report, &periods, &programs),
    )?;

    Ok(vec![
        consolidated_path,
        matrix_path,
        indicators_path,
        new_entries_path,
        re_enrolled_path,
        periods_path,
        programs_path,
        anomalies_path,
        markdown_path,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{run, EngineOptions};
    use crate::models::RecordKind::{NewEntry, ReEnrolled};
    use crate::models::StudentId;

    fn smoke_records() -> Vec<EnrollmentRecord> {
        vec![
            EnrollmentRecord::new("1", "202101", NewEntry),
            EnrollmentRecord::new("2", "202101", NewEntry),
            EnrollmentRecord::new("3", "202102", NewEntry),
            EnrollmentRecord::new("4", "202102", NewEntry),
            EnrollmentRecord::new("5", "202201", NewEntry),
            EnrollmentRecord::new("1", "202102", ReEnrolled),
            EnrollmentRecord::new("1", "202201", ReEnrolled),
            EnrollmentRecord::new("2", "202102", ReEnrolled),
            EnrollmentRecord::new("3", "202201", ReEnrolled),
            EnrollmentRecord::new("3", "202202", ReEnrolled),
            EnrollmentRecord::new("4", "202201", ReEnrolled),
        ]
    }

    fn program_record(
        student: &str,
        period: &str,
        grade: Grade,
        program: &str,
        kind: RecordKind,
    ) -> ProgramRecord {
        ProgramRecord {
            period_id: period.to_string(),
            student_id: StudentId::new(student),
            full_name: format!("Alumno {student}"),
            grade,
            program_id: program.to_string(),
            program_name: format!("Programa {program}"),
            record_kind: kind,
        }
    }

    fn program_records() -> Vec<ProgramRecord> {
        vec![
            program_record("1", "202101", Grade::Licenciatura, "LLADM", NewEntry),
            program_record("2", "202101", Grade::Licenciatura, "LLADM", NewEntry),
            program_record("3", "202101", Grade::Licenciatura, "LLDER", NewEntry),
            program_record("1", "202102", Grade::Licenciatura, "LLADM", ReEnrolled),
            program_record("1", "202102", Grade::Licenciatura, "LLADM", ReEnrolled),
            program_record("2", "202102", Grade::Licenciatura, "LLADM", ReEnrolled),
            program_record("8", "202102", Grade::Licenciatura, "LLADM", NewEntry),
            program_record("9", "202101", Grade::Maestria, "MLEDU", NewEntry),
        ]
    }

    fn to_string(bytes: Vec<u8>) -> String {
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn periods_count_distinct_students() {
        let mut records = smoke_records();
        records.push(EnrollmentRecord::new("1", "202102", ReEnrolled));
        let periods = summarize_by_period(&records);

        assert_eq!(periods.len(), 4);
        assert_eq!(
            periods[1],
            PeriodSummary {
                period_id: "202102".to_string(),
                new_entries: 2,
                re_enrolled: 2,
            }
        );
        assert_eq!(periods[3].re_enrolled, 1);
    }

    #[test]
    fn programs_split_new_entries_by_program_and_period() {
        let programs = summarize_by_program(&program_records(), Grade::Licenciatura);
        assert_eq!(
            programs,
            vec![
                ProgramSummary {
                    program_id: "LLADM".to_string(),
                    period_id: "202101".to_string(),
                    new_entries: 2,
                    total_students: 2,
                },
                ProgramSummary {
                    program_id: "LLADM".to_string(),
                    period_id: "202102".to_string(),
                    new_entries: 1,
                    total_students: 3,
                },
                ProgramSummary {
                    program_id: "LLDER".to_string(),
                    period_id: "202101".to_string(),
                    new_entries: 1,
                    total_students: 1,
                },
            ]
        );
        assert!(summarize_by_program(&program_records(), Grade::Especialidad).is_empty());
    }

    #[test]
    fn program_and_consolidated_sheets_render() {
        let mut buffer = Vec::new();
        let programs = summarize_by_program(&program_records(), Grade::Licenciatura);
        write_program_summary_csv(&mut buffer, &programs).unwrap();
        let csv = to_string(buffer);
        assert_eq!(
            csv.lines().collect::<Vec<_>>(),
            vec![
                "programa_id,periodo_id,nuevo_ingreso,total_estudiantes",
                "LLADM,202101,2,2",
                "LLADM,202102,1,3",
                "LLDER,202101,1,1",
            ]
        );

        let mut buffer = Vec::new();
        write_consolidated_csv(&mut buffer, &program_records()).unwrap();
        let csv = to_string(buffer);
        assert_eq!(csv.lines().count(), 9);
        assert_eq!(csv.lines().nth(1), Some("202101,1,Alumno 1,LL,LLADM,Programa LLADM,NI"));
        assert_eq!(csv.lines().last(), Some("202101,9,Alumno 9,ML,MLEDU,Programa MLEDU,NI"));
    }

    #[test]
    fn matrix_csv_follows_column_contract() {
        let report = run(&smoke_records(), EngineOptions::default()).unwrap();
        let mut buffer = Vec::new();
        write_matrix_csv(&mut buffer, &report.matrix).unwrap();

        let csv = to_string(buffer);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "Generación,Nuevo ingreso,P2,P3");
        assert_eq!(lines[1], "202101,2,2,0");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn indicator_csv_has_stable_schema() {
        let report = run(&smoke_records(), EngineOptions::default()).unwrap();
        let mut buffer = Vec::new();
        write_indicators_csv(&mut buffer, &report).unwrap();

        let csv = to_string(buffer);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(
            lines[0],
            "Cohort,Alumnos de Nuevo Ingreso,Eficiencia de retención 1er año,Abandono,Activo,Cambios de carrera,% Rezago,Egresados"
        );
        assert_eq!(lines[1], "202101,2,1,N/D,0,N/D,0,N/D");
    }

    #[test]
    fn record_sheets_split_by_kind() {
        let mut buffer = Vec::new();
        write_records_csv(&mut buffer, &smoke_records(), NewEntry).unwrap();
        let csv = to_string(buffer);
        assert_eq!(csv.lines().count(), 6);
        assert!(csv.lines().skip(1).all(|line| line.ends_with(",NI")));
    }

    #[test]
    fn period_summary_csv_lists_counts() {
        let mut buffer = Vec::new();
        write_period_summary_csv(&mut buffer, &summarize_by_period(&smoke_records())).unwrap();
        let csv = to_string(buffer);
        assert_eq!(csv.lines().nth(1), Some("202101,2,0"));
    }

    #[test]
    fn markdown_report_lists_sections() {
        let records = smoke_records();
        let report = run(&records, EngineOptions::default()).unwrap();
        let markdown = build_report(
            Grade::Licenciatura,
            2021,
            2022,
            &report,
            &summarize_by_period(&records),
            &summarize_by_program(&program_records(), Grade::Licenciatura),
        );

        assert!(markdown.starts_with("# Trayectoria Licenciatura (LL)"));
        assert!(markdown.contains("| 202101 | 2 | 2 | 0 |"));
        assert!(markdown.contains("- out_of_range_offset: 4"));
        assert!(markdown.contains("- Total nuevo ingreso: 5"));
        assert!(markdown.contains("- LLADM 202101: 2 nuevo ingreso, 2 estudiantes"));
        assert!(markdown.contains("Egresados se reporta N/D, no 0"));
    }

    #[test]
    fn empty_report_renders_placeholders() {
        let report = run(&[], EngineOptions::default()).unwrap();
        let markdown = build_report(Grade::Maestria, 2021, 2025, &report, &[], &[]);
        assert!(markdown.contains("No cohorts could be resolved."));
        assert!(markdown.contains("No data-quality issues found."));
    }

    #[test]
    fn stem_uses_grade_name_and_date() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        assert_eq!(
            report_stem(Grade::Especialidad, date),
            "Trayectoria_online_Especialidad_20261018"
        );
    }
}
