use serde::Serialize;
use tracing::info;

use crate::anomaly::AnomalyReport;
use crate::error::EngineError;
use crate::generation;
use crate::indicators::{self, IndicatorRow, RetentionSummary};
use crate::models::EnrollmentRecord;
use crate::period::{PeriodCodec, DEFAULT_PERIODS_PER_YEAR};
use crate::trajectory::{self, MatrixWidth, TrajectoryMatrix};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub periods_per_year: u32,
    pub width: MatrixWidth,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            periods_per_year: DEFAULT_PERIODS_PER_YEAR,
            width: MatrixWidth::GenerationCount,
        }
    }
}

/// Everything a renderer needs for one grade: the matrix, its indicators
/// and the data-quality findings.
#[derive(Debug, Clone, Serialize)]
pub struct TrajectoryReport {
    pub matrix: TrajectoryMatrix,
    pub indicators: Vec<IndicatorRow>,
    pub summary: RetentionSummary,
    pub anomalies: AnomalyReport,
}

/// Runs resolve -> pivot -> derive over one batch of records.
pub fn run(records: &[EnrollmentRecord], options: EngineOptions) -> Result<TrajectoryReport, EngineError> {
    let codec = PeriodCodec::new(options.periods_per_year)?;
    options.width.validate()?;

    let resolution = generation::resolve(records, &codec);
    let pivot = trajectory::build(records, &resolution.generations, &codec, options.width);
    let indicators = indicators::derive(&pivot.matrix);
    let summary = indicators::retention_summary(&pivot.matrix);
    let anomalies = resolution.anomalies.merge(pivot.anomalies);

    info!(
        records = records.len(),
        students = resolution.generations.len(),
        generations = pivot.matrix.generations().len(),
        width = pivot.matrix.width(),
        anomalies = anomalies.len(),
        "trajectory computed"
    );

    Ok(TrajectoryReport {
        matrix: pivot.matrix,
        indicators,
        summary,
        anomalies,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::Anomaly;
    use crate::indicators::Metric;
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

    #[test]
    fn smoke_scenario_end_to_end() {
        let report = run(&smoke_records(), EngineOptions::default()).unwrap();

        assert_eq!(report.matrix.generations(), ["202101", "202102", "202201"]);
        assert_eq!(report.matrix.row("202101"), Some(&[2, 2, 0][..]));
        assert_eq!(report.indicators.len(), 3);
        assert_eq!(report.indicators[0].first_year_retention, Metric::Value(1.0));
        assert_eq!(report.summary.total_new_entrants, 5);

        let offset_ten = report.anomalies.iter().any(|a| {
            matches!(a, Anomaly::OutOfRangeOffset { student_id, offset: 10, .. }
                if *student_id == StudentId::new("1"))
        });
        assert!(offset_ten);
        assert_eq!(report.anomalies.count_of("unresolved_generation"), 0);
    }

    #[test]
    fn unresolved_student_is_reported_once_and_not_counted() {
        let mut records = smoke_records();
        records.push(EnrollmentRecord::new("99", "202102", ReEnrolled));
        records.push(EnrollmentRecord::new("99", "202201", ReEnrolled));

        let report = run(&records, EngineOptions::default()).unwrap();
        assert_eq!(report.anomalies.count_of("unresolved_generation"), 1);
        let baseline = run(&smoke_records(), EngineOptions::default()).unwrap();
        assert_eq!(report.matrix, baseline.matrix);
    }

    #[test]
    fn one_bad_record_does_not_abort_the_batch() {
        let mut records = smoke_records();
        records.push(EnrollmentRecord::new("2", "20x201", ReEnrolled));
        let report = run(&records, EngineOptions::default()).unwrap();
        assert_eq!(report.anomalies.count_of("malformed_period"), 1);
        assert_eq!(report.matrix.row("202101"), Some(&[2, 2, 0][..]));
    }

    #[test]
    fn empty_input_is_a_valid_empty_report() {
        let report = run(&[], EngineOptions::default()).unwrap();
        assert!(report.matrix.is_empty());
        assert!(report.indicators.is_empty());
        assert!(report.anomalies.is_empty());
    }

    #[test]
    fn invalid_options_are_rejected() {
        let options = EngineOptions {
            periods_per_year: 0,
            ..EngineOptions::default()
        };
        assert_eq!(run(&[], options).unwrap_err(), EngineError::ZeroPeriodsPerYear);

        let options = EngineOptions {
            width: MatrixWidth::Fixed(0),
            ..EngineOptions::default()
        };
        assert_eq!(run(&[], options).unwrap_err(), EngineError::ZeroLookaheadWindow);

        let options = EngineOptions {
            width: MatrixWidth::Fixed(usize::MAX),
            ..EngineOptions::default()
        };
        assert!(matches!(
            run(&smoke_records(), options).unwrap_err(),
            EngineError::LookaheadWindowTooLarge { .. }
        ));
    }
}
