use std::fmt;

use serde::{Serialize, Serializer};

use crate::trajectory::TrajectoryMatrix;

/// Column order of the rendered indicator table.
pub const INDICATOR_HEADERS: [&str; 8] = [
    "Cohort",
    "Alumnos de Nuevo Ingreso",
    "Eficiencia de retención 1er año",
    "Abandono",
    "Activo",
    "Cambios de carrera",
    "% Rezago",
    "Egresados",
];

/// Offset whose column serves as the rough graduate count (`P6`).
const GRADUATE_OFFSET: usize = 5;

/// A derived value that may be missing for two different reasons.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Metric<T> {
    Value(T),
    /// The formula applies but has no answer (zero denominator, missing column).
    Undefined,
    /// The source data cannot support this metric yet.
    NotAvailable,
}

impl<T: fmt::Display> fmt::Display for Metric<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Value(v) => v.fmt(f),
            Metric::Undefined => Ok(()),
            Metric::NotAvailable => f.write_str("N/D"),
        }
    }
}

impl<T: Serialize> Serialize for Metric<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Metric::Value(v) => v.serialize(serializer),
            Metric::Undefined => serializer.serialize_none(),
            Metric::NotAvailable => serializer.serialize_str("N/D"),
        }
    }
}

/// One cohort line of the FIMPES indicator table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorRow {
    pub cohort: String,
    pub new_entrants: usize,
    pub first_year_retention: Metric<f64>,
    pub dropout: Metric<usize>,
    pub active: Metric<usize>,
    pub program_changes: Metric<usize>,
    pub lag_ratio: Metric<f64>,
    pub graduates: Metric<usize>,
}

impl IndicatorRow {
    /// Cells in `INDICATOR_HEADERS` order.
    pub fn to_record(&self) -> Vec<String> {
        vec![
            self.cohort.clone(),
            self.new_entrants.to_string(),
            self.first_year_retention.to_string(),
            self.dropout.to_string(),
            self.active.to_string(),
            self.program_changes.to_string(),
            self.lag_ratio.to_string(),
            self.graduates.to_string(),
        ]
    }
}

pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

pub fn ratio(numerator: usize, denominator: usize) -> Metric<f64> {
    if denominator == 0 {
        Metric::Undefined
    } else {
        Metric::Value(round4(numerator as f64 / denominator as f64))
    }
}

pub fn derive(matrix: &TrajectoryMatrix) -> Vec<IndicatorRow> {
    matrix
        .rows()
        .map(|(generation, row)| {
            let new_entrants = row.first().copied().unwrap_or(0);
            let active = match row.last() {
                Some(count) => Metric::Value(*count),
                None => Metric::Undefined,
            };
            let first_year_retention = match row.get(1) {
                Some(p2) => ratio(*p2, new_entrants),
                None => Metric::Undefined,
            };
            let lag_ratio = match active {
                Metric::Value(count) => ratio(count, new_entrants),
                _ => Metric::Undefined,
            };
            let graduates = match row.get(GRADUATE_OFFSET) {
                Some(count) => Metric::Value(*count),
                None => Metric::NotAvailable,
            };

            IndicatorRow {
                cohort: generation.to_string(),
                new_entrants,
                first_year_retention,
                dropout: Metric::NotAvailable,
                active,
                program_changes: Metric::NotAvailable,
                lag_ratio,
                graduates,
            }
        })
        .collect()
}

/// Aggregate retention figures across all cohorts of a matrix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetentionSummary {
    pub cohorts: usize,
    pub mean_first_year_retention: Metric<f64>,
    pub median_first_year_retention: Metric<f64>,
    pub total_new_entrants: usize,
    pub total_graduates: Metric<usize>,
}

pub fn retention_summary(matrix: &TrajectoryMatrix) -> RetentionSummary {
    let mut retention: Vec<f64> = matrix
        .rows()
        .filter_map(|(_, row)| match (row.first(), row.get(1)) {
            (Some(&new), Some(&p2)) if new > 0 => Some(p2 as f64 / new as f64),
            _ => None,
        })
        .collect();
    retention.sort_by(|a, b| a.total_cmp(b));

    let (mean, median) = if retention.is_empty() {
        (Metric::Undefined, Metric::Undefined)
    } else {
        let mean = retention.iter().sum::<f64>() / retention.len() as f64;
        let mid = retention.len() / 2;
        let median = if retention.len() % 2 == 0 {
            (retention[mid - 1] + retention[mid]) / 2.0
        } else {
            retention[mid]
        };
        (Metric::Value(round4(mean)), Metric::Value(round4(median)))
    };

    let total_graduates = if matrix.width() > GRADUATE_OFFSET {
        Metric::Value(matrix.rows().map(|(_, row)| row[GRADUATE_OFFSET]).sum())
    } else {
        Metric::NotAvailable
    };

    RetentionSummary {
        cohorts: matrix.generations().len(),
        mean_first_year_retention: mean,
        median_first_year_retention: median,
        total_new_entrants: matrix.rows().map(|(_, row)| row.first().copied().unwrap_or(0)).sum(),
        total_graduates,
    }
}
