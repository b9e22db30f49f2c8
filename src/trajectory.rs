use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, warn};

use crate::anomaly::{Anomaly, AnomalyReport};
use crate::error::EngineError;
use crate::models::{EnrollmentRecord, RecordKind, StudentId};
use crate::period::{Period, PeriodCodec};

pub const GENERATION_LABEL: &str = "Generación";
pub const NEW_ENTRANTS_LABEL: &str = "Nuevo ingreso";

/// How many offset columns the matrix carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatrixWidth {
    /// One column per distinct generation (square matrix).
    #[default]
    GenerationCount,
    /// A fixed lookahead window, independent of how many cohorts exist.
    Fixed(usize),
}

/// Upper bound on a fixed window: twenty years of ten-term periods.
pub const MAX_LOOKAHEAD_WINDOW: usize = 200;

impl MatrixWidth {
    pub fn lookahead(window: Option<usize>) -> Result<Self, EngineError> {
        let width = match window {
            None => MatrixWidth::GenerationCount,
            Some(n) => MatrixWidth::Fixed(n),
        };
        width.validate()?;
        Ok(width)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        match *self {
            MatrixWidth::GenerationCount => Ok(()),
            MatrixWidth::Fixed(0) => Err(EngineError::ZeroLookaheadWindow),
            MatrixWidth::Fixed(window) if window > MAX_LOOKAHEAD_WINDOW => {
                Err(EngineError::LookaheadWindowTooLarge {
                    window,
                    max: MAX_LOOKAHEAD_WINDOW,
                })
            }
            MatrixWidth::Fixed(_) => Ok(()),
        }
    }

    fn resolve(&self, generations: usize) -> usize {
        match self {
            MatrixWidth::GenerationCount => generations,
            MatrixWidth::Fixed(n) => *n,
        }
    }
}

/// Distinct-student counts per generation and period offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrajectoryMatrix {
    generations: Vec<String>,
    width: usize,
    cells: Vec<Vec<usize>>,
}

impl TrajectoryMatrix {
    pub fn empty() -> Self {
        Self {
            generations: Vec::new(),
            width: 0,
            cells: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.generations.is_empty()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn generations(&self) -> &[String] {
        &self.generations
    }

    pub fn rows(&self) -> impl Iterator<Item = (&str, &[usize])> {
        self.generations
            .iter()
            .map(String::as_str)
            .zip(self.cells.iter().map(Vec::as_slice))
    }

    pub fn row(&self, generation: &str) -> Option<&[usize]> {
        self.generations
            .iter()
            .position(|g| g == generation)
            .map(|idx| self.cells[idx].as_slice())
    }

    pub fn cell(&self, generation: &str, offset: usize) -> Option<usize> {
        self.row(generation).and_then(|row| row.get(offset).copied())
    }

    /// Header of the rendered matrix: generation, new entrants, `P2..PN`.
    pub fn column_labels(&self) -> Vec<String> {
        let mut labels = Vec::with_capacity(self.width + 1);
        labels.push(GENERATION_LABEL.to_string());
        labels.extend((0..self.width).map(offset_label));
        labels
    }
}

pub fn offset_label(offset: usize) -> String {
    if offset == 0 {
        NEW_ENTRANTS_LABEL.to_string()
    } else {
        format!("P{}", offset + 1)
    }
}

/// Result of one pivot: the matrix and the records it had to leave out.
#[derive(Debug, Clone)]
pub struct PivotOutcome {
    pub matrix: TrajectoryMatrix,
    pub anomalies: AnomalyReport,
}

pub fn build(
    records: &[EnrollmentRecord],
    generations: &BTreeMap<StudentId, Period>,
    codec: &PeriodCodec,
    width: MatrixWidth,
) -> PivotOutcome {
    let mut anomalies = Vec::new();

    // generation -> (row label, offset/student observations); spellings of
    // one term share a row labelled with the smallest identifier
    let mut grouped: BTreeMap<&Period, (&str, Vec<(i64, &EnrollmentRecord)>)> = BTreeMap::new();
    for record in records {
        let Some(generation) = generations.get(&record.student_id) else {
            continue;
        };
        let period = match codec.decompose(&record.period_id) {
            Ok(period) => period,
            Err(err) => {
                // new-entry decoding failures belong to the resolver
                if record.record_kind == RecordKind::ReEnrolled {
                    anomalies.push(Anomaly::malformed(&record.student_id, err));
                }
                continue;
            }
        };
        let offset = codec.offset(&period, generation);
        let (label, observations) = grouped
            .entry(generation)
            .or_insert_with(|| (generation.raw(), Vec::new()));
        *label = (*label).min(generation.raw());
        observations.push((offset, record));
    }

    if grouped.is_empty() {
        return PivotOutcome {
            matrix: TrajectoryMatrix::empty(),
            anomalies: AnomalyReport::new(anomalies),
        };
    }

    let width = width.resolve(grouped.len());
    let mut labels = Vec::with_capacity(grouped.len());
    let mut cells = Vec::with_capacity(grouped.len());

    for (label, observations) in grouped.into_values() {
        let mut present: BTreeMap<usize, BTreeSet<&StudentId>> = BTreeMap::new();
        for (offset, record) in observations {
            match usize::try_from(offset).ok().filter(|k| *k < width) {
                Some(k) => {
                    present.entry(k).or_default().insert(&record.student_id);
                }
                None => anomalies.push(Anomaly::OutOfRangeOffset {
                    student_id: record.student_id.clone(),
                    period_id: record.period_id.clone(),
                    generation: label.to_string(),
                    offset,
                    width,
                }),
            }
        }
        labels.push(label.to_string());
        cells.push(
            (0..width)
                .map(|k| present.get(&k).map_or(0, BTreeSet::len))
                .collect(),
        );
    }

    let anomalies = AnomalyReport::new(anomalies);
    let out_of_range = anomalies.count_of("out_of_range_offset");
    if out_of_range > 0 {
        warn!(out_of_range, width, "records fell outside the trajectory window");
    }
    debug!(generations = labels.len(), width, "built trajectory matrix");

    PivotOutcome {
        matrix: TrajectoryMatrix {
            generations: labels,
            width,
            cells,
        },
        anomalies,
    }
}
