use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::MalformedPeriodError;
use crate::models::StudentId;

/// A data-quality problem found while building a report. None of these
/// abort the batch; the affected record or student is left out.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    MalformedPeriod {
        student_id: StudentId,
        period_id: String,
        reason: String,
    },
    UnresolvedGeneration {
        student_id: StudentId,
        records: usize,
    },
    DuplicateEntry {
        student_id: StudentId,
        kept: String,
        discarded: String,
    },
    OutOfRangeOffset {
        student_id: StudentId,
        period_id: String,
        generation: String,
        offset: i64,
        width: usize,
    },
}

impl Anomaly {
    pub fn malformed(student_id: &StudentId, error: MalformedPeriodError) -> Self {
        Anomaly::MalformedPeriod {
            student_id: student_id.clone(),
            period_id: error.value,
            reason: error.reason,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Anomaly::MalformedPeriod { .. } => "malformed_period",
            Anomaly::UnresolvedGeneration { .. } => "unresolved_generation",
            Anomaly::DuplicateEntry { .. } => "duplicate_entry",
            Anomaly::OutOfRangeOffset { .. } => "out_of_range_offset",
        }
    }
}

/// Anomalies of one engine run, kept in a stable order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnomalyReport {
    anomalies: Vec<Anomaly>,
}

impl AnomalyReport {
    pub fn new(mut anomalies: Vec<Anomaly>) -> Self {
        anomalies.sort();
        Self { anomalies }
    }

    pub fn merge(mut self, other: AnomalyReport) -> Self {
        self.anomalies.extend(other.anomalies);
        self.anomalies.sort();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.anomalies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.anomalies.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Anomaly> {
        self.anomalies.iter()
    }

    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for anomaly in &self.anomalies {
            *counts.entry(anomaly.label()).or_insert(0) += 1;
        }
        counts
    }

    pub fn count_of(&self, label: &str) -> usize {
        self.anomalies.iter().filter(|a| a.label() == label).count()
    }
}
