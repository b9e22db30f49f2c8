use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::anomaly::{Anomaly, AnomalyReport};
use crate::models::{EnrollmentRecord, RecordKind, StudentId};
use crate::period::{Period, PeriodCodec};

/// Entry cohort of every student that has at least one usable NEW_ENTRY
/// record, plus the anomalies found while resolving them.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub generations: BTreeMap<StudentId, Period>,
    pub anomalies: AnomalyReport,
}

impl Resolution {
    pub fn generation_of(&self, student_id: &StudentId) -> Option<&Period> {
        self.generations.get(student_id)
    }
}

/// Tie-break for students with several NEW_ENTRY periods: the earliest
/// period wins. Returns the winner and the discarded candidates. Spellings
/// of one term collapse into the smallest identifier.
pub fn pick_generation(mut candidates: Vec<Period>) -> Option<(Period, Vec<Period>)> {
    candidates.sort_by(|a, b| a.cmp(b).then_with(|| a.raw().cmp(b.raw())));
    candidates.dedup();
    if candidates.is_empty() {
        return None;
    }
    let kept = candidates.remove(0);
    Some((kept, candidates))
}

pub fn resolve(records: &[EnrollmentRecord], codec: &PeriodCodec) -> Resolution {
    let mut by_student: BTreeMap<&StudentId, Vec<&EnrollmentRecord>> = BTreeMap::new();
    for record in records {
        by_student.entry(&record.student_id).or_default().push(record);
    }

    let mut generations = BTreeMap::new();
    let mut anomalies = Vec::new();

    for (student_id, group) in by_student {
        let mut candidates = Vec::new();
        for record in group.iter().filter(|r| r.record_kind == RecordKind::NewEntry) {
            match codec.decompose(&record.period_id) {
                Ok(period) => candidates.push(period),
                Err(err) => anomalies.push(Anomaly::malformed(student_id, err)),
            }
        }

        match pick_generation(candidates) {
            Some((kept, discarded)) => {
                for other in discarded {
                    warn!(
                        student_id = %student_id,
                        kept = %kept,
                        discarded = %other,
                        "student has more than one new-entry period"
                    );
                    anomalies.push(Anomaly::DuplicateEntry {
                        student_id: student_id.clone(),
                        kept: kept.raw().to_string(),
                        discarded: other.raw().to_string(),
                    });
                }
                generations.insert(student_id.clone(), kept);
            }
            None => {
                anomalies.push(Anomaly::UnresolvedGeneration {
                    student_id: student_id.clone(),
                    records: group.len(),
                });
            }
        }
    }

    debug!(
        students = generations.len(),
        anomalies = anomalies.len(),
        "resolved generations"
    );

    Resolution {
        generations,
        anomalies: AnomalyReport::new(anomalies),
    }
}
