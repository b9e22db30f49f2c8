use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Serialize;

use crate::error::{EngineError, MalformedPeriodError};

/// Terms per academic year assumed by the source data. Terms are encoded as
/// `01`, `02`, ... so ten slots per year keeps offsets from overlapping.
pub const DEFAULT_PERIODS_PER_YEAR: u32 = 10;

const YEAR_DIGITS: usize = 4;

/// A decoded `YYYYT` period identifier.
///
/// Equality and ordering look at `(year, term)` only, so `20211` and
/// `202101` are the same period spelled two ways.
#[derive(Debug, Clone, Serialize)]
pub struct Period {
    raw: String,
    year: i32,
    term: u32,
}

impl Period {
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn term(&self) -> u32 {
        self.term
    }
}

impl PartialEq for Period {
    fn eq(&self, other: &Self) -> bool {
        (self.year, self.term) == (other.year, other.term)
    }
}

impl Eq for Period {}

impl Hash for Period {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.year, self.term).hash(state);
    }
}

impl Ord for Period {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.year, self.term).cmp(&(other.year, other.term))
    }
}

impl PartialOrd for Period {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Splits period identifiers and measures distances between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodCodec {
    periods_per_year: u32,
}

impl Default for PeriodCodec {
    fn default() -> Self {
        Self {
            periods_per_year: DEFAULT_PERIODS_PER_YEAR,
        }
    }
}

impl PeriodCodec {
    pub fn new(periods_per_year: u32) -> Result<Self, EngineError> {
        if periods_per_year == 0 {
            return Err(EngineError::ZeroPeriodsPerYear);
        }
        Ok(Self { periods_per_year })
    }

    pub fn decompose(&self, period_id: &str) -> Result<Period, MalformedPeriodError> {
        let raw = period_id.trim();
        if raw.len() <= YEAR_DIGITS {
            return Err(MalformedPeriodError::new(
                period_id,
                "expected a 4-digit year followed by at least one term digit",
            ));
        }
        if !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MalformedPeriodError::new(period_id, "non-numeric characters"));
        }

        let (year, term) = raw.split_at(YEAR_DIGITS);
        let year: i32 = year
            .parse()
            .map_err(|_| MalformedPeriodError::new(period_id, "year out of range"))?;
        let term: u32 = term
            .parse()
            .map_err(|_| MalformedPeriodError::new(period_id, "term out of range"))?;

        if term >= self.periods_per_year {
            return Err(MalformedPeriodError::new(
                period_id,
                format!("term {term} does not fit {} periods per year", self.periods_per_year),
            ));
        }

        Ok(Period {
            raw: raw.to_string(),
            year,
            term,
        })
    }

    /// Signed distance from `from` to `to`, in periods.
    pub fn offset(&self, to: &Period, from: &Period) -> i64 {
        let years = i64::from(to.year) - i64::from(from.year);
        let terms = i64::from(to.term) - i64::from(from.term);
        years * i64::from(self.periods_per_year) + terms
    }

    pub fn offset_between(&self, to: &str, from: &str) -> Result<i64, MalformedPeriodError> {
        let to = self.decompose(to)?;
        let from = self.decompose(from)?;
        Ok(self.offset(&to, &from))
    }
}
