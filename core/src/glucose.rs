use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CalcError;

pub const DEFAULT_TARGET_LOW: f64 = 80.0;
pub const DEFAULT_TARGET_HIGH: f64 = 180.0;

/// Glucose band (mg/dL) considered in range. Both bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetRange {
    low: f64,
    high: f64,
}

impl TargetRange {
    pub fn new(low: f64, high: f64) -> Result<Self, CalcError> {
        if !low.is_finite() || !high.is_finite() || low <= 0.0 || low >= high {
            return Err(CalcError::InvalidTargetRange { low, high });
        }
        Ok(Self { low, high })
    }

    #[must_use]
    pub fn low(&self) -> f64 {
        self.low
    }

    #[must_use]
    pub fn high(&self) -> f64 {
        self.high
    }

    #[must_use]
    pub fn classify(&self, value_mg_dl: f64) -> RangeBand {
        if value_mg_dl < self.low {
            RangeBand::Below
        } else if value_mg_dl > self.high {
            RangeBand::Above
        } else {
            RangeBand::InRange
        }
    }
}

impl Default for TargetRange {
    fn default() -> Self {
        Self {
            low: DEFAULT_TARGET_LOW,
            high: DEFAULT_TARGET_HIGH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeBand {
    Below,
    InRange,
    Above,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlucoseSample {
    pub value_mg_dl: f64,
    pub at: DateTime<Utc>,
}

/// Inclusive time window `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    #[must_use]
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlucoseSummary {
    pub count: usize,
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub in_range_pct: f64,
    pub below_range_pct: f64,
    pub above_range_pct: f64,
    pub target_low: f64,
    pub target_high: f64,
}

impl GlucoseSummary {
    fn empty(range: TargetRange) -> Self {
        Self {
            count: 0,
            average: 0.0,
            min: 0.0,
            max: 0.0,
            in_range_pct: 0.0,
            below_range_pct: 0.0,
            above_range_pct: 0.0,
            target_low: range.low,
            target_high: range.high,
        }
    }
}

/// Descriptive statistics for the samples that fall inside `window`.
///
/// Samples outside the window are ignored. With no matching samples every
/// figure is zero. A window whose start is after its end matches nothing.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn summarize(samples: &[GlucoseSample], window: TimeWindow, range: TargetRange) -> GlucoseSummary {
    let values: Vec<f64> = samples
        .iter()
        .filter(|s| window.contains(s.at))
        .map(|s| s.value_mg_dl)
        .collect();

    if values.is_empty() {
        return GlucoseSummary::empty(range);
    }

    let (mut below, mut in_range, mut above) = (0usize, 0usize, 0usize);
    for &v in &values {
        match range.classify(v) {
            RangeBand::Below => below += 1,
            RangeBand::InRange => in_range += 1,
            RangeBand::Above => above += 1,
        }
    }

    let count = values.len();
    let total = count as f64;
    let pct = |n: usize| n as f64 / total * 100.0;

    GlucoseSummary {
        count,
        average: values.iter().sum::<f64>() / total,
        min: values.iter().copied().fold(f64::INFINITY, f64::min),
        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        in_range_pct: pct(in_range),
        below_range_pct: pct(below),
        above_range_pct: pct(above),
        target_low: range.low,
        target_high: range.high,
    }
}
