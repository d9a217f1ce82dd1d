//! Metric engine: derives secondary quantities from a ring-buffer snapshot
//! plus the current reading (spec §4.C). Stateless; every output is
//! null-safe — an absent input leaves its derived outputs null rather than
//! substituting zero (spec §9 null-vs-zero).

use chrono::Duration;

use crate::statistics::sample_std;
use crate::types::{DerivedMetrics, Reading};

const D_TEMP_LOOKBACK_MINUTES: i64 = 5;
const STABILITY_WINDOW_MINUTES: i64 = 10;
const MIN_SAMPLES_FOR_STABILITY: usize = 3;
const MIN_ELAPSED_SECONDS_FOR_SLOPE: i64 = 60;

pub struct MetricEngine;

impl MetricEngine {
    /// `window` is the ring buffer's snapshot (ascending by timestamp,
    /// includes `current`). `current` is the most recent reading.
    pub fn derive(window: &[Reading], current: &Reading) -> DerivedMetrics {
        DerivedMetrics {
            temp_avg: temp_avg_of(current),
            temp_spread: temp_spread_of(current),
            d_temp_avg: d_temp_avg(window, current),
            rpm_stability: Self::current_std(window, current, |r| r.screw_rpm),
            pressure_stability: Self::current_std(window, current, |r| r.pressure),
        }
    }

    /// Sample standard deviation of a metric over the last 10 minutes,
    /// used by the evaluator's stability indicator (spec §4.C, §4.G) as
    /// well as internally for `rpm_stability`/`pressure_stability`.
    pub fn current_std(
        window: &[Reading],
        current: &Reading,
        extract: impl Fn(&Reading) -> Option<f64>,
    ) -> Option<f64> {
        let cutoff = current.timestamp - Duration::minutes(STABILITY_WINDOW_MINUTES);
        let values: Vec<f64> = window
            .iter()
            .filter(|r| r.timestamp > cutoff && r.timestamp <= current.timestamp)
            .filter_map(extract)
            .collect();
        if values.len() < MIN_SAMPLES_FOR_STABILITY {
            return None;
        }
        sample_std(&values)
    }
}

/// Mean of the reading's non-null temperature zones; null if fewer than
/// one zone is present (spec §3).
pub fn temp_avg_of(reading: &Reading) -> Option<f64> {
    let present: Vec<f64> = reading.temp_zones().into_iter().flatten().collect();
    if present.is_empty() {
        None
    } else {
        Some(present.iter().sum::<f64>() / present.len() as f64)
    }
}

/// Max minus min of the reading's non-null temperature zones; null if
/// fewer than two zones are present (spec §3).
pub fn temp_spread_of(reading: &Reading) -> Option<f64> {
    let present: Vec<f64> = reading.temp_zones().into_iter().flatten().collect();
    if present.len() < 2 {
        return None;
    }
    let max = present.iter().cloned().fold(f64::MIN, f64::max);
    let min = present.iter().cloned().fold(f64::MAX, f64::min);
    Some(max - min)
}

/// Slope of `temp_avg` in C per minute over the last 5 minutes: the
/// difference between the current `temp_avg` and the `temp_avg` of the
/// window sample closest to "now - 5 minutes", divided by elapsed minutes.
/// Null if fewer than two samples span at least 60 seconds (spec §4.C).
fn d_temp_avg(window: &[Reading], current: &Reading) -> Option<f64> {
    let current_avg = temp_avg_of(current)?;
    let target = current.timestamp - Duration::minutes(D_TEMP_LOOKBACK_MINUTES);

    let reference = window
        .iter()
        .filter(|r| r.timestamp < current.timestamp)
        .filter(|r| temp_avg_of(r).is_some())
        .min_by_key(|r| (r.timestamp - target).num_milliseconds().abs())?;

    let elapsed = current.timestamp - reference.timestamp;
    if elapsed.num_seconds() < MIN_ELAPSED_SECONDS_FOR_SLOPE {
        return None;
    }
    let reference_avg = temp_avg_of(reference)?;
    let elapsed_minutes = elapsed.num_milliseconds() as f64 / 60_000.0;
    Some((current_avg - reference_avg) / elapsed_minutes)
}
