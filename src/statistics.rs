//! Shared numeric primitives used by the metric engine, baseline learner,
//! and evaluator: mean, sample standard deviation, and empirical
//! percentiles via linear interpolation between ranks.
//!
//! Kept as free functions over `&[f64]` rather than behind a distribution
//! crate, since every caller here needs the null-safety and minimum-
//! sample-count gating spelled out in spec §4.C and §4.F before the
//! underlying formula even applies.

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation with divisor `n - 1` (spec §4.F: "population-
/// unbiased sample std"). Requires at least 2 values.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let sum_sq = values.iter().map(|v| (v - m).powi(2)).sum::<f64>();
    Some((sum_sq / (values.len() as f64 - 1.0)).sqrt())
}

/// Empirical percentile via linear interpolation between ranks (spec §4.F:
/// "empirical 5th and 95th percentiles (linear interpolation between
/// ranks)"). `pct` is in `[0, 100]`. Requires at least 1 value.
pub fn percentile(values: &[f64], pct: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    if sorted.len() == 1 {
        return Some(sorted[0]);
    }
    let rank = (pct / 100.0) * (sorted.len() as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return Some(sorted[lower]);
    }
    let frac = rank - lower as f64;
    Some(sorted[lower] + frac * (sorted[upper] - sorted[lower]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_of_empty_is_none() {
        assert_eq!(mean(&[]), None);
    }

    #[test]
    fn mean_of_values() {
        assert_eq!(mean(&[1.0, 2.0, 3.0]), Some(2.0));
    }

    #[test]
    fn sample_std_requires_two_values() {
        assert_eq!(sample_std(&[1.0]), None);
    }

    #[test]
    fn sample_std_known_value() {
        let std = sample_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((std - 2.138_089).abs() < 1e-3);
    }

    #[test]
    fn percentile_linear_interpolation() {
        let values: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        let p05 = percentile(&values, 5.0).unwrap();
        let p95 = percentile(&values, 95.0).unwrap();
        assert!((p05 - 5.95).abs() < 1e-6);
        assert!((p95 - 95.05).abs() < 1e-6);
    }

    #[test]
    fn percentile_single_value() {
        assert_eq!(percentile(&[42.0], 5.0), Some(42.0));
    }
}
