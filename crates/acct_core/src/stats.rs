//! Small numeric helpers shared by the report filters.
//!
//! Every helper is total: empty inputs and zero denominators produce a
//! defined value instead of a panic or NaN.

use std::collections::BTreeMap;

use crate::table::Cell;
use crate::UNKNOWN;

/// Maximum of the present values, or [`Cell::Missing`] when there are none.
pub fn max_or_missing<I: IntoIterator<Item = Option<f64>>>(values: I) -> Cell {
    values
        .into_iter()
        .flatten()
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
        .map_or(Cell::Missing, Cell::number)
}

/// Median with the even-count midpoint average. `None` when empty.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut v = values.to_vec();
    v.sort_by(f64::total_cmp);
    Some(median_sorted(&v))
}

fn median_sorted(v: &[f64]) -> f64 {
    let n = v.len();
    if n % 2 == 1 {
        v[n / 2]
    } else {
        (v[n / 2 - 1] + v[n / 2]) / 2.0
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Sample standard deviation (n − 1). `None` below two values.
pub fn sample_stdev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|x| (x - m).powi(2)).sum();
    Some((ss / (values.len() - 1) as f64).sqrt())
}

/// `n / d`, or 0 when `d` is zero.
pub fn ratio(n: f64, d: f64) -> f64 {
    if d == 0.0 {
        0.0
    } else {
        n / d
    }
}

/// `100 · n / d`, or 0 when `d` is zero.
pub fn percent(n: f64, d: f64) -> f64 {
    100.0 * ratio(n, d)
}

/// Most frequent value; ties go to the lexicographically smallest.
pub fn mode<'a, I: IntoIterator<Item = &'a str>>(values: I) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for v in values {
        *counts.entry(v).or_default() += 1;
    }
    // BTreeMap iterates in key order, so the first maximum wins ties.
    let mut best: Option<(&str, usize)> = None;
    for (k, c) in counts {
        if best.map_or(true, |(_, bc)| c > bc) {
            best = Some((k, c));
        }
    }
    best.map_or_else(|| UNKNOWN.to_string(), |(k, _)| k.to_string())
}

/// Distribution of job durations, in hours.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LongJobStats {
    pub min: f64,
    pub p25: f64,
    pub median: f64,
    pub p75: f64,
    pub p95: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
}

impl LongJobStats {
    /// Build from durations in seconds, sorted ascending.
    pub fn from_sorted(secs: &[f64]) -> Self {
        let n = secs.len();
        if n == 0 {
            return Self::default();
        }
        let h = |s: f64| s / 3600.0;
        let p95_idx = ((0.95 * n as f64) as usize).min(n - 1);
        Self {
            min: h(secs[0]),
            p25: h(secs[n / 4]),
            median: h(median_sorted(secs)),
            p75: h(secs[3 * n / 4]),
            p95: h(secs[p95_idx]),
            max: h(secs[n - 1]),
            mean: h(mean(secs).unwrap_or(0.0)),
            std: h(sample_stdev(secs).unwrap_or(0.0)),
        }
    }

    /// Sort then build.
    pub fn from_unsorted(mut secs: Vec<f64>) -> Self {
        secs.sort_by(f64::total_cmp);
        Self::from_sorted(&secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn max_or_missing_skips_absent_values() {
        assert_eq!(max_or_missing([None, Some(2.0), Some(7.0)]), Cell::Int(7));
        assert_eq!(max_or_missing([None, None]), Cell::Missing);
        assert_eq!(max_or_missing(Vec::<Option<f64>>::new()), Cell::Missing);
    }

    #[test]
    fn median_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn stdev_matches_sample_definition() {
        let s = sample_stdev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((s - 2.138_089_935_299_395).abs() < 1e-12);
        assert_eq!(sample_stdev(&[1.0]), None);
    }

    #[test]
    fn zero_denominators() {
        assert_eq!(ratio(5.0, 0.0), 0.0);
        assert_eq!(percent(5.0, 0.0), 0.0);
        assert_eq!(percent(1.0, 4.0), 25.0);
    }

    #[test]
    fn mode_breaks_ties_lexicographically() {
        assert_eq!(mode(["b", "a", "b", "a", "c"]), "a");
        assert_eq!(mode(["z", "y", "z"]), "z");
        assert_eq!(mode(Vec::<&str>::new()), UNKNOWN);
    }

    #[test]
    fn long_job_percentile_indices() {
        // 10 values: 1h..10h
        let secs: Vec<f64> = (1..=10).map(|h| h as f64 * 3600.0).collect();
        let s = LongJobStats::from_sorted(&secs);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.p25, 3.0); // v[2]
        assert_eq!(s.median, 5.5);
        assert_eq!(s.p75, 8.0); // v[7]
        assert_eq!(s.p95, 10.0); // v[9]
        assert_eq!(s.max, 10.0);
        assert_eq!(s.mean, 5.5);
        assert_eq!(LongJobStats::from_sorted(&[]), LongJobStats::default());
        assert_eq!(LongJobStats::from_sorted(&[3600.0]).std, 0.0);
    }

    proptest! {
        #[test]
        fn percentiles_are_monotone(mut v in proptest::collection::vec(0.0f64..1.0e7, 1..200)) {
            v.sort_by(f64::total_cmp);
            let s = LongJobStats::from_sorted(&v);
            prop_assert!(s.min <= s.p25);
            prop_assert!(s.p25 <= s.p75);
            prop_assert!(s.p75 <= s.p95);
            prop_assert!(s.p95 <= s.max);
            prop_assert!(s.min <= s.median && s.median <= s.max);
            prop_assert!(s.std >= 0.0);
        }

        #[test]
        fn ratio_is_always_finite(n in -1.0e9f64..1.0e9, d in -1.0e9f64..1.0e9) {
            prop_assume!(d.abs() >= 1.0e-3);
            prop_assert!(ratio(n, d).is_finite());
            prop_assert!(percent(n, 0.0) == 0.0);
        }

        #[test]
        fn mode_is_a_member(v in proptest::collection::vec("[a-d]", 1..50)) {
            let m = mode(v.iter().map(String::as_str));
            prop_assert!(v.contains(&m));
        }
    }
}
