/// Computes the arithmetic mean of a slice of values. Returns `None` for empty input.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Percentile `p` (0–100) with linear interpolation between closest ranks.
///
/// The rank is `p / 100 * (n - 1)` over the sorted values, matching the
/// default method of common statistics libraries. Returns `None` for empty
/// input or a `p` outside 0–100.
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() || !(0.0..=100.0).contains(&p) {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    Some(percentile_sorted(&sorted, p))
}

/// Like [`percentile`] but for input already sorted ascending.
///
/// `sorted` must be non-empty; callers check before calling.
pub(crate) fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Rounds half to even, as spreadsheet-derived AADT splits expect.
pub fn round_half_even(value: f64) -> f64 {
    value.round_ties_even()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[]), None);
        assert_eq!(mean(&[1.0, 2.0, 3.0, 6.0]), Some(3.0));
    }

    #[test]
    fn test_percentile_three_records() {
        let tt = [100.0, 100.0, 200.0];
        assert_eq!(percentile(&tt, 50.0), Some(100.0));
        // rank 1.6 -> 100 + 0.6 * (200 - 100)
        let p80 = percentile(&tt, 80.0).unwrap();
        assert!((p80 - 160.0).abs() < 1e-9);
        let p95 = percentile(&tt, 95.0).unwrap();
        assert!((p95 - 190.0).abs() < 1e-9);
    }

    #[test]
    fn test_percentile_unsorted_input() {
        let tt = [40.0, 10.0, 30.0, 20.0];
        assert_eq!(percentile(&tt, 0.0), Some(10.0));
        assert_eq!(percentile(&tt, 100.0), Some(40.0));
        assert_eq!(percentile(&tt, 50.0), Some(25.0));
    }

    #[test]
    fn test_percentile_edge_cases() {
        assert_eq!(percentile(&[], 50.0), None);
        assert_eq!(percentile(&[7.0], 95.0), Some(7.0));
        assert_eq!(percentile(&[1.0, 2.0], 101.0), None);
    }

    #[test]
    fn test_percentile_sorted_single_value() {
        assert_eq!(percentile_sorted(&[42.0], 5.0), 42.0);
        assert_eq!(percentile_sorted(&[42.0], 95.0), 42.0);
    }

    #[test]
    fn test_round_half_even() {
        assert_eq!(round_half_even(2.5), 2.0);
        assert_eq!(round_half_even(3.5), 4.0);
        assert_eq!(round_half_even(10250.4), 10250.0);
    }
}
