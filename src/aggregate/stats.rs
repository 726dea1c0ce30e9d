//! Small numeric helpers for the aggregation pass

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Population standard deviation
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

/// Median; the mean of the two middle values for an even count
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Weighted mean of `(value, weight)` pairs
///
/// Falls back to the plain mean when the weights sum to zero or less.
pub fn weighted_mean(pairs: &[(f64, f64)]) -> Option<f64> {
    if pairs.is_empty() {
        return None;
    }
    let total: f64 = pairs.iter().map(|(_, w)| w).sum();
    if total > 0.0 && total.is_finite() {
        Some(pairs.iter().map(|(v, w)| v * w).sum::<f64>() / total)
    } else {
        let values: Vec<f64> = pairs.iter().map(|(v, _)| *v).collect();
        mean(&values)
    }
}

/// Indices of values that lie more than `k` spreads from the others
///
/// Each value is tested against the mean and deviation of the remaining
/// values, with the deviation floored at `min_spread`. Fewer than three
/// values are never tested, and a test that would reject everything
/// rejects nothing.
pub fn outliers(values: &[f64], k: f64, min_spread: f64) -> Vec<usize> {
    if values.len() < 3 || k.is_nan() || k <= 0.0 {
        return Vec::new();
    }

    let mut rejected = Vec::new();
    let mut others = Vec::with_capacity(values.len() - 1);
    for (i, &v) in values.iter().enumerate() {
        others.clear();
        others.extend(values.iter().enumerate().filter(|(j, _)| *j != i).map(|(_, x)| *x));
        let (Some(m), Some(s)) = (mean(&others), std_dev(&others)) else {
            continue;
        };
        if (v - m).abs() > k * s.max(min_spread) {
            rejected.push(i);
        }
    }

    if rejected.len() == values.len() {
        Vec::new()
    } else {
        rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn std_of_single_value_is_zero() {
        assert_eq!(std_dev(&[42.0]), Some(0.0));
        assert_eq!(std_dev(&[2.0, 4.0]), Some(1.0));
    }

    #[test]
    fn zero_weights_fall_back_to_plain_mean() {
        assert_eq!(weighted_mean(&[(10.0, 0.0), (20.0, 0.0)]), Some(15.0));
        assert_eq!(weighted_mean(&[(10.0, 3.0), (20.0, 1.0)]), Some(12.5));
    }

    #[test]
    fn far_value_is_rejected() {
        let values = [100.0, 102.0, 101.0, 500.0];
        assert_eq!(outliers(&values, 2.0, 1.0), vec![3]);
        assert_eq!(outliers(&values, 2.0, 5.0), vec![3]);
    }

    #[test]
    fn two_values_are_never_tested() {
        assert!(outliers(&[100.0, 900.0], 1.0, 1.0).is_empty());
    }

    #[test]
    fn tight_cluster_keeps_everything() {
        assert!(outliers(&[100.0, 101.0, 102.0, 103.0], 3.0, 5.0).is_empty());
    }
}
