//! Order statistics over latency values

/// Keep only usable timing values (finite, non-negative), sorted ascending
pub fn clean_sorted(values: impl IntoIterator<Item = f64>) -> Vec<f64> {
    let mut cleaned: Vec<f64> = values
        .into_iter()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .collect();
    cleaned.sort_by(f64::total_cmp);
    cleaned
}

/// Linear-interpolation percentile over an already sorted slice
///
/// `p` is a fraction in `[0, 1]`. Returns `None` for empty input.
pub fn percentile_sorted(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }

    let position = (sorted.len() - 1) as f64 * p.clamp(0.0, 1.0);
    let lo = position.floor() as usize;
    let hi = position.ceil() as usize;

    if lo == hi {
        Some(sorted[lo])
    } else {
        Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (position - lo as f64))
    }
}

/// Percentile over arbitrary values (unusable values are dropped first)
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    percentile_sorted(&clean_sorted(values.iter().copied()), p)
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation
pub fn stdev(values: &[f64]) -> Option<f64> {
    let avg = mean(values)?;
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

/// `(total - ok) / total * 100`, or `None` without any attempts
pub fn loss_pct(total: u64, ok: u64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    Some(total.saturating_sub(ok) as f64 / total as f64 * 100.0)
}
