use chrono::{DateTime, Utc};

/// Seconds from `start` to `end`, millisecond precision
pub fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 1000.0
}

pub fn median(values: &[f64]) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Median spacing of consecutive timestamps, `None` with fewer than two
pub fn median_cadence(timestamps: &[DateTime<Utc>]) -> Option<f64> {
    let gaps: Vec<f64> = timestamps.windows(2).map(|pair| seconds_between(pair[0], pair[1])).collect();
    median(&gaps)
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1 denominator); undefined below two values
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mean = mean(values)?;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(variance.sqrt())
}

/// Standard error of the mean
pub fn sem(std: Option<f64>, n: usize) -> Option<f64> {
    std.map(|std| std / (n.max(1) as f64).sqrt())
}

/// Mean, spread and count of one measured quantity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Moments {
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub sem: Option<f64>,
    pub n: usize,
}

impl Moments {
    pub fn of(values: &[f64]) -> Self {
        let std = sample_std(values);
        Self { mean: mean(values), std, sem: sem(std, values.len()), n: values.len() }
    }
}

/// Round to `sig` significant figures. Zero and non-finite values pass through.
pub fn round_sigfigs(value: f64, sig: i32) -> f64 {
    if value == 0.0 || !value.is_finite() {
        return value;
    }
    let digits = sig - value.abs().log10().floor() as i32 - 1;
    if digits >= 0 {
        let factor = 10f64.powi(digits);
        (value * factor).round() / factor
    } else {
        let factor = 10f64.powi(-digits);
        (value / factor).round() * factor
    }
}

pub fn round3(value: Option<f64>) -> Option<f64> {
    value.filter(|v| !v.is_nan()).map(|v| round_sigfigs(v, 3))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_round_sigfigs() {
        assert_eq!(round_sigfigs(12.345, 3), 12.3);
        assert_eq!(round_sigfigs(0.0012345, 3), 0.00123);
        assert_eq!(round_sigfigs(12345.0, 3), 12300.0);
        assert_eq!(round_sigfigs(-98.76, 3), -98.8);
        assert_eq!(round_sigfigs(0.0, 3), 0.0);
        assert_eq!(round3(Some(f64::NAN)), None);
    }

    #[test]
    fn test_median_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn test_median_cadence() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let timestamps: Vec<_> =
            [0, 10, 20, 100].iter().map(|s| base + chrono::Duration::seconds(*s)).collect();
        assert_eq!(median_cadence(&timestamps), Some(10.0));
        assert_eq!(median_cadence(&timestamps[..1]), None);
    }

    #[test]
    fn test_moments() {
        let moments = Moments::of(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(moments.mean, Some(5.0));
        assert!((moments.std.unwrap() - 2.138).abs() < 1e-3);
        assert!((moments.sem.unwrap() - 2.138 / 8f64.sqrt()).abs() < 1e-3);

        let single = Moments::of(&[3.0]);
        assert_eq!(single.std, None);
        assert_eq!(single.sem, None);
        assert_eq!(single.n, 1);
    }
}
