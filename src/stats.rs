//! Trend and range statistics over a sample series.
//!
//! All functions take values ordered oldest first and hold no state.

use serde::Serialize;

pub const TREND_POINTS: usize = 3;
pub const EXTREMA_WINDOW: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Rising,
    Falling,
    Stable,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Rising => "rising",
            Trend::Falling => "falling",
            Trend::Stable => "stable",
        }
    }

    pub fn arrow(&self) -> &'static str {
        match self {
            Trend::Rising => "↑",
            Trend::Falling => "↓",
            Trend::Stable => "→",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Extrema {
    pub max: f64,
    pub min: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesStats {
    pub latest: Option<f64>,
    pub trend: Trend,
    pub extrema: Option<Extrema>,
    /// Percent change across the extrema window.
    pub change_pct: Option<f64>,
    pub samples: usize,
}

fn tail(values: &[f64], n: usize) -> &[f64] {
    &values[values.len().saturating_sub(n)..]
}

/// Strict direction over the last three points; anything else is `Stable`.
pub fn trend(values: &[f64]) -> Trend {
    if values.len() < TREND_POINTS {
        return Trend::Stable;
    }
    let last = tail(values, TREND_POINTS);
    if last.windows(2).all(|w| w[1] > w[0]) {
        Trend::Rising
    } else if last.windows(2).all(|w| w[1] < w[0]) {
        Trend::Falling
    } else {
        Trend::Stable
    }
}

pub fn rolling_extrema(values: &[f64], window: usize) -> Option<Extrema> {
    let last = tail(values, window.max(1));
    if last.is_empty() {
        return None;
    }
    let (min, max) = last
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    Some(Extrema { max, min })
}

pub fn change_pct(values: &[f64], window: usize) -> Option<f64> {
    let last = tail(values, window.max(1));
    if last.len() < 2 {
        return None;
    }
    let first = last[0];
    let newest = last[last.len() - 1];
    if first == 0.0 {
        return None;
    }
    Some((newest - first) / first * 100.0)
}

pub fn summarize(values: &[f64]) -> SeriesStats {
    SeriesStats {
        latest: values.last().copied(),
        trend: trend(values),
        extrema: rolling_extrema(values, EXTREMA_WINDOW),
        change_pct: change_pct(values, EXTREMA_WINDOW),
        samples: values.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trend_rising_falling() {
        assert_eq!(trend(&[100.0, 101.0, 102.0]), Trend::Rising);
        assert_eq!(trend(&[102.0, 101.0, 100.0]), Trend::Falling);
    }

    #[test]
    fn test_trend_requires_strictness() {
        assert_eq!(trend(&[100.0, 100.0, 101.0]), Trend::Stable);
        assert_eq!(trend(&[100.0, 102.0, 101.0]), Trend::Stable);
    }

    #[test]
    fn test_trend_uses_last_three_only() {
        // Earlier points fall, last three rise.
        assert_eq!(trend(&[200.0, 150.0, 90.0, 95.0, 99.0]), Trend::Rising);
    }

    #[test]
    fn test_trend_short_series_is_stable() {
        assert_eq!(trend(&[]), Trend::Stable);
        assert_eq!(trend(&[1.0, 2.0]), Trend::Stable);
    }

    #[test]
    fn test_extrema_last_twenty() {
        // 5 outliers first, then 20 values spanning 90..=110.
        let mut values = vec![500.0, 1.0, 600.0, 2.0, 700.0];
        values.push(90.0);
        values.push(110.0);
        values.extend((0..18).map(|i| 95.0 + i as f64 * 0.5));
        assert_eq!(values.len(), 25);
        let ext = rolling_extrema(&values, EXTREMA_WINDOW).unwrap();
        assert_eq!(ext.max, 110.0);
        assert_eq!(ext.min, 90.0);
    }

    #[test]
    fn test_extrema_fewer_than_window() {
        let ext = rolling_extrema(&[3.0, 1.0, 2.0], EXTREMA_WINDOW).unwrap();
        assert_eq!(ext, Extrema { max: 3.0, min: 1.0 });
        assert!(rolling_extrema(&[], EXTREMA_WINDOW).is_none());
    }

    #[test]
    fn test_change_pct() {
        assert_eq!(change_pct(&[100.0, 110.0], EXTREMA_WINDOW), Some(10.0));
        assert_eq!(change_pct(&[0.0, 110.0], EXTREMA_WINDOW), None);
        assert_eq!(change_pct(&[5.0], EXTREMA_WINDOW), None);
    }

    #[test]
    fn test_summarize() {
        let s = summarize(&[100.0, 101.0, 102.0]);
        assert_eq!(s.latest, Some(102.0));
        assert_eq!(s.trend, Trend::Rising);
        assert_eq!(s.samples, 3);
    }
}
