//! Trend analysis over a window of performance snapshots.
//!
//! Slopes are least-squares fits against the sample index, so a window of
//! evenly spaced ticks reads as "change per tick".

use serde::Serialize;

use canopy_state::PerformanceSnapshot;

const IMPROVING_SCORE_SLOPE: f64 = 0.05;
const IMPROVING_SUCCESS_SLOPE: f64 = 0.02;
const STRONG_SCORE_SLOPE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Declining,
    Stable,
    InsufficientData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendRecommendation {
    ScaleUp,
    ScaleDown,
    Maintain,
    NoChange,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendAnalysis {
    pub direction: TrendDirection,
    pub performance_slope: f64,
    pub success_slope: f64,
    pub response_time_slope: f64,
    pub confidence: f64,
    pub recommendation: TrendRecommendation,
    /// Snapshots inside the window.
    pub samples: usize,
}

impl TrendAnalysis {
    pub fn insufficient(samples: usize) -> Self {
        Self {
            direction: TrendDirection::InsufficientData,
            performance_slope: 0.0,
            success_slope: 0.0,
            response_time_slope: 0.0,
            confidence: 0.0,
            recommendation: TrendRecommendation::NoChange,
            samples,
        }
    }
}

/// Analyze the snapshots whose timestamp falls within `window_secs` of `now`.
pub fn analyze<'a, I>(history: I, window_secs: u64, now: u64) -> TrendAnalysis
where
    I: IntoIterator<Item = &'a PerformanceSnapshot>,
{
    let cutoff = now.saturating_sub(window_secs);
    let recent: Vec<&PerformanceSnapshot> = history
        .into_iter()
        .filter(|s| s.timestamp >= cutoff)
        .collect();

    if recent.len() < 2 {
        return TrendAnalysis::insufficient(recent.len());
    }

    let scores: Vec<f64> = recent.iter().map(|s| s.performance_score).collect();
    let success: Vec<f64> = recent.iter().map(|s| s.success_rate).collect();
    let latency: Vec<f64> = recent.iter().map(|s| s.avg_latency_seconds).collect();

    let performance_slope = linear_slope(&scores);
    let success_slope = linear_slope(&success);
    let response_time_slope = linear_slope(&latency);

    let (direction, recommendation) =
        if performance_slope > IMPROVING_SCORE_SLOPE && success_slope > IMPROVING_SUCCESS_SLOPE {
            let rec = if performance_slope > STRONG_SCORE_SLOPE {
                TrendRecommendation::ScaleUp
            } else {
                TrendRecommendation::Maintain
            };
            (TrendDirection::Improving, rec)
        } else if performance_slope < -IMPROVING_SCORE_SLOPE || success_slope < -IMPROVING_SUCCESS_SLOPE {
            let rec = if performance_slope < -STRONG_SCORE_SLOPE {
                TrendRecommendation::ScaleDown
            } else {
                TrendRecommendation::Maintain
            };
            (TrendDirection::Declining, rec)
        } else {
            (TrendDirection::Stable, TrendRecommendation::Maintain)
        };

    TrendAnalysis {
        direction,
        performance_slope,
        success_slope,
        response_time_slope,
        confidence: (1.0 - sample_variance(&scores)).clamp(0.0, 1.0),
        recommendation,
        samples: recent.len(),
    }
}

/// Least-squares slope of `values` against their index. Zero for fewer
/// than two points.
pub fn linear_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let n_f = n as f64;
    let x_mean = (n_f - 1.0) / 2.0;
    let y_mean = values.iter().sum::<f64>() / n_f;

    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    if den == 0.0 { 0.0 } else { num / den }
}

/// Sample variance (n - 1 denominator). Zero for fewer than two points.
pub fn sample_variance(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_snapshot(timestamp: u64, score: f64, success: f64, latency: f64) -> PerformanceSnapshot {
        let mut s = PerformanceSnapshot::fallback(timestamp);
        s.performance_score = score;
        s.success_rate = success;
        s.avg_latency_seconds = latency;
        s
    }

    #[test]
    fn slope_of_a_line() {
        assert!((linear_slope(&[1.0, 3.0, 5.0, 7.0]) - 2.0).abs() < 1e-12);
        assert_eq!(linear_slope(&[4.0, 4.0, 4.0]), 0.0);
        assert_eq!(linear_slope(&[4.0]), 0.0);
    }

    #[test]
    fn variance_uses_n_minus_one() {
        // mean 2, squared deviations 1 + 0 + 1, / 2
        assert!((sample_variance(&[1.0, 2.0, 3.0]) - 1.0).abs() < 1e-12);
        assert_eq!(sample_variance(&[0.5]), 0.0);
    }

    #[test]
    fn fewer_than_two_windowed_samples_is_insufficient() {
        let history = vec![
            test_snapshot(100, 0.1, 0.5, 1.0),
            test_snapshot(1000, 0.9, 0.9, 1.0),
        ];
        let trend = analyze(&history, 60, 1000);
        assert_eq!(trend.direction, TrendDirection::InsufficientData);
        assert_eq!(trend.recommendation, TrendRecommendation::NoChange);
        assert_eq!(trend.confidence, 0.0);
        assert_eq!(trend.samples, 1);
    }

    #[test]
    fn strong_improvement_recommends_scale_up() {
        let history: Vec<_> = (0..4)
            .map(|i| test_snapshot(1000 + i, 0.4 + 0.15 * i as f64, 0.80 + 0.03 * i as f64, 2.0))
            .collect();
        let trend = analyze(&history, 900, 1003);
        assert_eq!(trend.direction, TrendDirection::Improving);
        assert_eq!(trend.recommendation, TrendRecommendation::ScaleUp);
        assert!(trend.confidence > 0.9);
    }

    #[test]
    fn mild_improvement_maintains() {
        let history: Vec<_> = (0..4)
            .map(|i| test_snapshot(1000 + i, 0.5 + 0.07 * i as f64, 0.80 + 0.03 * i as f64, 2.0))
            .collect();
        let trend = analyze(&history, 900, 1003);
        assert_eq!(trend.direction, TrendDirection::Improving);
        assert_eq!(trend.recommendation, TrendRecommendation::Maintain);
    }

    #[test]
    fn falling_success_alone_is_declining() {
        let history: Vec<_> = (0..4)
            .map(|i| test_snapshot(1000 + i, 0.7, 0.95 - 0.05 * i as f64, 2.0))
            .collect();
        let trend = analyze(&history, 900, 1003);
        assert_eq!(trend.direction, TrendDirection::Declining);
        assert_eq!(trend.recommendation, TrendRecommendation::Maintain);
    }

    #[test]
    fn steep_decline_recommends_scale_down() {
        let history: Vec<_> = (0..4)
            .map(|i| test_snapshot(1000 + i, 0.9 - 0.2 * i as f64, 0.9, 1.0 + i as f64))
            .collect();
        let trend = analyze(&history, 900, 1003);
        assert_eq!(trend.direction, TrendDirection::Declining);
        assert_eq!(trend.recommendation, TrendRecommendation::ScaleDown);
        assert!((trend.response_time_slope - 1.0).abs() < 1e-12);
    }

    #[test]
    fn flat_history_is_stable() {
        let history: Vec<_> = (0..5).map(|i| test_snapshot(1000 + i, 0.6, 0.9, 2.0)).collect();
        let trend = analyze(&history, 900, 1004);
        assert_eq!(trend.direction, TrendDirection::Stable);
        assert_eq!(trend.recommendation, TrendRecommendation::Maintain);
        assert_eq!(trend.confidence, 1.0);
    }
}
