// =============================================================================
// Simple moving averages and volume trend
// =============================================================================

use serde::Serialize;

/// Latest simple moving average over the trailing `window` values.
pub fn latest_sma(values: &[f64], window: usize) -> Option<f64> {
    if window == 0 || values.len() < window {
        return None;
    }
    let sum: f64 = values[values.len() - window..].iter().sum();
    Some(sum / window as f64)
}

/// SMA at an offset of `bars_back` from the latest value (0 = latest).
pub fn sma_at(values: &[f64], window: usize, bars_back: usize) -> Option<f64> {
    if window == 0 || values.len() < window + bars_back {
        return None;
    }
    let end = values.len() - bars_back;
    let sum: f64 = values[end - window..end].iter().sum();
    Some(sum / window as f64)
}

/// Recent volume activity relative to the longer baseline.
#[derive(Debug, Clone, Serialize)]
pub struct VolumeTrend {
    /// Mean of the last 5 bars over the mean of the prior 20.
    pub ratio: f64,
    /// One of: RISING, FALLING, STABLE.
    pub label: &'static str,
}

/// Classify the volume trend: last 5 bars vs the 20 before them.
pub fn volume_trend(volumes: &[f64]) -> Option<VolumeTrend> {
    if volumes.len() < 25 {
        return None;
    }
    let recent: f64 = volumes[volumes.len() - 5..].iter().sum::<f64>() / 5.0;
    let baseline: f64 =
        volumes[volumes.len() - 25..volumes.len() - 5].iter().sum::<f64>() / 20.0;
    if baseline <= 0.0 {
        return None;
    }
    let ratio = recent / baseline;
    let label = if ratio > 1.25 {
        "RISING"
    } else if ratio < 0.75 {
        "FALLING"
    } else {
        "STABLE"
    };
    Some(VolumeTrend { ratio, label })
}
