//! Sliding-window trend classification over per-frame crowd samples.
//!
//! Samples live in a bounded ring buffer. Each new sample re-evaluates the
//! most recent window: a flat window is a plateau, a window whose least
//! squares slope exceeds the threshold is a linear increase.

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy)]
pub struct TrendConfig {
    pub history_size: usize,
    pub plateau_window: Duration,
    pub linear_window: Duration,
    /// Largest max-min spread still considered flat
    pub plateau_tolerance: usize,
    /// Counts per second
    pub linear_slope_threshold: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            history_size: 300,
            plateau_window: Duration::seconds(30),
            linear_window: Duration::seconds(30),
            plateau_tolerance: 1,
            linear_slope_threshold: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrowdSample {
    pub timestamp: DateTime<Utc>,
    pub subject_count: usize,
    pub object_count: usize,
    pub mean_overlap: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trend {
    /// Fewer than two samples in the window
    Insufficient,
    Plateau {
        subject_range: usize,
        object_range: usize,
    },
    LinearIncrease {
        subject_slope: f64,
        object_slope: f64,
    },
    Steady,
}

#[derive(Debug)]
pub struct TrendDetector {
    config: TrendConfig,
    history: VecDeque<CrowdSample>,
}

impl TrendDetector {
    pub fn new(config: TrendConfig) -> Self {
        Self {
            history: VecDeque::with_capacity(config.history_size),
            config,
        }
    }

    /// Append a sample, evicting the oldest when full, and classify the window
    /// ending at the sample's timestamp.
    pub fn record(&mut self, sample: CrowdSample) -> Trend {
        if self.config.history_size == 0 {
            return Trend::Insufficient;
        }
        while self.history.len() >= self.config.history_size {
            self.history.pop_front();
        }
        let now = sample.timestamp;
        self.history.push_back(sample);
        self.evaluate(now)
    }

    pub fn evaluate(&self, now: DateTime<Utc>) -> Trend {
        let window = self.config.plateau_window.max(self.config.linear_window);
        let recent: Vec<&CrowdSample> = self
            .history
            .iter()
            .filter(|s| now - s.timestamp <= window && s.timestamp <= now)
            .collect();

        if recent.len() < 2 {
            return Trend::Insufficient;
        }

        let subject_range = spread(recent.iter().map(|s| s.subject_count));
        let object_range = spread(recent.iter().map(|s| s.object_count));
        if subject_range <= self.config.plateau_tolerance
            && object_range <= self.config.plateau_tolerance
        {
            return Trend::Plateau {
                subject_range,
                object_range,
            };
        }

        let origin = recent[0].timestamp;
        let xs: Vec<f64> = recent
            .iter()
            .map(|s| (s.timestamp - origin).num_milliseconds() as f64 / 1000.0)
            .collect();
        let subjects: Vec<f64> = recent.iter().map(|s| s.subject_count as f64).collect();
        let objects: Vec<f64> = recent.iter().map(|s| s.object_count as f64).collect();

        let subject_slope = ols_slope(&xs, &subjects).unwrap_or(0.0);
        let object_slope = ols_slope(&xs, &objects).unwrap_or(0.0);

        if subject_slope > self.config.linear_slope_threshold
            || object_slope > self.config.linear_slope_threshold
        {
            Trend::LinearIncrease {
                subject_slope,
                object_slope,
            }
        } else {
            Trend::Steady
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

fn spread(values: impl Iterator<Item = usize>) -> usize {
    let (min, max) = values.fold((usize::MAX, 0), |(lo, hi), v| (lo.min(v), hi.max(v)));
    max.saturating_sub(min)
}

/// Ordinary least squares slope of `ys` against `xs`. `None` when the inputs
/// differ in length, hold fewer than two points, or all `xs` coincide.
pub fn ols_slope(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }

    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let (mut cov, mut var) = (0.0, 0.0);
    for (x, y) in xs.iter().zip(ys) {
        cov += (x - mean_x) * (y - mean_y);
        var += (x - mean_x) * (x - mean_x);
    }

    if var.abs() < f64::EPSILON {
        return None;
    }
    Some(cov / var)
}
