//! Raw metric series and their reduction to plant stats.
//!
//! A [`MetricsSource`] hands back four unordered, timestamped series per
//! fetch. Rate series (messages sent / deleted per bucket) are reduced to
//! the **second-most-recent** point — public metrics services report the
//! freshest bucket while it is still filling. Gauge series (visible /
//! in-flight counts) take the freshest point as-is.

use std::time::SystemTime;

use async_trait::async_trait;

use crate::error::PlantError;

/// One timestamped metric value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataPoint {
    pub timestamp: SystemTime,
    pub value: f64,
}

/// One fetch worth of queue telemetry. Series come back in whatever order
/// the backing service returns them.
#[derive(Debug, Clone, Default)]
pub struct MetricsSample {
    /// Messages sent to the queue, per-minute buckets.
    pub sent: Vec<DataPoint>,
    /// Messages deleted from the queue, per-minute buckets.
    pub deleted: Vec<DataPoint>,
    /// Messages visible and awaiting pickup.
    pub visible: Vec<DataPoint>,
    /// Messages picked up but not yet completed.
    pub in_flight: Vec<DataPoint>,
}

/// Where raw queue telemetry comes from. A production implementation polls
/// a cloud metrics API; tests hand back canned series.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<MetricsSample>;
}

/// Reduce a rate series: the second-most-recent point by timestamp.
pub(crate) fn rate_value(points: &[DataPoint]) -> Result<f64, PlantError> {
    if points.len() < 2 {
        return Err(PlantError::ShortRateSeries(points.len()));
    }

    let (mut last, mut second) = if points[0].timestamp > points[1].timestamp {
        (0, 1)
    } else {
        (1, 0)
    };
    for i in 2..points.len() {
        if points[i].timestamp > points[last].timestamp {
            second = last;
            last = i;
        } else if points[i].timestamp > points[second].timestamp {
            second = i;
        }
    }

    Ok(points[second].value)
}

/// Reduce a gauge series: the most recent point by timestamp.
pub(crate) fn gauge_value(points: &[DataPoint]) -> Result<f64, PlantError> {
    points
        .iter()
        .max_by_key(|p| p.timestamp)
        .map(|p| p.value)
        .ok_or(PlantError::EmptyGaugeSeries)
}
