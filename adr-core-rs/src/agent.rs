//! Client decision agent (VEN)
//!
//! Supplies telemetry from an injected [`MeasurementProvider`] and answers
//! every event notice. The answer is always `optIn`.

use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::VenConfig;
use crate::error::DrError;
use crate::types::{EventNotice, OptType, ReportRequest};

/// Source of the value reported on each sampling tick
#[async_trait]
pub trait MeasurementProvider: Send + Sync {
    async fn measure(&self) -> f64;
}

/// Constant reading
#[derive(Debug, Clone, Copy)]
pub struct FixedMeasurement(pub f64);

impl Default for FixedMeasurement {
    fn default() -> Self {
        Self(1.23)
    }
}

#[async_trait]
impl MeasurementProvider for FixedMeasurement {
    async fn measure(&self) -> f64 {
        self.0
    }
}

/// Uniform reading in `[low, high)`
#[derive(Debug, Clone, Copy)]
pub struct RandomMeasurement {
    low: f64,
    high: f64,
}

impl RandomMeasurement {
    pub fn new(low: f64, high: f64) -> Result<Self, DrError> {
        if !(low.is_finite() && high.is_finite() && low < high) {
            return Err(DrError::InvalidInput(format!(
                "empty measurement range [{}, {})",
                low, high
            )));
        }
        Ok(Self { low, high })
    }

    pub fn range(&self) -> (f64, f64) {
        (self.low, self.high)
    }
}

impl Default for RandomMeasurement {
    fn default() -> Self {
        Self {
            low: 1.0,
            high: 100.0,
        }
    }
}

#[async_trait]
impl MeasurementProvider for RandomMeasurement {
    async fn measure(&self) -> f64 {
        rand::thread_rng().gen_range(self.low..self.high)
    }
}

/// Inbound protocol callbacks handled by the VEN
#[async_trait]
pub trait VenHandler: Send + Sync {
    /// Value for the next report
    async fn on_collect_report(&self) -> f64;

    /// Decision for an event notice
    fn on_event(&self, notice: &EventNotice) -> OptType;
}

/// VEN-side agent
pub struct VenAgent {
    config: VenConfig,
    provider: Arc<dyn MeasurementProvider>,
}

impl VenAgent {
    pub fn new(config: VenConfig, provider: Arc<dyn MeasurementProvider>) -> Self {
        Self { config, provider }
    }

    pub fn name(&self) -> &str {
        &self.config.ven_name
    }

    pub fn config(&self) -> &VenConfig {
        &self.config
    }

    /// Provider value, unmodified
    pub async fn supply_sample(&self) -> f64 {
        let value = self.provider.measure().await;
        debug!("VEN {}: Collected {} = {}", self.config.ven_name, self.config.measurement, value);
        value
    }

    /// Decision for an event; always opts in
    pub fn decide(&self, notice: &EventNotice) -> OptType {
        match notice.active_period() {
            Some((start, end)) => info!(
                "VEN {}: Event {} ({}/{}) active {} .. {}, opting in",
                self.config.ven_name,
                notice.event_id,
                notice.signal_type,
                notice.signal_name,
                start,
                end
            ),
            None => info!(
                "VEN {}: Event {} without intervals, opting in",
                self.config.ven_name, notice.event_id
            ),
        }
        OptType::OptIn
    }

    /// Report registration offered for `resource_id`, min = max = sampling rate
    pub fn report_request(&self, resource_id: &str) -> ReportRequest {
        ReportRequest {
            resource_id: resource_id.to_string(),
            report_resource_id: self.config.report_resource_id.clone(),
            measurement: self.config.measurement.clone(),
            unit: self.config.unit.clone(),
            scale: self.config.scale.clone(),
            min_interval: self.config.sampling_rate,
            max_interval: self.config.sampling_rate,
        }
    }
}

#[async_trait]
impl VenHandler for VenAgent {
    async fn on_collect_report(&self) -> f64 {
        self.supply_sample().await
    }

    fn on_event(&self, notice: &EventNotice) -> OptType {
        self.decide(notice)
    }
}
