//! Configuration for the coordinator, the VEN agent and the node
//!
//! Values are built once at process start and passed into the components
//! that need them.

use std::path::PathBuf;
use std::time::Duration;

use crate::threshold::DEFAULT_TRIGGER_THRESHOLD;

/// Complete node configuration
#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    pub vtn: VtnConfig,
    pub ven: VenConfig,
    pub store: StoreConfig,
    pub monitor: MonitorConfig,
}

/// Coordinator (VTN) configuration
#[derive(Debug, Clone)]
pub struct VtnConfig {
    /// VTN identity presented to VENs
    pub server_name: String,

    /// Values strictly below this raise an event
    pub trigger_threshold: f64,

    /// Duration of the single interval of a raised event
    pub event_duration: Duration,

    /// Signal level carried by a raised event
    pub event_payload: f64,
}

/// Client (VEN) configuration
#[derive(Debug, Clone)]
pub struct VenConfig {
    /// Name the VEN registers under
    pub ven_name: String,

    /// Coordinator endpoint
    pub vtn_url: String,

    /// Device reported on
    pub report_resource_id: String,

    pub measurement: String,
    pub unit: String,
    pub scale: String,

    /// Cadence offered for the report (used as both min and max)
    pub sampling_rate: Duration,

    /// Upper bound on one measurement collection
    pub collect_timeout: Duration,
}

/// Persistence backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    Memory,
    Sqlite { path: PathBuf },
}

/// Display poller settings
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub enabled: bool,
    pub poll_interval: Duration,
}

impl Default for VtnConfig {
    fn default() -> Self {
        Self {
            server_name: "openleadr-server".to_string(),
            trigger_threshold: DEFAULT_TRIGGER_THRESHOLD,
            event_duration: Duration::from_secs(10 * 60),
            event_payload: 1.0,
        }
    }
}

impl Default for VenConfig {
    fn default() -> Self {
        Self {
            ven_name: "ven123".to_string(),
            vtn_url: "http://localhost:8080/OpenADR2/Simple/2.0b".to_string(),
            report_resource_id: "device001".to_string(),
            measurement: "voltage".to_string(),
            unit: "V".to_string(),
            scale: "none".to_string(),
            sampling_rate: Duration::from_secs(10),
            collect_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Sqlite {
            path: PathBuf::from("./database/openleadr.db"),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl VtnConfig {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            ..Default::default()
        }
    }

    /// Set trigger threshold
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.trigger_threshold = threshold;
        self
    }

    /// Set event shape
    pub fn with_event(mut self, duration: Duration, payload: f64) -> Self {
        self.event_duration = duration;
        self.event_payload = payload;
        self
    }
}

impl VenConfig {
    pub fn new(ven_name: impl Into<String>, vtn_url: impl Into<String>) -> Self {
        Self {
            ven_name: ven_name.into(),
            vtn_url: vtn_url.into(),
            ..Default::default()
        }
    }

    /// Set the reported device and measurement
    pub fn with_report(
        mut self,
        report_resource_id: impl Into<String>,
        measurement: impl Into<String>,
        unit: impl Into<String>,
    ) -> Self {
        self.report_resource_id = report_resource_id.into();
        self.measurement = measurement.into();
        self.unit = unit.into();
        self
    }

    /// Set sampling rate
    pub fn with_sampling_rate(mut self, rate: Duration) -> Self {
        self.sampling_rate = rate;
        self
    }

    /// Set collection timeout
    pub fn with_collect_timeout(mut self, timeout: Duration) -> Self {
        self.collect_timeout = timeout;
        self
    }
}

impl NodeConfig {
    /// Create config with the process identity parameters
    pub fn new(
        server_name: impl Into<String>,
        ven_name: impl Into<String>,
        vtn_url: impl Into<String>,
        db_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            vtn: VtnConfig::new(server_name),
            ven: VenConfig::new(ven_name, vtn_url),
            store: StoreConfig::Sqlite {
                path: db_path.into(),
            },
            monitor: MonitorConfig::default(),
        }
    }

    /// Keep everything in memory
    pub fn in_memory(mut self) -> Self {
        self.store = StoreConfig::Memory;
        self
    }

    /// Set VEN sampling rate
    pub fn with_sampling_rate(mut self, rate: Duration) -> Self {
        self.ven.sampling_rate = rate;
        self
    }

    /// Set display poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.monitor.poll_interval = interval;
        self
    }

    /// Disable the display poller
    pub fn without_monitor(mut self) -> Self {
        self.monitor.enabled = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = NodeConfig::new("vtn-a", "ven-a", "http://vtn:8080", "/tmp/a.db")
            .with_sampling_rate(Duration::from_secs(2))
            .with_poll_interval(Duration::from_millis(500))
            .without_monitor();

        assert_eq!(config.vtn.server_name, "vtn-a");
        assert_eq!(config.ven.ven_name, "ven-a");
        assert_eq!(config.ven.vtn_url, "http://vtn:8080");
        assert_eq!(config.ven.sampling_rate, Duration::from_secs(2));
        assert_eq!(
            config.store,
            StoreConfig::Sqlite {
                path: PathBuf::from("/tmp/a.db")
            }
        );
        assert!(!config.monitor.enabled);

        let config = config.in_memory();
        assert_eq!(config.store, StoreConfig::Memory);
    }

    #[test]
    fn test_defaults_match_event_contract() {
        let vtn = VtnConfig::default();
        assert_eq!(vtn.trigger_threshold, 200.0);
        assert_eq!(vtn.event_duration, Duration::from_secs(600));
        assert_eq!(vtn.event_payload, 1.0);

        let ven = VenConfig::default();
        assert_eq!(ven.report_resource_id, "device001");
        assert_eq!(ven.measurement, "voltage");
        assert_eq!(ven.sampling_rate, Duration::from_secs(10));
    }
}
