use std::time::Duration;

use bon::Builder;

/// Service carrying the sensor data characteristic.
pub const SENSOR_SERVICE_UUID: &str = "0000ffe0-0000-1000-8000-00805f9b34fb";
/// Characteristic delivering sample notifications.
pub const SENSOR_DATA_UUID: &str = "0000ffe1-0000-1000-8000-00805f9b34fb";

const DEFAULT_SCAN_WINDOW: Duration = Duration::from_secs(1);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_EVENT_CAPACITY: usize = 256;
const DEFAULT_SESSION_LOG_CAPACITY: usize = 86_400;

/// GATT endpoints a peripheral must expose to be streamed from.
#[derive(Debug, Clone, Eq, PartialEq, Builder)]
pub struct GattRequirement {
    #[builder(into, default = SENSOR_SERVICE_UUID.to_string())]
    service_uuid: String,
    #[builder(into, default = SENSOR_DATA_UUID.to_string())]
    characteristic_uuid: String,
}

impl GattRequirement {
    /// Returns the required service UUID.
    #[must_use]
    pub fn service_uuid(&self) -> &str {
        &self.service_uuid
    }

    /// Returns the required notify characteristic UUID.
    #[must_use]
    pub fn characteristic_uuid(&self) -> &str {
        &self.characteristic_uuid
    }
}

impl Default for GattRequirement {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Tunables for the sensor link supervisor.
#[derive(Debug, Clone, Builder)]
pub struct LinkConfig {
    /// How long one discovery scan runs before it is stopped.
    #[builder(default = DEFAULT_SCAN_WINDOW)]
    scan_window: Duration,
    /// Upper bound on the `Connecting` phase.
    #[builder(default = DEFAULT_CONNECT_TIMEOUT)]
    connect_timeout: Duration,
    /// Upper bound on the `ServiceDiscovery` phase.
    #[builder(default = DEFAULT_DISCOVERY_TIMEOUT)]
    discovery_timeout: Duration,
    /// Per-subscriber buffer depth before the oldest events are dropped.
    #[builder(default = DEFAULT_EVENT_CAPACITY)]
    event_capacity: usize,
    /// Maximum number of samples kept for export.
    #[builder(default = DEFAULT_SESSION_LOG_CAPACITY)]
    session_log_capacity: usize,
    #[builder(default)]
    gatt: GattRequirement,
}

impl LinkConfig {
    #[must_use]
    pub fn scan_window(&self) -> Duration {
        self.scan_window
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    #[must_use]
    pub fn discovery_timeout(&self) -> Duration {
        self.discovery_timeout
    }

    /// Returns the broadcast capacity, never less than one.
    #[must_use]
    pub fn event_capacity(&self) -> usize {
        self.event_capacity.max(1)
    }

    #[must_use]
    pub fn session_log_capacity(&self) -> usize {
        self.session_log_capacity
    }

    #[must_use]
    pub fn gatt(&self) -> &GattRequirement {
        &self.gatt
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_match_sensor_profile() {
        let config = LinkConfig::default();

        assert_eq!(Duration::from_secs(1), config.scan_window());
        assert_eq!(Duration::from_secs(10), config.connect_timeout());
        assert_eq!(Duration::from_secs(15), config.discovery_timeout());
        assert_eq!(256, config.event_capacity());
        assert_eq!(SENSOR_SERVICE_UUID, config.gatt().service_uuid());
        assert_eq!(SENSOR_DATA_UUID, config.gatt().characteristic_uuid());
    }

    #[test]
    fn zero_event_capacity_is_clamped() {
        let config = LinkConfig::builder().event_capacity(0).build();
        assert_eq!(1, config.event_capacity());
    }
}
