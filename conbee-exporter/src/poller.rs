//! Gateway polling: fetch sensors, map them, publish gauges.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinError;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace};

use conbee_common::{SensorList, SensorSnapshot};

use crate::config::FilterConfig;
use crate::gateway::{GatewayClient, GatewayError};
use crate::mapping::map_sensor;
use crate::registry::{PollSummary, SharedRegistry};

/// Decides which sensors are published.
#[derive(Debug, Default)]
pub struct SensorFilter {
    include_types: Vec<String>,
    exclude_types: Vec<String>,
    exclude_names: Vec<glob::Pattern>,
}

impl SensorFilter {
    /// Create a filter from configuration. Invalid patterns are ignored.
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            include_types: config.include_types.clone(),
            exclude_types: config.exclude_types.clone(),
            exclude_names: config
                .exclude_names
                .iter()
                .filter_map(|p| glob::Pattern::new(p).ok())
                .collect(),
        }
    }

    /// Check if a sensor should be published.
    pub fn should_include(&self, sensor: &SensorSnapshot) -> bool {
        if !self.include_types.is_empty()
            && !self.include_types.iter().any(|t| t == &sensor.sensor_type)
        {
            return false;
        }
        if self.exclude_types.iter().any(|t| t == &sensor.sensor_type) {
            return false;
        }

        !self.exclude_names.iter().any(|p| p.matches(&sensor.name))
    }
}

/// Periodically polls one gateway and publishes its sensors.
pub struct SensorPoller {
    client: GatewayClient,
    registry: SharedRegistry,
    filter: SensorFilter,
    interval: Duration,
}

impl SensorPoller {
    /// Create a new poller.
    pub fn new(
        client: GatewayClient,
        registry: SharedRegistry,
        filter: SensorFilter,
        interval: Duration,
    ) -> Self {
        Self {
            client,
            registry,
            filter,
            interval,
        }
    }

    /// Run the polling loop until the shutdown signal is received.
    ///
    /// The first cycle runs immediately. A failed cycle is logged and the
    /// next one proceeds on schedule; gauges keep their last values.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            gateway = %self.client.base_url(),
            interval_secs = self.interval.as_secs(),
            "Starting sensor poller"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.poll_once().await {
                        Ok(summary) => {
                            debug!(
                                sensors = summary.published,
                                measurements = summary.measurements,
                                unmapped = summary.unmapped,
                                filtered = summary.filtered,
                                "Poll cycle completed"
                            );
                        }
                        Err(e) => {
                            error!(error = %e, "Could not get sensors from gateway");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Sensor poller stopped");
    }

    /// Perform a single fetch-map-publish cycle and record it in the registry stats.
    pub async fn poll_once(&self) -> Result<PollSummary, GatewayError> {
        match self.client.fetch_sensors().await {
            Ok(list) => {
                let summary = self.publish(&list);
                self.registry
                    .record_poll(&summary, chrono::Utc::now().timestamp());
                Ok(summary)
            }
            Err(e) => {
                self.registry.record_poll_failure();
                Err(e)
            }
        }
    }

    /// Map and publish every sensor of one response.
    pub fn publish(&self, list: &SensorList) -> PollSummary {
        let mut summary = PollSummary {
            rejected: list.rejected.len() as u64,
            ..Default::default()
        };

        for sensor in &list.sensors {
            if !self.filter.should_include(sensor) {
                summary.filtered += 1;
                continue;
            }

            let readings = map_sensor(sensor);
            if readings.is_empty() {
                trace!(
                    sensor = %sensor.id,
                    sensor_type = %sensor.sensor_type,
                    "No mapping for sensor type"
                );
                summary.unmapped += 1;
                continue;
            }

            for (name, value) in &readings.measurements {
                debug!(sensor = %sensor.name, measurement = %name, value, "Measured");
            }

            summary.measurements += self.registry.publish(&sensor.id, &readings) as u64;
            summary.published += 1;
        }

        summary
    }
}

/// Describe a poller task that finished before shutdown was requested.
///
/// The poll loop only returns on shutdown, so any earlier completion is
/// fatal. A panic here usually means a gauge invariant was violated.
pub fn unexpected_exit(result: Result<(), JoinError>) -> anyhow::Error {
    match result {
        Err(e) if e.is_panic() => {
            let payload = e.into_panic();
            let message = payload
                .downcast_ref::<String>()
                .map(String::as_str)
                .or_else(|| payload.downcast_ref::<&str>().copied())
                .unwrap_or("unknown panic payload");
            anyhow::anyhow!("Sensor poller panicked: {}", message)
        }
        Err(e) => anyhow::anyhow!("Sensor poller task failed: {}", e),
        Ok(()) => anyhow::anyhow!("Sensor poller stopped before shutdown"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::GaugeRegistry;
    use conbee_common::SensorState;
    use std::sync::Arc;

    fn sensor(id: &str, name: &str, sensor_type: &str) -> SensorSnapshot {
        SensorSnapshot {
            id: id.to_string(),
            name: name.to_string(),
            sensor_type: sensor_type.to_string(),
            state: SensorState {
                temperature: 2150,
                humidity: 4300,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn poller(filter: FilterConfig) -> (SensorPoller, SharedRegistry) {
        let registry = Arc::new(GaugeRegistry::new("conbee", 1000));
        let client =
            GatewayClient::new("127.0.0.1:9", "key", Duration::from_millis(200)).unwrap();
        let poller = SensorPoller::new(
            client,
            registry.clone(),
            SensorFilter::new(&filter),
            Duration::from_secs(10),
        );
        (poller, registry)
    }

    #[test]
    fn test_filter_include_types() {
        let filter = SensorFilter::new(&FilterConfig {
            include_types: vec!["ZHATemperature".to_string()],
            ..Default::default()
        });

        assert!(filter.should_include(&sensor("1", "a", "ZHATemperature")));
        assert!(!filter.should_include(&sensor("2", "b", "ZHAHumidity")));
    }

    #[test]
    fn test_filter_exclude_types_and_names() {
        let filter = SensorFilter::new(&FilterConfig {
            exclude_types: vec!["ZHASwitch".to_string()],
            exclude_names: vec!["Test *".to_string()],
            ..Default::default()
        });

        assert!(!filter.should_include(&sensor("1", "Remote", "ZHASwitch")));
        assert!(!filter.should_include(&sensor("2", "Test sensor", "ZHATemperature")));
        assert!(filter.should_include(&sensor("3", "Bedroom", "ZHATemperature")));
    }

    #[test]
    fn test_publish_counts() {
        let (poller, registry) = poller(FilterConfig {
            exclude_names: vec!["Ignored*".to_string()],
            ..Default::default()
        });

        let list = SensorList {
            sensors: vec![
                sensor("1", "Bedroom", "ZHATemperature"),
                sensor("2", "Bedroom", "ZHAHumidity"),
                sensor("3", "Daylight", "Daylight"),
                sensor("4", "Ignored sensor", "ZHATemperature"),
            ],
            rejected: Vec::new(),
        };

        let summary = poller.publish(&list);
        assert_eq!(summary.published, 2);
        assert_eq!(summary.unmapped, 1);
        assert_eq!(summary.filtered, 1);
        assert_eq!(summary.measurements, 2);
        assert_eq!(registry.gauge_count(), 2);
    }

    #[tokio::test]
    async fn test_poll_once_failure_is_recorded() {
        let (poller, registry) = poller(FilterConfig::default());

        // Nothing listens on the discard port.
        assert!(poller.poll_once().await.is_err());

        let stats = registry.stats();
        assert_eq!(stats.polls_failed, 1);
        assert_eq!(stats.polls_completed, 0);
        assert_eq!(registry.gauge_count(), 0);
    }
}
