//! Producers built from configuration.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use brego_core::{
    Ds18b20, MultiplexedPoller, Producer, SimulatedSampler, SimulatedSensor, WindowedSampler,
};

use crate::config::ProducerConfig;

/// Build the producer described by `config`.
///
/// A one-wire producer scans its root once; probes attached later are not
/// picked up until restart.
pub fn build_producer(config: &ProducerConfig) -> brego_core::Result<Arc<dyn Producer>> {
    let producer: Arc<dyn Producer> = match config {
        ProducerConfig::Onewire(c) => {
            let sensors = Ds18b20::discover(&c.root)?;
            if sensors.is_empty() {
                warn!("No one-wire probes found under {}", c.root.display());
            } else {
                info!("Found {} one-wire probe(s) for {}", sensors.len(), c.name);
            }
            let mut poller =
                MultiplexedPoller::new(c.name.clone(), sensors, Duration::from_millis(c.interval_ms));
            if let Some(pool_size) = c.pool_size {
                poller = poller.with_pool_size(pool_size);
            }
            Arc::new(poller)
        }
        ProducerConfig::Simulated(c) => {
            let sensors = c
                .devices
                .iter()
                .map(|name| {
                    SimulatedSensor::new(name.clone(), c.base, c.amplitude)
                        .with_latency(Duration::from_millis(c.latency_ms))
                })
                .collect();
            Arc::new(MultiplexedPoller::new(
                c.name.clone(),
                sensors,
                Duration::from_millis(c.interval_ms),
            ))
        }
        ProducerConfig::Sampler(c) => Arc::new(
            WindowedSampler::new(
                c.name.clone(),
                SimulatedSampler::new(c.channels.iter().cloned()),
                Duration::from_millis(c.sample_interval_ms),
                Duration::from_millis(c.window_ms),
            )
            .with_capacity(c.capacity),
        ),
    };
    Ok(producer)
}

/// Build every configured producer.
pub fn build_producers(configs: &[ProducerConfig]) -> brego_core::Result<Vec<Arc<dyn Producer>>> {
    configs.iter().map(build_producer).collect()
}

#[cfg(test)]
mod tests {
    use brego_core::DeviceSpec;

    use super::*;
    use crate::config::{OneWireConfig, SamplerConfig, SimulatedConfig};

    #[test]
    fn test_simulated_producer_devices() {
        let producer =
            build_producer(&ProducerConfig::Simulated(SimulatedConfig::default())).unwrap();
        assert_eq!(producer.name(), "simulated");
        assert_eq!(
            producer.devices(),
            vec![
                DeviceSpec::new("28-sim-0001", "temperature"),
                DeviceSpec::new("28-sim-0002", "temperature"),
            ]
        );
    }

    #[test]
    fn test_sampler_producer_devices() {
        let producer = build_producer(&ProducerConfig::Sampler(SamplerConfig::default())).unwrap();
        assert_eq!(producer.name(), "adc");
        assert!(producer.devices().iter().all(|d| d.kind == "ADC"));
    }

    #[test]
    fn test_onewire_producer_discovers_probes() {
        let dir = tempfile::tempdir().unwrap();
        for id in ["28-000000000001", "28-000000000002", "w1_bus_master1"] {
            std::fs::create_dir(dir.path().join(id)).unwrap();
        }

        let config = OneWireConfig {
            root: dir.path().to_path_buf(),
            ..OneWireConfig::default()
        };
        let producer = build_producer(&ProducerConfig::Onewire(config)).unwrap();
        let names: Vec<_> = producer.devices().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["28-000000000001", "28-000000000002"]);
    }

    #[test]
    fn test_onewire_missing_root_fails() {
        let config = OneWireConfig {
            root: "/nonexistent/w1/devices".into(),
            ..OneWireConfig::default()
        };
        assert!(build_producers(&[ProducerConfig::Onewire(config)]).is_err());
    }
}
