//! Simulated sources for demos and hardware-free deployments.

use std::time::{Duration, Instant};

use rand::Rng;

use brego_types::{DeviceSpec, Reading, now};

use crate::error::Result;
use crate::producer::{BlockingSensor, Sample};

/// A slow sensor tracing a noisy sine wave.
#[derive(Debug, Clone)]
pub struct SimulatedSensor {
    name: String,
    kind: String,
    base: f64,
    amplitude: f64,
    period: Duration,
    noise: f64,
    latency: Duration,
    started: Instant,
}

impl SimulatedSensor {
    /// A temperature-like sensor oscillating ±`amplitude` around `base`.
    pub fn new(name: impl Into<String>, base: f64, amplitude: f64) -> Self {
        Self {
            name: name.into(),
            kind: "temperature".to_string(),
            base,
            amplitude,
            period: Duration::from_secs(600),
            noise: 0.05,
            latency: Duration::ZERO,
            started: Instant::now(),
        }
    }

    /// Override the device kind.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Oscillation period.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Half-width of the uniform noise added to each read.
    pub fn with_noise(mut self, noise: f64) -> Self {
        self.noise = noise.abs();
        self
    }

    /// Block each read for `latency`, like a real conversion would.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn value_at(&self, elapsed: Duration) -> f64 {
        let period = self.period.as_secs_f64().max(f64::EPSILON);
        let phase = elapsed.as_secs_f64() / period * std::f64::consts::TAU;
        self.base + self.amplitude * phase.sin()
    }
}

impl BlockingSensor for SimulatedSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    fn read(&self) -> Result<f64> {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        let jitter = if self.noise > 0.0 {
            rand::rng().random_range(-self.noise..=self.noise)
        } else {
            0.0
        };
        Ok(self.value_at(self.started.elapsed()) + jitter)
    }
}

/// A fast multi-channel source whose channels drift in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct SimulatedSampler {
    channels: Vec<(String, f64)>,
    step: f64,
}

impl SimulatedSampler {
    /// One channel per name, each starting at the midpoint.
    pub fn new<I, N>(names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        Self {
            channels: names.into_iter().map(|n| (n.into(), 0.5)).collect(),
            step: 0.01,
        }
    }

    /// Largest change of a channel between two samples.
    pub fn with_step(mut self, step: f64) -> Self {
        self.step = step.abs();
        self
    }
}

impl Sample for SimulatedSampler {
    fn devices(&self) -> Vec<DeviceSpec> {
        self.channels
            .iter()
            .map(|(name, _)| DeviceSpec::new(name.clone(), "ADC"))
            .collect()
    }

    fn sample(&mut self) -> Result<Vec<Reading>> {
        let mut rng = rand::rng();
        let step = self.step;
        let at = now();
        Ok(self
            .channels
            .iter_mut()
            .map(|(name, level)| {
                let delta = if step > 0.0 {
                    rng.random_range(-step..=step)
                } else {
                    0.0
                };
                *level = (*level + delta).clamp(0.0, 1.0);
                Reading::new(at, name.clone(), Some(*level))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_sensor_stays_in_band() {
        let sensor = SimulatedSensor::new("28-sim", 20.0, 2.0).with_noise(0.1);
        for _ in 0..100 {
            let v = sensor.read().unwrap();
            assert!((17.9..=22.1).contains(&v), "out of band: {v}");
        }
        assert_eq!(sensor.kind(), "temperature");
    }

    #[test]
    fn test_simulated_sensor_follows_wave() {
        let sensor = SimulatedSensor::new("x", 10.0, 5.0)
            .with_noise(0.0)
            .with_period(Duration::from_secs(4));
        assert!((sensor.value_at(Duration::ZERO) - 10.0).abs() < 1e-9);
        assert!((sensor.value_at(Duration::from_secs(1)) - 15.0).abs() < 1e-9);
        assert!((sensor.value_at(Duration::from_secs(3)) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_simulated_sampler_channels() {
        let mut sampler = SimulatedSampler::new(["Potentiometer", "Tachometer"]).with_step(0.2);
        assert_eq!(
            sampler.devices(),
            vec![
                DeviceSpec::new("Potentiometer", "ADC"),
                DeviceSpec::new("Tachometer", "ADC")
            ]
        );

        for _ in 0..200 {
            let readings = sampler.sample().unwrap();
            assert_eq!(readings.len(), 2);
            assert_eq!(readings[0].timestamp, readings[1].timestamp);
            for r in &readings {
                let v = r.value.unwrap();
                assert!((0.0..=1.0).contains(&v));
            }
        }
    }
}
