//! Occupancy sampling
//!
//! Reads every spot sensor once per cycle and classifies it against its
//! calibration threshold. Unreadable or out-of-range channels are reported
//! occupied: over-reporting a full lot is safer than sending a car to a
//! spot that is taken.

use crate::domain::occupancy::{OccupancySnapshot, Spot};
use crate::infra::config::Config;
use crate::io::hardware::AnalogInput;
use std::time::Duration;
use tracing::{trace, warn};

pub struct OccupancySampler {
    input: Box<dyn AnalogInput>,
    thresholds: Vec<u16>,
    max_raw: u16,
    read_timeout: Duration,
}

impl OccupancySampler {
    pub fn new(input: Box<dyn AnalogInput>, config: &Config) -> Self {
        Self {
            input,
            thresholds: config.spot_thresholds().to_vec(),
            max_raw: config.max_raw(),
            read_timeout: config.io_timeout(),
        }
    }

    pub fn spot_count(&self) -> usize {
        self.thresholds.len()
    }

    /// Read all channels and classify them
    ///
    /// Never fails: a failed or timed-out read yields a snapshot with every
    /// spot faulted.
    pub async fn sample(&mut self) -> OccupancySnapshot {
        let count = self.thresholds.len();
        let raw = match tokio::time::timeout(self.read_timeout, self.input.read_channels(count)).await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                warn!(error = %e, "sensor_read_failed");
                Vec::new()
            }
            Err(_) => {
                warn!(timeout_ms = %self.read_timeout.as_millis(), "sensor_read_timeout");
                Vec::new()
            }
        };
        let snapshot = self.classify(&raw);
        trace!(available = %snapshot.available_count(), raw = ?raw, "occupancy_sampled");
        snapshot
    }

    /// Pure classification of raw readings against the calibration
    ///
    /// Channels missing from `raw` are treated as unreadable.
    pub fn classify(&self, raw: &[Option<u16>]) -> OccupancySnapshot {
        OccupancySnapshot::new(self.thresholds.iter().enumerate().map(|(index, &threshold)| {
            let reading = raw.get(index).copied().flatten();
            match reading {
                Some(r) if r <= self.max_raw => {
                    Spot { index, raw: Some(r), threshold, free: r < threshold, fault: false }
                }
                _ => Spot { index, raw: reading, threshold, free: false, fault: true },
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::sim::SimHardware;

    fn sampler(thresholds: Vec<u16>, hw: &SimHardware) -> OccupancySampler {
        let config = Config::default().with_spot_thresholds(thresholds);
        OccupancySampler::new(Box::new(hw.clone()), &config)
    }

    fn free(snapshot: &OccupancySnapshot) -> Vec<bool> {
        snapshot.free_flags().to_vec()
    }

    #[tokio::test]
    async fn test_reference_scenario() {
        let hw = SimHardware::new(vec![Some(600), Some(100), Some(500)]);
        let mut sampler = sampler(vec![500, 270, 400], &hw);

        let snapshot = sampler.sample().await;

        assert_eq!(free(&snapshot), vec![false, true, false]);
        assert_eq!(snapshot.available_count(), 1);
        assert_eq!(snapshot.fault_count(), 0);
    }

    #[test]
    fn test_free_iff_strictly_below_threshold() {
        let hw = SimHardware::default();
        let sampler = sampler(vec![100, 100, 100], &hw);

        let snapshot = sampler.classify(&[Some(99), Some(100), Some(101)]);

        assert_eq!(free(&snapshot), vec![true, false, false]);
        assert_eq!(snapshot.available_count(), 1);
    }

    #[test]
    fn test_available_equals_free_count_for_any_vector() {
        let hw = SimHardware::default();
        let thresholds = vec![10, 200, 300, 400, 500, 600, 700];
        let sampler = sampler(thresholds.clone(), &hw);

        for seed in 0u16..50 {
            let raw: Vec<Option<u16>> =
                (0..thresholds.len() as u16).map(|i| Some((seed * 37 + i * 113) % 1024)).collect();
            let snapshot = sampler.classify(&raw);

            for (spot, (r, t)) in snapshot.spots().iter().zip(raw.iter().zip(&thresholds)) {
                assert_eq!(spot.free, r.unwrap() < *t);
            }
            let expected = snapshot.spots().iter().filter(|s| s.free).count();
            assert_eq!(snapshot.available_count(), expected);
            assert!(snapshot.available_count() <= snapshot.total());
        }
    }

    #[test]
    fn test_faulted_channels_fail_occupied() {
        let hw = SimHardware::default();
        let sampler = sampler(vec![500, 500, 500], &hw);

        // disconnected, above 10-bit range, missing entirely
        let snapshot = sampler.classify(&[None, Some(4000)]);

        assert_eq!(free(&snapshot), vec![false, false, false]);
        assert_eq!(snapshot.fault_count(), 3);
        assert_eq!(snapshot.spots()[1].raw, Some(4000));
    }

    #[tokio::test]
    async fn test_read_failure_faults_every_spot() {
        let hw = SimHardware::new(vec![Some(0), Some(0)]);
        hw.set_analog_fault(true);
        let mut sampler = sampler(vec![500, 500], &hw);

        let snapshot = sampler.sample().await;

        assert_eq!(snapshot.available_count(), 0);
        assert_eq!(snapshot.fault_count(), 2);
    }

    #[tokio::test]
    async fn test_sampling_is_idempotent() {
        let hw = SimHardware::new(vec![Some(600), Some(100), Some(500)]);
        let mut sampler = sampler(vec![500, 270, 400], &hw);

        let first = sampler.sample().await;
        let second = sampler.sample().await;

        assert_eq!(first, second);
    }
}
