//! Passage detection at the gate threshold
//!
//! One bounded ultrasonic measurement per call. Anything that is not a
//! valid echo inside the window is `NoEcho`; the gate machine treats that
//! as "not passed yet".

use crate::domain::types::DistanceReading;
use crate::infra::config::Config;
use crate::io::hardware::EchoRanger;
use std::time::Duration;
use tracing::{debug, warn};

/// Speed of sound in cm/µs at ~20 °C
pub const SPEED_OF_SOUND_CM_PER_US: f32 = 0.0343;

pub struct PassageDetector {
    ranger: Box<dyn EchoRanger>,
    echo_timeout: Duration,
    io_timeout: Duration,
}

impl PassageDetector {
    pub fn new(ranger: Box<dyn EchoRanger>, config: &Config) -> Self {
        Self { ranger, echo_timeout: config.echo_timeout(), io_timeout: config.io_timeout() }
    }

    pub async fn measure_distance_cm(&mut self) -> DistanceReading {
        // The call bound covers the echo window plus transport overhead
        let call_bound = self.echo_timeout + self.io_timeout;
        let echo = match tokio::time::timeout(call_bound, self.ranger.ping(self.echo_timeout)).await
        {
            Ok(Ok(echo)) => echo,
            Ok(Err(e)) => {
                warn!(error = %e, "ranger_failed");
                None
            }
            Err(_) => {
                warn!(timeout_ms = %call_bound.as_millis(), "ranger_timeout");
                None
            }
        };
        let reading = distance_from_echo(echo, self.echo_timeout);
        debug!(reading = ?reading, "distance_measured");
        reading
    }
}

/// Convert an echo round-trip time to a one-way distance
pub fn distance_from_echo(echo: Option<Duration>, echo_timeout: Duration) -> DistanceReading {
    match echo {
        Some(echo) if !echo.is_zero() && echo <= echo_timeout => {
            DistanceReading::Cm(echo.as_micros() as f32 * SPEED_OF_SOUND_CM_PER_US / 2.0)
        }
        _ => DistanceReading::NoEcho,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::sim::{echo_for_distance, SimHardware};

    #[test]
    fn test_distance_from_echo() {
        let timeout = Duration::from_millis(38);
        // 700 µs round trip is ~12 cm
        match distance_from_echo(Some(Duration::from_micros(700)), timeout) {
            DistanceReading::Cm(cm) => assert!((cm - 12.005).abs() < 0.01, "got {}", cm),
            DistanceReading::NoEcho => panic!("expected a distance"),
        }
    }

    #[test]
    fn test_missing_or_late_echo_is_no_echo() {
        let timeout = Duration::from_millis(38);
        assert_eq!(distance_from_echo(None, timeout), DistanceReading::NoEcho);
        assert_eq!(distance_from_echo(Some(Duration::ZERO), timeout), DistanceReading::NoEcho);
        assert_eq!(
            distance_from_echo(Some(Duration::from_millis(39)), timeout),
            DistanceReading::NoEcho
        );
    }

    #[tokio::test]
    async fn test_measure_through_ranger() {
        let hw = SimHardware::default();
        hw.set_distance(Some(9.0));
        let mut detector = PassageDetector::new(Box::new(hw.clone()), &Config::default());

        let cm = detector.measure_distance_cm().await.cm().unwrap();
        assert!((cm - 9.0).abs() < 0.05, "got {}", cm);
        assert_eq!(hw.pings(), 1);
    }

    #[tokio::test]
    async fn test_nothing_in_range_is_no_echo() {
        let hw = SimHardware::default();
        // 10 m is beyond the 38 ms window
        hw.set_distance(Some(1000.0));
        assert!(echo_for_distance(1000.0) > Duration::from_millis(38));
        let mut detector = PassageDetector::new(Box::new(hw), &Config::default());

        assert_eq!(detector.measure_distance_cm().await, DistanceReading::NoEcho);
    }
}
