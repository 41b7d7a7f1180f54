//! Shared types for the parking gate controller

use serde::{Serialize, Serializer};
use smallvec::SmallVec;
use std::fmt;
use std::str::FromStr;

/// Valid identifier lengths for ISO14443 card UIDs (single, double, triple size)
pub const CREDENTIAL_LENGTHS: [usize; 3] = [4, 7, 10];

/// Opaque fixed-length identifier presented at the reader
///
/// Stored inline; the largest UID the readers produce is 10 bytes.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(SmallVec<[u8; 10]>);

impl Credential {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(SmallVec::from_slice(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Upper-case hex with colon separators, e.g. `03:0C:49:16`
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02X}", b)).collect::<Vec<_>>().join(":")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.to_hex())
    }
}

impl FromStr for Credential {
    type Err = anyhow::Error;

    /// Accepts `030C4916`, `03:0C:49:16`, `03-0c-49-16` or `03 0C 49 16`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String =
            s.chars().filter(|c| !matches!(c, ':' | '-' | ' ')).collect();
        let bytes = hex::decode(&digits)
            .map_err(|e| anyhow::anyhow!("invalid credential {:?}: {}", s, e))?;
        if !CREDENTIAL_LENGTHS.contains(&bytes.len()) {
            anyhow::bail!(
                "invalid credential {:?}: {} bytes, expected one of {:?}",
                s,
                bytes.len(),
                CREDENTIAL_LENGTHS
            );
        }
        Ok(Self::from_bytes(&bytes))
    }
}

impl Serialize for Credential {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Gate lifecycle as seen by the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GateState {
    /// Barrier down; the only state that accepts credentials
    #[default]
    Closed,
    /// Barrier up, waiting for the passage detector to confirm the vehicle
    Open,
    /// Passage confirmed, holding the barrier up for the grace period
    ClosingPending,
}

impl GateState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateState::Closed => "closed",
            GateState::Open => "open",
            GateState::ClosingPending => "closing_pending",
        }
    }

    /// Position the actuator must hold while in this state
    pub fn position(&self) -> GatePosition {
        match self {
            GateState::Closed => GatePosition::Closed,
            GateState::Open | GateState::ClosingPending => GatePosition::Open,
        }
    }
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Actuator command (open loop, no position feedback)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePosition {
    Open,
    Closed,
}

impl GatePosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatePosition::Open => "open",
            GatePosition::Closed => "closed",
        }
    }
}

/// Result of one passage-detector measurement
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DistanceReading {
    /// Estimated distance to the nearest reflector in centimeters
    Cm(f32),
    /// No echo within the bounded wait
    NoEcho,
}

impl DistanceReading {
    pub fn cm(&self) -> Option<f32> {
        match self {
            DistanceReading::Cm(cm) => Some(*cm),
            DistanceReading::NoEcho => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_parse_formats() {
        let expected = Credential::from_bytes(&[0x03, 0x0C, 0x49, 0x16]);
        assert_eq!("030C4916".parse::<Credential>().unwrap(), expected);
        assert_eq!("03:0C:49:16".parse::<Credential>().unwrap(), expected);
        assert_eq!("03-0c-49-16".parse::<Credential>().unwrap(), expected);
        assert_eq!("03 0C 49 16".parse::<Credential>().unwrap(), expected);
    }

    #[test]
    fn test_credential_parse_rejects_bad_input() {
        assert!("030C49".parse::<Credential>().is_err()); // 3 bytes
        assert!("zz0C4916".parse::<Credential>().is_err());
        assert!("".parse::<Credential>().is_err());
    }

    #[test]
    fn test_credential_seven_byte_uid() {
        let uid = "04:A2:2B:9A:5C:61:80".parse::<Credential>().unwrap();
        assert_eq!(uid.len(), 7);
        assert_eq!(uid.to_hex(), "04:A2:2B:9A:5C:61:80");
    }

    #[test]
    fn test_gate_state_position() {
        assert_eq!(GateState::Closed.position(), GatePosition::Closed);
        assert_eq!(GateState::Open.position(), GatePosition::Open);
        assert_eq!(GateState::ClosingPending.position(), GatePosition::Open);
        assert_eq!(GateState::default(), GateState::Closed);
    }
}
