//! Per-cycle occupancy model
//!
//! A snapshot is rebuilt from fresh sensor reads every cycle and never
//! mutated afterwards; there is no history across cycles.

use serde::Serialize;
use smallvec::SmallVec;

/// One sensed parking spot as classified this cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Spot {
    pub index: usize,
    /// Raw sensor-native value, `None` when the channel could not be read
    pub raw: Option<u16>,
    pub threshold: u16,
    pub free: bool,
    /// Reading was missing or out of range; spot reported occupied
    pub fault: bool,
}

/// Immutable occupancy vector plus derived availability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupancySnapshot {
    spots: SmallVec<[Spot; 8]>,
    available: usize,
}

impl OccupancySnapshot {
    pub fn new(spots: impl IntoIterator<Item = Spot>) -> Self {
        let spots: SmallVec<[Spot; 8]> = spots.into_iter().collect();
        let available = spots.iter().filter(|s| s.free).count();
        Self { spots, available }
    }

    pub fn spots(&self) -> &[Spot] {
        &self.spots
    }

    pub fn available_count(&self) -> usize {
        self.available
    }

    pub fn total(&self) -> usize {
        self.spots.len()
    }

    pub fn free_flags(&self) -> SmallVec<[bool; 8]> {
        self.spots.iter().map(|s| s.free).collect()
    }

    pub fn fault_count(&self) -> usize {
        self.spots.iter().filter(|s| s.fault).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spot(index: usize, free: bool) -> Spot {
        Spot { index, raw: Some(0), threshold: 100, free, fault: false }
    }

    #[test]
    fn test_available_matches_free_count() {
        let snapshot = OccupancySnapshot::new([spot(0, true), spot(1, false), spot(2, true)]);
        assert_eq!(snapshot.available_count(), 2);
        assert_eq!(snapshot.total(), 3);
        assert_eq!(snapshot.free_flags().as_slice(), &[true, false, true]);
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = OccupancySnapshot::new([]);
        assert_eq!(snapshot.available_count(), 0);
        assert_eq!(snapshot.total(), 0);
    }
}
