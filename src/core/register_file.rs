//! Hardware register file tracking.
//!
//! The a2xx register file is 64 registers of four 32-bit lanes each. The allocator
//! places each component of a value in one lane, so occupancy is tracked per lane in
//! a 256-bit mask. The scheduler snapshots the mask after every issue slot; the
//! scalar filler search reads those snapshots to find lanes that stayed free.

use thiserror::Error;

use crate::a2xx::MAX_GPRS;

/// Number of lanes per register.
pub const LANES_PER_REG: usize = 4;

/// Lane value marking a component that was never given storage.
pub const LANE_UNUSED: u8 = 7;

/// Bit set of occupied lanes, four bits per register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct RegState {
    words: [u32; MAX_GPRS * LANES_PER_REG / 32],
}

impl RegState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Occupied lanes of `slot` as a 4-bit mask.
    pub fn mask(&self, slot: u8) -> u8 {
        let bit = slot as usize * LANES_PER_REG;
        ((self.words[bit / 32] >> (bit % 32)) & 0xf) as u8
    }

    /// Free lanes of `slot` as a 4-bit mask.
    pub fn free_mask(&self, slot: u8) -> u8 {
        !self.mask(slot) & 0xf
    }

    pub fn contains(&self, slot: u8, lane: u8) -> bool {
        self.mask(slot) & (1 << lane) != 0
    }

    pub fn set(&mut self, slot: u8, lane: u8) {
        let bit = slot as usize * LANES_PER_REG + lane as usize;
        self.words[bit / 32] |= 1 << (bit % 32);
    }

    pub fn clear(&mut self, slot: u8, lane: u8) {
        let bit = slot as usize * LANES_PER_REG + lane as usize;
        self.words[bit / 32] &= !(1 << (bit % 32));
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Number of occupied lanes across the file.
    pub fn count(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }
}

/// Error types for register file operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegAllocError {
    #[error("no free register slot")]
    Exhausted,
    #[error("lane {lane} of R{slot} is already occupied")]
    LaneOccupied { slot: u8, lane: u8 },
    #[error("lane {lane} of R{slot} is not allocated")]
    LaneNotAllocated { slot: u8, lane: u8 },
    #[error("invalid register R{slot}.{lane}")]
    InvalidRegister { slot: u8, lane: u8 },
}

/// Register file owned by one compilation.
#[derive(Debug, Clone, Default)]
pub struct RegisterFile {
    state: RegState,
    max_slot: Option<u8>,
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &RegState {
        &self.state
    }

    /// Highest register slot ever touched.
    pub fn max_slot(&self) -> Option<u8> {
        self.max_slot
    }

    /// First register with no occupied lane.
    pub fn find_empty_slot(&self) -> Result<u8, RegAllocError> {
        (0..MAX_GPRS as u8)
            .find(|slot| self.state.mask(*slot) == 0)
            .ok_or(RegAllocError::Exhausted)
    }

    fn check(slot: u8, lane: u8) -> Result<(), RegAllocError> {
        if slot as usize >= MAX_GPRS || lane as usize >= LANES_PER_REG {
            return Err(RegAllocError::InvalidRegister { slot, lane });
        }
        Ok(())
    }

    pub fn claim(&mut self, slot: u8, lane: u8) -> Result<(), RegAllocError> {
        Self::check(slot, lane)?;
        if self.state.contains(slot, lane) {
            return Err(RegAllocError::LaneOccupied { slot, lane });
        }
        self.state.set(slot, lane);
        self.note_slot(slot);
        Ok(())
    }

    pub fn release(&mut self, slot: u8, lane: u8) -> Result<(), RegAllocError> {
        Self::check(slot, lane)?;
        if !self.state.contains(slot, lane) {
            return Err(RegAllocError::LaneNotAllocated { slot, lane });
        }
        self.state.clear(slot, lane);
        Ok(())
    }

    /// Record a slot as used without occupying a lane.
    pub fn note_slot(&mut self, slot: u8) {
        self.max_slot = Some(self.max_slot.map_or(slot, |max| max.max(slot)));
    }

    pub fn snapshot(&self) -> RegState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reg_state_masks() {
        let mut state = RegState::new();
        assert!(state.is_empty());
        state.set(0, 0);
        state.set(7, 3);
        state.set(63, 1);
        assert_eq!(state.mask(0), 0b0001);
        assert_eq!(state.mask(7), 0b1000);
        assert_eq!(state.mask(63), 0b0010);
        assert_eq!(state.free_mask(63), 0b1101);
        assert_eq!(state.count(), 3);
        state.clear(7, 3);
        assert_eq!(state.mask(7), 0);
    }

    #[test]
    fn test_register_file_claim_release() {
        let mut file = RegisterFile::new();
        assert_eq!(file.find_empty_slot(), Ok(0));
        file.claim(0, 2).unwrap();
        assert_eq!(file.find_empty_slot(), Ok(1));
        assert_eq!(
            file.claim(0, 2),
            Err(RegAllocError::LaneOccupied { slot: 0, lane: 2 })
        );
        file.release(0, 2).unwrap();
        assert_eq!(
            file.release(0, 2),
            Err(RegAllocError::LaneNotAllocated { slot: 0, lane: 2 })
        );
        assert_eq!(file.max_slot(), Some(0));
    }

    #[test]
    fn test_register_file_exhaustion() {
        let mut file = RegisterFile::new();
        for slot in 0..MAX_GPRS as u8 {
            file.claim(slot, 0).unwrap();
        }
        assert_eq!(file.find_empty_slot(), Err(RegAllocError::Exhausted));
        assert_eq!(file.max_slot(), Some(63));
    }

    #[test]
    fn test_invalid_register() {
        let mut file = RegisterFile::new();
        assert!(matches!(
            file.claim(64, 0),
            Err(RegAllocError::InvalidRegister { .. })
        ));
        assert!(matches!(
            file.claim(0, LANE_UNUSED),
            Err(RegAllocError::InvalidRegister { .. })
        ));
    }
}
