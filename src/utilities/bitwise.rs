//! Convenience bitwise operations.

/// Simple check for particular bits being set or cleared.
pub trait BitFlags {
    fn is_set(&self, bit: u8) -> bool;
    fn is_clear(&self, bit: u8) -> bool;
}

/// Blanket implementation for any types convertible to u32.
impl<U: Copy + Into<u32>> BitFlags for U {
    fn is_set(&self, bit: u8) -> bool {
        assert!(bit < 32);
        ((*self).into() & (1u32 << bit)) != 0
    }

    fn is_clear(&self, bit: u8) -> bool { !self.is_set(bit) }
}

/// Whole-slice bit patterns used by OTP and flash records.
pub trait SliceBits {
    /// Every bit is zero (unprogrammed OTP).
    fn is_blank(&self) -> bool;
    /// Every bit is one (erased flash, poisoned OTP).
    fn is_saturated(&self) -> bool;
    /// Each byte is the bitwise inverse of the byte at the same position in `other`.
    fn is_complement_of(&self, other: &[u8]) -> bool;
}

impl SliceBits for [u8] {
    fn is_blank(&self) -> bool { self.iter().all(|&b| b == 0) }

    fn is_saturated(&self) -> bool { self.iter().all(|&b| b == 0xFF) }

    fn is_complement_of(&self, other: &[u8]) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a ^ b == 0xFF)
    }
}
