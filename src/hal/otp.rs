//! One time programmable memory.
use core::fmt;

/// Size in bytes of a single OTP programming unit.
pub const WORD_SIZE: usize = 4;

/// Absolute-address access to OTP memory.
///
/// Writes may only set bits. Implementations must reject accesses that
/// are not aligned to, or a multiple of, [`WORD_SIZE`] with an error
/// instead of silently widening them.
pub trait Otp {
    type Error: Clone + Copy + fmt::Debug;
    fn read(&mut self, address: u32, bytes: &mut [u8]) -> nb::Result<(), Self::Error>;
    fn write(&mut self, address: u32, bytes: &[u8]) -> nb::Result<(), Self::Error>;
}
