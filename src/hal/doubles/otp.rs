use super::error::FakeError;
use crate::hal::otp::{Otp, WORD_SIZE};
use core::ops::Range;

/// OTP image: bits start cleared and programming can only set them.
/// Address ranges can be marked unreadable to emulate cells whose
/// readback is unreliable.
#[derive(Clone, Debug)]
pub struct FakeOtp {
    base: u32,
    cells: Vec<u8>,
    unreadable: Vec<Range<u32>>,
    writes: usize,
}

impl FakeOtp {
    pub fn new(base: u32, size: usize) -> Self {
        Self { base, cells: vec![0; size], unreadable: Vec::new(), writes: 0 }
    }

    /// Programs bytes directly, bypassing alignment rules. Still only sets bits.
    pub fn burn(&mut self, address: u32, bytes: &[u8]) {
        let offset = (address - self.base) as usize;
        self.cells[offset..offset + bytes.len()]
            .iter_mut()
            .zip(bytes)
            .for_each(|(cell, byte)| *cell |= byte);
    }

    pub fn peek(&self, address: u32, size: usize) -> &[u8] {
        let offset = (address - self.base) as usize;
        &self.cells[offset..offset + size]
    }

    pub fn make_unreadable(&mut self, range: Range<u32>) { self.unreadable.push(range); }

    /// Number of successful programming operations so far.
    pub fn write_count(&self) -> usize { self.writes }

    fn offset_of(&self, address: u32, size: usize) -> Result<usize, FakeError> {
        let offset = address.checked_sub(self.base).ok_or(FakeError)? as usize;
        match offset.checked_add(size) {
            Some(end) if end <= self.cells.len() => Ok(offset),
            _ => Err(FakeError),
        }
    }
}

impl Otp for FakeOtp {
    type Error = FakeError;

    fn read(&mut self, address: u32, bytes: &mut [u8]) -> nb::Result<(), Self::Error> {
        let offset = self.offset_of(address, bytes.len())?;
        let end = address + bytes.len() as u32;
        if self.unreadable.iter().any(|range| range.start < end && address < range.end) {
            return Err(nb::Error::Other(FakeError));
        }
        bytes.copy_from_slice(&self.cells[offset..offset + bytes.len()]);
        Ok(())
    }

    fn write(&mut self, address: u32, bytes: &[u8]) -> nb::Result<(), Self::Error> {
        if address as usize % WORD_SIZE != 0 || bytes.len() % WORD_SIZE != 0 {
            return Err(nb::Error::Other(FakeError));
        }
        self.offset_of(address, bytes.len())?;
        self.burn(address, bytes);
        self.writes += 1;
        Ok(())
    }
}
