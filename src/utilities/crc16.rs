//! Bitwise CRC-16 (CCITT polynomial) used for the bootloader self check.
//!
//! This is the "shift the message into the register" form of the
//! algorithm: no implicit augmentation with sixteen zero bits, and no
//! final XOR. The factory tooling stores this value in OTP next to the
//! bootloader length.

const POLYNOMIAL: u16 = 0x1021;
const SEED: u16 = 0xFFFF;

/// Running CRC-16 over an arbitrary number of chunks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Crc16 {
    register: u16,
}

impl Default for Crc16 {
    fn default() -> Self { Self::new() }
}

impl Crc16 {
    pub fn new() -> Self { Self { register: SEED } }

    pub fn update(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            for bit in (0..8).rev() {
                let carry = self.register & 0x8000 != 0;
                self.register = (self.register << 1) | u16::from((byte >> bit) & 1);
                if carry {
                    self.register ^= POLYNOMIAL;
                }
            }
        }
    }

    pub fn value(&self) -> u16 { self.register }
}

/// One-shot helper over a single contiguous buffer.
pub fn checksum(bytes: &[u8]) -> u16 {
    let mut crc = Crc16::new();
    crc.update(bytes);
    crc.value()
}
