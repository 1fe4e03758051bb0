//! OTP memory layout and checked access helpers.
use crate::{
    error::Error,
    hal::otp::Otp,
};
use nb::block;

pub const ASYMMETRIC_KEY_COUNT: usize = 4;
pub const ASYMMETRIC_KEY_SIZE: usize = 64;
pub const SYMMETRIC_KEY_COUNT: usize = 8;
pub const SYMMETRIC_KEY_SIZE: usize = 32;
pub const KEY_MARKER_SIZE: usize = 8;
pub const VERSION_LEDGER_ENTRIES: usize = 64;
pub const VERSION_LEDGER_ENTRY_SIZE: usize = 8;
pub const SECURE_DEVICE_ENABLED: u8 = 0xAA;

/// Absolute addresses of every OTP region the loader touches.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OtpMap {
    /// Start of OTP, where the bootloader image itself lives.
    pub base: u32,
    pub asymmetric_keys: u32,
    pub inverse_asymmetric_keys: u32,
    pub symmetric_keys: u32,
    pub inverse_symmetric_keys: u32,
    pub asymmetric_key_markers: u32,
    pub symmetric_key_markers: u32,
    pub min_version_ledger: u32,
    pub secure_device: u32,
    /// Length of the bootloader image, in 32 bit words.
    pub bootloader_length: u32,
    pub bootloader_crc: u32,
}

/// Key containers stored in OTP. The discriminants match the type bytes
/// used by key revocation records.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum KeyKind {
    Public = 0xA4,
    Symmetric = 0xA5,
}

impl KeyKind {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0xA4 => Some(KeyKind::Public),
            0xA5 => Some(KeyKind::Symmetric),
            _ => None,
        }
    }

    pub fn count(self) -> usize {
        match self {
            KeyKind::Public => ASYMMETRIC_KEY_COUNT,
            KeyKind::Symmetric => SYMMETRIC_KEY_COUNT,
        }
    }

    /// Size in bytes of one key slot.
    pub fn slot_size(self) -> usize {
        match self {
            KeyKind::Public => ASYMMETRIC_KEY_SIZE,
            KeyKind::Symmetric => SYMMETRIC_KEY_SIZE,
        }
    }
}

impl OtpMap {
    pub fn key_area(&self, kind: KeyKind) -> u32 {
        match kind {
            KeyKind::Public => self.asymmetric_keys,
            KeyKind::Symmetric => self.symmetric_keys,
        }
    }

    pub fn inverse_key_area(&self, kind: KeyKind) -> u32 {
        match kind {
            KeyKind::Public => self.inverse_asymmetric_keys,
            KeyKind::Symmetric => self.inverse_symmetric_keys,
        }
    }

    pub fn marker_table(&self, kind: KeyKind) -> u32 {
        match kind {
            KeyKind::Public => self.asymmetric_key_markers,
            KeyKind::Symmetric => self.symmetric_key_markers,
        }
    }

    fn key_area_end(&self, kind: KeyKind) -> u32 {
        self.key_area(kind) + (kind.count() * kind.slot_size()) as u32
    }

    /// Resolves a key identifier, which is either an absolute address inside
    /// the key area or a slot index, into the address of the key.
    pub fn key_address(&self, kind: KeyKind, id: u32) -> Option<u32> {
        let area = self.key_area(kind);
        if (area..self.key_area_end(kind)).contains(&id) {
            Some(id)
        } else if (id as usize) < kind.count() {
            Some(area + id * kind.slot_size() as u32)
        } else {
            None
        }
    }

    /// Slot index of a resolved key address.
    pub fn key_index(&self, kind: KeyKind, address: u32) -> usize {
        (address.saturating_sub(self.key_area(kind)) as usize) / kind.slot_size()
    }

    /// Address of the bitwise inverse stored for the key at `address`.
    pub fn inverse_address(&self, kind: KeyKind, address: u32) -> u32 {
        self.inverse_key_area(kind) + address.saturating_sub(self.key_area(kind))
    }

    pub fn marker_address(&self, kind: KeyKind, index: usize) -> u32 {
        self.marker_table(kind) + (index * KEY_MARKER_SIZE) as u32
    }

    pub fn ledger_entry_address(&self, index: usize) -> u32 {
        self.min_version_ledger + (index * VERSION_LEDGER_ENTRY_SIZE) as u32
    }
}

pub(crate) fn read<O: Otp>(otp: &mut O, address: u32, bytes: &mut [u8]) -> Result<(), Error> {
    block!(otp.read(address, bytes)).map_err(|_| Error::OtpReadFailed)
}

pub(crate) fn write<O: Otp>(otp: &mut O, address: u32, bytes: &[u8]) -> Result<(), Error> {
    block!(otp.write(address, bytes)).map_err(|_| Error::OtpWriteFailed)
}
