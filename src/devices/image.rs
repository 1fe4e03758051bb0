//! SUOTA 1.1 image header.
//!
//! Every image, staged or installed, starts with this fixed 36 byte
//! little endian header. On secure devices it is immediately followed by
//! the [security extension](super::security_ext).
use super::version::FwVersion;
use crate::{
    error::Error,
    hal::flash::Partition,
};
use crc::{Crc, CRC_32_ISO_HDLC};
use nb::block;
use static_assertions::assert_eq_size;
use zerocopy::{
    byteorder::little_endian::{U16, U32},
    AsBytes, FromBytes, FromZeroes, Unaligned,
};

pub const HEADER_SIZE: usize = 36;
pub const IMAGE_MAGIC: [u8; 2] = [0x70, 0x61];
pub const PRODUCT_HEADER_MAGIC: [u8; 2] = [0x70, 0x62];
pub const VERSION_STRING_SIZE: usize = 16;
/// Bytes of the interrupt vector table copied to address 0 on boot.
pub const VECTOR_TABLE_SIZE: usize = 256;

/// Same parameters `mkimage` uses for the header CRC.
const IMAGE_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Header flag bits.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub struct ImageFlags(pub u16);

impl ImageFlags {
    pub const FORCE_CRC: u16 = 0x01;
    pub const VALID: u16 = 0x02;
    pub const RETRY1: u16 = 0x04;
    pub const RETRY2: u16 = 0x08;

    pub fn contains(self, flags: u16) -> bool { self.0 & flags == flags }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromZeroes, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub struct ImageHeader {
    signature: [u8; 2],
    flags: U16,
    code_size: U32,
    crc: U32,
    version: [u8; VERSION_STRING_SIZE],
    timestamp: U32,
    exec_location: U32,
}

assert_eq_size!(ImageHeader, [u8; HEADER_SIZE]);

impl ImageHeader {
    /// Builds a valid header describing `code`, which is expected at
    /// `exec_location` bytes into the image partition.
    pub fn describing(code: &[u8], version: &str, timestamp: u32, exec_location: u32) -> Self {
        let mut version_field = [0u8; VERSION_STRING_SIZE];
        let length = version.len().min(VERSION_STRING_SIZE);
        version_field[..length].copy_from_slice(&version.as_bytes()[..length]);
        Self {
            signature: IMAGE_MAGIC,
            flags: ImageFlags::VALID.into(),
            code_size: (code.len() as u32).into(),
            crc: IMAGE_CRC.checksum(code).into(),
            version: version_field,
            timestamp: timestamp.into(),
            exec_location: exec_location.into(),
        }
    }

    /// Reads the header stored at `offset` of `partition`.
    pub fn read<P: Partition>(partition: &mut P, offset: usize) -> Result<Self, Error>
    where
        Error: From<P::Error>,
    {
        let mut bytes = [0u8; HEADER_SIZE];
        block!(partition.read(offset, &mut bytes))?;
        Self::read_from(&bytes[..]).ok_or(Error::HeaderInvalid)
    }

    pub fn write<P: Partition>(&self, partition: &mut P, offset: usize) -> Result<(), Error>
    where
        Error: From<P::Error>,
    {
        Ok(block!(partition.write(offset, self.as_bytes()))?)
    }

    /// A header is ready when it carries the image magic and its VALID
    /// flag. An erased header is never ready.
    pub fn is_ready(&self) -> bool {
        self.flags().contains(ImageFlags::VALID) && self.signature == IMAGE_MAGIC
    }

    /// Whether the header was already invalidated by [`Self::invalidated`].
    pub fn is_invalidated(&self) -> bool {
        self.signature == [0, 0] && !self.flags().contains(ImageFlags::VALID)
    }

    /// Copy of this header that will never be considered ready again.
    /// Only clears bits, so it can be written over the original in place.
    pub fn invalidated(mut self) -> Self {
        self.flags.set(self.flags.get() & !ImageFlags::VALID);
        self.signature = [0, 0];
        self
    }

    pub fn with_exec_location(mut self, exec_location: u32) -> Self {
        self.exec_location.set(exec_location);
        self
    }

    pub fn with_flags(mut self, flags: ImageFlags) -> Self {
        self.flags.set(flags.0);
        self
    }

    pub fn flags(&self) -> ImageFlags { ImageFlags(self.flags.get()) }
    pub fn code_size(&self) -> usize { self.code_size.get() as usize }
    pub fn crc(&self) -> u32 { self.crc.get() }
    pub fn exec_location(&self) -> usize { self.exec_location.get() as usize }

    /// Version string, without its NUL padding.
    pub fn version_string(&self) -> &[u8] {
        let end = self.version.iter().position(|&c| c == 0).unwrap_or(VERSION_STRING_SIZE);
        &self.version[..end]
    }

    /// `major.minor` parsed out of the version string.
    pub fn version(&self) -> Option<FwVersion> { FwVersion::parse(&self.version) }

    pub fn crc_matches(&self, code: &[u8]) -> bool { IMAGE_CRC.checksum(code) == self.crc() }
}

/// Reset vector sanity check over a mapped vector table. The reset
/// handler must lie at or after the image itself and be a Thumb address.
pub fn vector_table_is_sane(vector_table: &[u8], image_address: u32) -> bool {
    let Some(reset_vector) = vector_table.get(4..8) else {
        return false;
    };
    let reset_vector = u32::from_le_bytes([reset_vector[0], reset_vector[1], reset_vector[2], reset_vector[3]]);
    reset_vector >= image_address && reset_vector & 1 == 1
}
