use super::error::FakeError;
use crate::hal::flash::{Nvms, Partition, PartitionId};

pub const FAKE_SECTOR_SIZE: usize = 4096;

/// Vec backed partition with NOR flash semantics: writes can only clear
/// bits, erases set whole sectors back to `0xFF`.
#[derive(Clone, Debug)]
pub struct FakePartition {
    base: u32,
    data: Vec<u8>,
    fail_writes: bool,
}

impl FakePartition {
    pub fn new(base: u32, size: usize) -> Self {
        Self { base, data: vec![0xFF; size], fail_writes: false }
    }

    /// Partition pre-programmed with `contents` from offset 0.
    pub fn with_contents(base: u32, size: usize, contents: &[u8]) -> Self {
        let mut partition = Self::new(base, size);
        partition.data[..contents.len()].copy_from_slice(contents);
        partition
    }

    pub fn contents(&self) -> &[u8] { &self.data }

    /// Direct access that bypasses flash semantics, to simulate corruption.
    pub fn contents_mut(&mut self) -> &mut [u8] { &mut self.data }

    pub fn fail_writes(&mut self) { self.fail_writes = true; }

    fn check_range(&self, offset: usize, size: usize) -> nb::Result<(), FakeError> {
        match offset.checked_add(size) {
            Some(end) if end <= self.data.len() => Ok(()),
            _ => Err(nb::Error::Other(FakeError)),
        }
    }
}

impl Partition for FakePartition {
    type Error = FakeError;

    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> nb::Result<(), Self::Error> {
        self.check_range(offset, bytes.len())?;
        bytes.copy_from_slice(&self.data[offset..offset + bytes.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> nb::Result<(), Self::Error> {
        if self.fail_writes {
            return Err(nb::Error::Other(FakeError));
        }
        self.check_range(offset, bytes.len())?;
        self.data[offset..].iter_mut().zip(bytes).for_each(|(cell, byte)| *cell &= byte);
        Ok(())
    }

    fn erase_region(&mut self, offset: usize, size: usize) -> nb::Result<(), Self::Error> {
        if self.fail_writes {
            return Err(nb::Error::Other(FakeError));
        }
        let start = offset - offset % FAKE_SECTOR_SIZE;
        let end = (offset + size + FAKE_SECTOR_SIZE - 1) / FAKE_SECTOR_SIZE * FAKE_SECTOR_SIZE;
        let end = end.min(self.data.len());
        self.check_range(start, end.saturating_sub(start))?;
        self.data[start..end].iter_mut().for_each(|cell| *cell = 0xFF);
        Ok(())
    }

    fn map(&self, offset: usize, size: usize) -> &[u8] {
        let start = offset.min(self.data.len());
        let end = offset.saturating_add(size).min(self.data.len());
        &self.data[start..end]
    }

    fn base_address(&self) -> u32 { self.base }

    fn size(&self) -> usize { self.data.len() }
}

/// Partition table holding up to one fake partition per identifier.
#[derive(Default)]
pub struct FakeNvms {
    pub update: Option<FakePartition>,
    pub exec: Option<FakePartition>,
    pub header: Option<FakePartition>,
}

impl Nvms for FakeNvms {
    type Partition = FakePartition;

    fn open(&mut self, id: PartitionId) -> Option<Self::Partition> {
        match id {
            PartitionId::FirmwareUpdate => self.update.take(),
            PartitionId::FirmwareExec => self.exec.take(),
            PartitionId::ImageHeader => self.header.take(),
        }
    }
}
