//! Partition scoped, memory mapped flash storage.
use core::fmt;

/// Partitions the loader knows about.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum PartitionId {
    /// Staging area for new images, same layout as a full exec image
    /// plus its header and security extension.
    FirmwareUpdate,
    /// Currently installed executable, code only, starting at offset 0.
    FirmwareExec,
    /// Header and security extension of the installed executable.
    ImageHeader,
}

/// Byte addressable storage scoped to a single partition. All offsets
/// are relative to the start of the partition.
pub trait Partition {
    type Error: Clone + Copy + fmt::Debug;

    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> nb::Result<(), Self::Error>;

    /// Programs bytes without erasing first. Like NOR flash, a write
    /// can only clear bits.
    fn write(&mut self, offset: usize, bytes: &[u8]) -> nb::Result<(), Self::Error>;

    /// Erases every sector touched by `[offset, offset + size)`.
    fn erase_region(&mut self, offset: usize, size: usize) -> nb::Result<(), Self::Error>;

    /// Zero-copy view into the memory mapped partition. The returned slice
    /// is shorter than `size` when the request runs past the partition end.
    fn map(&self, offset: usize, size: usize) -> &[u8];

    /// Address at which offset 0 of this partition appears in the CPU
    /// address space.
    fn base_address(&self) -> u32;

    fn size(&self) -> usize;
}

/// Partition table.
pub trait Nvms {
    type Partition: Partition;
    fn open(&mut self, id: PartitionId) -> Option<Self::Partition>;
}
