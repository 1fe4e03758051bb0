//! Firmware versions and the OTP minimum version (anti-rollback) ledger.
//!
//! The ledger is an append-only table of [`VERSION_LEDGER_ENTRIES`] slots.
//! Each slot holds a `{major, minor}` pair followed by its bitwise
//! complement. The current floor is the last slot that checks out and
//! is followed by an unwritten one.
use super::otp_map::{self, OtpMap, VERSION_LEDGER_ENTRIES, VERSION_LEDGER_ENTRY_SIZE};
use crate::{
    error::Error,
    hal::otp::Otp,
    utilities::bitwise::SliceBits,
};
use core::fmt;

/// Structured firmware version. Ordering is lexicographic on
/// `(major, minor)`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub struct FwVersion {
    pub major: u16,
    pub minor: u16,
}

impl FwVersion {
    /// Highest representable version. Used as the floor whenever the
    /// ledger cannot be trusted, so nothing passes the rollback check.
    pub const MAX: FwVersion = FwVersion { major: u16::MAX, minor: u16::MAX };

    pub const fn new(major: u16, minor: u16) -> Self { Self { major, minor } }

    pub fn from_le_bytes(bytes: [u8; 4]) -> Self {
        Self {
            major: u16::from_le_bytes([bytes[0], bytes[1]]),
            minor: u16::from_le_bytes([bytes[2], bytes[3]]),
        }
    }

    pub fn to_le_bytes(self) -> [u8; 4] {
        let [a, b] = self.major.to_le_bytes();
        let [c, d] = self.minor.to_le_bytes();
        [a, b, c, d]
    }

    /// Parses the `major.minor` prefix of a NUL padded version string such
    /// as `"1.12.3-rc"`. Anything after the minor number is ignored.
    ///
    /// Numbers follow `strtol` rules: leading whitespace and a sign are
    /// accepted, a missing number reads as zero, and the value is truncated
    /// to 16 bits. Returns `None` if the major number is not followed by `.`.
    pub fn parse(text: &[u8]) -> Option<Self> {
        let text = match text.iter().position(|&c| c == 0) {
            Some(end) => &text[..end],
            None => text,
        };
        let (major, rest) = parse_long(text);
        let rest = rest.strip_prefix(b".")?;
        let (minor, _) = parse_long(rest);
        Some(Self { major: major as u16, minor: minor as u16 })
    }
}

impl fmt::Display for FwVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Decimal `strtol`. Returns the value and the unparsed remainder, which
/// is the whole input when no digits were found.
fn parse_long(text: &[u8]) -> (i64, &[u8]) {
    let start = text.iter().position(|c| !matches!(c, b' ' | b'\t' | b'\n' | 0x0B | 0x0C | b'\r'));
    let Some(start) = start else { return (0, text) };
    let mut cursor = &text[start..];
    let negative = cursor.first() == Some(&b'-');
    if matches!(cursor.first(), Some(b'-' | b'+')) {
        cursor = &cursor[1..];
    }
    let digits = cursor.iter().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return (0, text);
    }
    let magnitude = cursor[..digits]
        .iter()
        .fold(0i64, |value, digit| value.saturating_mul(10).saturating_add(i64::from(digit - b'0')));
    (if negative { -magnitude } else { magnitude }, &cursor[digits..])
}

/// Outcome of scanning the minimum version ledger.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum LedgerReading {
    /// The latest committed floor.
    Valid(FwVersion),
    /// Nothing was ever written.
    Empty,
    /// Entries exist but none of them is a committed, intact record.
    Broken,
}

impl LedgerReading {
    /// Floor to enforce during validation. Fails closed when the ledger
    /// holds no trustworthy value.
    pub fn floor(self) -> FwVersion {
        match self {
            LedgerReading::Valid(version) => version,
            LedgerReading::Empty | LedgerReading::Broken => FwVersion::MAX,
        }
    }
}

/// Result of an attempt to raise the floor.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum Append {
    Written { slot: usize },
    /// The requested version does not exceed the current floor.
    Unchanged,
    /// Every slot is used. Not an error: the floor simply stays put.
    Full,
    /// The ledger is broken and cannot be extended safely.
    Refused,
}

/// Handle on the OTP ledger.
#[derive(Copy, Clone, Debug)]
pub struct VersionLedger {
    map: OtpMap,
}

type Entry = [u8; VERSION_LEDGER_ENTRY_SIZE];

fn decode(entry: &Entry) -> Option<FwVersion> {
    let (value, complement) = entry.split_at(4);
    value.is_complement_of(complement).then(|| {
        FwVersion::from_le_bytes([value[0], value[1], value[2], value[3]])
    })
}

fn encode(version: FwVersion) -> Entry {
    let value = version.to_le_bytes();
    let mut entry = [0u8; VERSION_LEDGER_ENTRY_SIZE];
    entry[..4].copy_from_slice(&value);
    entry[4..].iter_mut().zip(value).for_each(|(slot, byte)| *slot = !byte);
    entry
}

impl VersionLedger {
    pub fn new(map: OtpMap) -> Self { Self { map } }

    fn entry<O: Otp>(&self, otp: &mut O, index: usize) -> Result<Entry, Error> {
        let mut entry = [0u8; VERSION_LEDGER_ENTRY_SIZE];
        otp_map::read(otp, self.map.ledger_entry_address(index), &mut entry)?;
        Ok(entry)
    }

    /// Finds the current floor. Unreadable slots are treated as
    /// overwritten and skipped.
    pub fn read<O: Otp>(&self, otp: &mut O) -> LedgerReading {
        let mut scanned = 0;
        for index in 0..VERSION_LEDGER_ENTRIES {
            scanned = index;
            let Ok(entry) = self.entry(otp, index) else { continue };

            if let Some(version) = decode(&entry) {
                if index + 1 < VERSION_LEDGER_ENTRIES {
                    match self.entry(otp, index + 1) {
                        Err(_) => return LedgerReading::Broken,
                        Ok(next) if !next.is_blank() => continue,
                        Ok(_) => {}
                    }
                }
                return LedgerReading::Valid(version);
            }

            if entry.is_blank() {
                break;
            }
            scanned = index + 1;
        }

        if scanned == 0 {
            LedgerReading::Empty
        } else {
            LedgerReading::Broken
        }
    }

    /// Appends `version` if it raises the floor and a slot is free.
    pub fn append<O: Otp>(&self, otp: &mut O, version: FwVersion) -> Result<Append, Error> {
        match self.read(otp) {
            LedgerReading::Broken => return Ok(Append::Refused),
            LedgerReading::Valid(current) if version <= current => return Ok(Append::Unchanged),
            _ => {}
        }

        let free = (0..VERSION_LEDGER_ENTRIES)
            .find(|&index| matches!(self.entry(otp, index), Ok(entry) if entry.is_blank()));
        let Some(slot) = free else {
            trace!("Minimum version ledger is full");
            return Ok(Append::Full);
        };

        otp_map::write(otp, self.map.ledger_entry_address(slot), &encode(version))?;
        trace!("Minimum version raised to {}.{}", version.major, version.minor);
        Ok(Append::Written { slot })
    }
}
