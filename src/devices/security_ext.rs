//! Security extension parsing.
//!
//! The extension is a chain of `{type: u16, length: u16, value}` records
//! placed right after the image header:
//!
//! ```text
//! +------------------------------ security section (0x22AA) ----+
//! | public key id | mode | curve | hash | signature (0x33AA)     |
//! +-------------------------------------------------------------+
//! +---------------------- device administration (0x44AA) -------+
//! | fw version (0x66AA) | key revocation (0x55AA) | rollback ... |
//! +-------------------------------------------------------------+
//! 0xFF padding up to a 1024 byte boundary (header included)
//! ```
//!
//! Parsing never reads past the mapped extension: every record length is
//! checked against what is left of its enclosing buffer.
use super::{
    image::HEADER_SIZE,
    keys::KeyId,
    otp_map::{KeyKind, OtpMap, ASYMMETRIC_KEY_COUNT, SYMMETRIC_KEY_COUNT},
    version::FwVersion,
};
use crate::{
    error::{Convertible, Error},
    hal::{
        crypto::{Curve, HashMethod},
        flash::Partition,
    },
};
use zerocopy::{
    byteorder::little_endian::{U16, U32},
    AsBytes, FromBytes, FromZeroes, Unaligned,
};

/// Header plus extension are padded to a multiple of this.
pub const EXTENSION_ALIGNMENT: usize = 1024;
pub const SIGNATURE_MIN_SIZE: usize = 32;
pub const SIGNATURE_MAX_SIZE: usize = 64;
/// Upper bound on revocation entries kept from a single image.
pub const MAX_REVOCATIONS: usize = ASYMMETRIC_KEY_COUNT + SYMMETRIC_KEY_COUNT;

const REVOCATION_ENTRY_ID_SIZE: usize = 4;
const VERSION_RECORD_SIZE: usize = 4;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum ExtensionError {
    /// A record header or value runs past the end of its container.
    Truncated,
    /// A top-level or nested section has the wrong type.
    UnexpectedSection,
    SecuritySectionLength,
    SignatureLength,
    UnsupportedAlgorithm,
    KeyIdInvalid,
    MissingFirmwareVersion,
    /// A revocation entry announces a key type but the id is cut short.
    RevocationRecord,
}

impl Convertible for ExtensionError {
    fn into(self) -> Error { Error::SecurityExtensionInvalid }
}

/// Record type codes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Tag {
    SecuritySection,
    Signature,
    DeviceAdministration,
    KeyRevocation,
    FirmwareVersion,
    RollbackPrevention,
    Unknown(u16),
}

impl From<u16> for Tag {
    fn from(raw: u16) -> Self {
        match raw {
            0x22AA => Tag::SecuritySection,
            0x33AA => Tag::Signature,
            0x44AA => Tag::DeviceAdministration,
            0x55AA => Tag::KeyRevocation,
            0x66AA => Tag::FirmwareVersion,
            0x77AA => Tag::RollbackPrevention,
            other => Tag::Unknown(other),
        }
    }
}

impl From<Tag> for u16 {
    fn from(tag: Tag) -> Self {
        match tag {
            Tag::SecuritySection => 0x22AA,
            Tag::Signature => 0x33AA,
            Tag::DeviceAdministration => 0x44AA,
            Tag::KeyRevocation => 0x55AA,
            Tag::FirmwareVersion => 0x66AA,
            Tag::RollbackPrevention => 0x77AA,
            Tag::Unknown(other) => other,
        }
    }
}

#[derive(FromZeroes, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
struct RecordHeader {
    tag: U16,
    length: U16,
}

#[derive(FromZeroes, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
struct RawSecurityHeader {
    public_key_id: U32,
    mode: u8,
    curve: u8,
    hash: u8,
}

const RECORD_HEADER_SIZE: usize = core::mem::size_of::<RecordHeader>();
pub const SECURITY_HEADER_SIZE: usize = core::mem::size_of::<RawSecurityHeader>();

/// A single TLV record borrowed from the extension.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Record<'a> {
    tag: Tag,
    value: &'a [u8],
}

/// Splits the record at the front of `bytes` from whatever follows it.
fn split_record(bytes: &[u8]) -> Result<(Record<'_>, &[u8]), ExtensionError> {
    let header = RecordHeader::read_from_prefix(bytes).ok_or(ExtensionError::Truncated)?;
    let length = usize::from(header.length.get());
    let body = &bytes[RECORD_HEADER_SIZE..];
    if body.len() < length {
        return Err(ExtensionError::Truncated);
    }
    let (value, rest) = body.split_at(length);
    Ok((Record { tag: header.tag.get().into(), value }, rest))
}

/// Length in bytes of the two top-level sections at the start of `window`,
/// without padding.
pub fn extension_length(window: &[u8]) -> Option<usize> {
    let (_, rest) = split_record(window).ok()?;
    let (_, rest) = split_record(rest).ok()?;
    Some(window.len() - rest.len())
}

/// Extension length once padded so that header plus extension end on an
/// [`EXTENSION_ALIGNMENT`] boundary.
pub fn padded_length(length: usize) -> usize {
    let unaligned = (length + HEADER_SIZE) % EXTENSION_ALIGNMENT;
    if unaligned == 0 {
        length
    } else {
        length + EXTENSION_ALIGNMENT - unaligned
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum SignatureMode {
    Ecdsa,
    Eddsa,
}

/// Validated contents of the security section header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SecurityHeader {
    pub public_key_id: u32,
    pub mode: SignatureMode,
    pub curve: Curve,
    pub hash: HashMethod,
}

impl SecurityHeader {
    fn parse(bytes: &[u8], map: &OtpMap) -> Result<Self, ExtensionError> {
        let raw = RawSecurityHeader::read_from_prefix(bytes).ok_or(ExtensionError::Truncated)?;
        let mode = match raw.mode {
            1 => SignatureMode::Ecdsa,
            2 => SignatureMode::Eddsa,
            _ => return Err(ExtensionError::UnsupportedAlgorithm),
        };
        let curve = match raw.curve {
            1 => Curve::Secp192r1,
            2 => Curve::Secp224r1,
            3 => Curve::Secp256r1,
            4 => Curve::Edwards25519,
            _ => return Err(ExtensionError::UnsupportedAlgorithm),
        };
        let hash = match raw.hash {
            1 => HashMethod::Sha224,
            2 => HashMethod::Sha256,
            3 => HashMethod::Sha384,
            4 => HashMethod::Sha512,
            _ => return Err(ExtensionError::UnsupportedAlgorithm),
        };

        let supported = match mode {
            SignatureMode::Ecdsa => curve != Curve::Edwards25519,
            SignatureMode::Eddsa => curve == Curve::Edwards25519 && hash == HashMethod::Sha512,
        };
        if !supported {
            return Err(ExtensionError::UnsupportedAlgorithm);
        }

        let public_key_id = raw.public_key_id.get();
        map.key_address(KeyKind::Public, public_key_id).ok_or(ExtensionError::KeyIdInvalid)?;
        Ok(Self { public_key_id, mode, curve, hash })
    }
}

/// Parsed view over a mapped security extension.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SecurityExtension<'a> {
    raw: &'a [u8],
    header: SecurityHeader,
    signature: &'a [u8],
    device_administration: &'a [u8],
    fw_version: FwVersion,
    min_fw_version: Option<FwVersion>,
    revocations: [KeyId; MAX_REVOCATIONS],
    revocation_count: usize,
}

impl<'a> SecurityExtension<'a> {
    /// Locates and parses the extension starting at `offset` of `partition`.
    ///
    /// Its length is worked out from the first `sector_size - offset` mapped
    /// bytes, then the padded extension is mapped in one piece and parsed.
    pub fn read_from<P: Partition>(
        partition: &'a P,
        offset: usize,
        sector_size: usize,
        map: &OtpMap,
    ) -> Result<Self, ExtensionError> {
        let window_size = sector_size.checked_sub(offset).ok_or(ExtensionError::Truncated)?;
        let window = partition.map(offset, window_size);
        let length = extension_length(window).ok_or(ExtensionError::Truncated)?;
        let length = padded_length(length);
        let raw = partition.map(offset, length);
        if raw.len() != length {
            return Err(ExtensionError::Truncated);
        }
        Self::parse(raw, map)
    }

    /// Parses an extension blob, padding included.
    pub fn parse(raw: &'a [u8], map: &OtpMap) -> Result<Self, ExtensionError> {
        let (security, after_security) = split_record(raw)?;
        if security.tag != Tag::SecuritySection {
            return Err(ExtensionError::UnexpectedSection);
        }
        let (header, signature) = Self::parse_security_section(security.value, map)?;

        let (administration, _) = split_record(after_security)?;
        if administration.tag != Tag::DeviceAdministration {
            return Err(ExtensionError::UnexpectedSection);
        }

        let mut extension = Self {
            raw,
            header,
            signature,
            device_administration: after_security,
            fw_version: FwVersion::default(),
            min_fw_version: None,
            revocations: [KeyId { kind: KeyKind::Public, id: 0 }; MAX_REVOCATIONS],
            revocation_count: 0,
        };
        extension.parse_device_administration(administration.value)?;
        Ok(extension)
    }

    fn parse_security_section(
        value: &'a [u8],
        map: &OtpMap,
    ) -> Result<(SecurityHeader, &'a [u8]), ExtensionError> {
        if value.len() < SECURITY_HEADER_SIZE + RECORD_HEADER_SIZE {
            return Err(ExtensionError::SecuritySectionLength);
        }
        let (signature, _) = split_record(&value[SECURITY_HEADER_SIZE..])
            .map_err(|_| ExtensionError::SecuritySectionLength)?;
        if signature.tag != Tag::Signature {
            return Err(ExtensionError::UnexpectedSection);
        }
        if !(SIGNATURE_MIN_SIZE..=SIGNATURE_MAX_SIZE).contains(&signature.value.len()) {
            return Err(ExtensionError::SignatureLength);
        }
        let header = SecurityHeader::parse(value, map)?;
        Ok((header, signature.value))
    }

    fn parse_device_administration(&mut self, mut records: &'a [u8]) -> Result<(), ExtensionError> {
        let mut fw_version = None;
        let mut revocation = None;
        let mut rollback = None;

        while !records.is_empty() {
            let (record, rest) = split_record(records)?;
            match record.tag {
                Tag::FirmwareVersion => fw_version = Some(record.value),
                Tag::KeyRevocation => revocation = Some(record.value),
                Tag::RollbackPrevention => rollback = Some(record.value),
                _ => {}
            }
            records = rest;
        }

        self.fw_version = fw_version
            .and_then(read_version)
            .ok_or(ExtensionError::MissingFirmwareVersion)?;
        self.min_fw_version = rollback.and_then(read_version);
        if let Some(entries) = revocation {
            self.parse_revocations(entries)?;
        }
        Ok(())
    }

    fn parse_revocations(&mut self, mut entries: &[u8]) -> Result<(), ExtensionError> {
        while let Some((&tag, rest)) = entries.split_first() {
            if self.revocation_count == MAX_REVOCATIONS {
                break;
            }
            let Some(kind) = KeyKind::from_tag(tag) else {
                entries = rest;
                continue;
            };
            if rest.len() < REVOCATION_ENTRY_ID_SIZE {
                return Err(ExtensionError::RevocationRecord);
            }
            let (id, rest) = rest.split_at(REVOCATION_ENTRY_ID_SIZE);
            self.revocations[self.revocation_count] =
                KeyId { kind, id: u32::from_le_bytes([id[0], id[1], id[2], id[3]]) };
            self.revocation_count += 1;
            entries = rest;
        }
        Ok(())
    }

    /// Whole mapped extension, padding included.
    pub fn raw(&self) -> &'a [u8] { self.raw }

    pub fn header(&self) -> &SecurityHeader { &self.header }

    pub fn signature(&self) -> &'a [u8] { self.signature }

    /// Signed portion of the extension: from the device administration
    /// record to the end of the padding.
    pub fn device_administration(&self) -> &'a [u8] { self.device_administration }

    pub fn fw_version(&self) -> FwVersion { self.fw_version }

    /// Requested rollback floor, if the image carries one.
    pub fn min_fw_version(&self) -> Option<FwVersion> { self.min_fw_version }

    pub fn revocations(&self) -> &[KeyId] { &self.revocations[..self.revocation_count] }
}

fn read_version(value: &[u8]) -> Option<FwVersion> {
    (value.len() >= VERSION_RECORD_SIZE)
        .then(|| FwVersion::from_le_bytes([value[0], value[1], value[2], value[3]]))
}
