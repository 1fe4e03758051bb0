//! Installing a validated update and the OTP bookkeeping that follows it.
use super::{validation::extension_version, Bootloader, RebootCause};
use crate::{
    devices::{
        failure::{FailureReason, FailureSource},
        image::{ImageHeader, HEADER_SIZE},
        otp_map::KeyKind,
        security_ext::{extension_length, SecurityExtension},
        traits::Storage,
        version::{Append, FwVersion, LedgerReading, VersionLedger},
    },
    error::Error,
    hal::{crypto::CryptoEngine, otp::Otp, rng::Entropy, system::System},
};
use nb::block;

/// Code is programmed into the exec partition in writes of this size.
pub const TRANSFER_BUFFER_SIZE: usize = 4096;

impl<P: Storage, O: Otp, E: CryptoEngine, R: Entropy, S: System> Bootloader<P, O, E, R, S> {
    /// Installs the validated update. On secure devices this also raises
    /// the rollback floor and revokes keys as the new image requests.
    ///
    /// Returns `Ok(false)` if the update could not be installed, or if
    /// the policy refused an update older than the installed image.
    pub(crate) fn device_administration(&mut self) -> Result<bool, RebootCause> {
        if self.secure {
            let offset = self.config.update_header_offset;
            let current =
                extension_version(self.header.as_ref().and_then(|header| self.extension_of(header, 0)));
            let update = extension_version(
                self.update.as_ref().and_then(|update| self.extension_of(update, offset)),
            );
            if update < current {
                trace_warn!("Update firmware version is lower than the installed one");
                if !self.report(FailureReason::UpdateLowerThanCurrent, FailureSource::UpdateImage)? {
                    return Ok(false);
                }
            }
        }

        if let Err(_error) = self.update_image() {
            trace_warn!("Failed to install the update: {}", _error);
            return Ok(false);
        }
        trace!("Update installed");

        if self.secure {
            self.administer_installed_image();
        }
        // A floor that cannot be raised or a key that cannot be revoked
        // does not undo the installation.
        Ok(true)
    }

    /// Moves the staged image into place: code to the exec partition,
    /// header and extension to the header partition. The staged header
    /// is invalidated last, so an interrupted copy is retried on the
    /// next boot.
    pub(crate) fn update_image(&mut self) -> Result<(), Error> {
        let offset = self.config.update_header_offset;
        let sector_size = self.config.sector_size;
        let secure = self.secure;
        let Self { update, exec, header, .. } = self;
        let update = update.as_mut().ok_or(Error::PartitionUnavailable)?;
        let exec = exec.as_mut().ok_or(Error::PartitionUnavailable)?;
        let header = header.as_mut().ok_or(Error::PartitionUnavailable)?;

        let image = ImageHeader::read(update, offset)?;
        {
            // Header and extension must fit in one sector.
            let window = update.map(offset, sector_size);
            if window.len() != sector_size {
                return Err(Error::ImageUnmapped);
            }
            let body = window.get(HEADER_SIZE..).unwrap_or(&[]);
            let length = extension_length(body).unwrap_or(0);
            if secure && length == 0 {
                return Err(Error::SecurityExtensionInvalid);
            }
            let extension = &body[..length];

            block!(header.erase_region(0, HEADER_SIZE + length))?;
            block!(exec.erase_region(0, image.code_size()))?;

            let code = update.map(offset + image.exec_location(), image.code_size());
            if code.len() != image.code_size() {
                return Err(Error::ImageUnmapped);
            }
            for (index, chunk) in code.chunks(TRANSFER_BUFFER_SIZE).enumerate() {
                block!(exec.write(index * TRANSFER_BUFFER_SIZE, chunk))?;
            }

            image.with_exec_location(0).write(header, 0)?;
            if !extension.is_empty() {
                block!(header.write(HEADER_SIZE, extension))?;
            }
        }
        image.invalidated().write(update, offset)
    }

    /// Applies the rollback record and key revocations of the image that
    /// was just installed, read back from the header partition.
    fn administer_installed_image(&mut self) {
        let Self { header, otp, map, keys, ledger, config, .. } = self;
        let Some(header) = header.as_ref() else {
            return;
        };
        let Ok(extension) = SecurityExtension::read_from(header, HEADER_SIZE, config.sector_size, map)
        else {
            trace_warn!("Installed security extension is invalid");
            return;
        };

        update_min_version(ledger, otp, &extension);
        let key_in_use = map.key_address(KeyKind::Public, extension.header().public_key_id);
        keys.revoke_keys(otp, extension.revocations(), key_in_use);
    }

    /// Seeds an empty ledger from the installed image. See
    /// [`Self::first_min_version`] for where the value comes from.
    pub(crate) fn write_first_min_version(&mut self) {
        if self.ledger.read(&mut self.otp) != LedgerReading::Empty {
            return;
        }
        let version = self.first_min_version();
        match self.ledger.append(&mut self.otp, version) {
            Ok(Append::Written { .. }) => trace!("Minimum version ledger seeded"),
            Ok(_) => {}
            Err(_) => trace_warn!("Failed to seed the minimum version ledger"),
        }
    }

    /// The installed image's rollback record, else its firmware version,
    /// else its parsed version string, else `0.0`.
    fn first_min_version(&mut self) -> FwVersion {
        let Some(header) = self.header.as_mut() else {
            return FwVersion::default();
        };
        let Ok(image) = ImageHeader::read(header, 0) else {
            return FwVersion::default();
        };
        let header: &P = header;
        match SecurityExtension::read_from(header, HEADER_SIZE, self.config.sector_size, &self.map) {
            Ok(extension) => extension.min_fw_version().unwrap_or(extension.fw_version()),
            Err(_) => image.version().unwrap_or_default(),
        }
    }
}

/// Raises the floor to the extension's rollback record, if it has one
/// that does not exceed the image's own version.
///
/// An empty ledger reads as the highest possible floor, so it is left
/// alone here. Only [`Bootloader::write_first_min_version`] writes the
/// first entry.
fn update_min_version<O: Otp>(ledger: &VersionLedger, otp: &mut O, extension: &SecurityExtension<'_>) {
    let Some(min_version) = extension.min_fw_version() else {
        return;
    };
    if min_version > extension.fw_version() {
        trace_warn!("Requested minimum version is greater than the image version");
        return;
    }
    if ledger.read(otp) == LedgerReading::Empty {
        trace_warn!("Minimum version ledger is empty, not raising the floor");
        return;
    }
    match ledger.append(otp, min_version) {
        Ok(Append::Written { .. }) | Ok(Append::Unchanged) => {}
        Ok(Append::Full) => trace_warn!("Minimum version ledger is full"),
        Ok(Append::Refused) => trace_warn!("Minimum version ledger cannot be read"),
        Err(_) => trace_warn!("Failed to raise the minimum version"),
    }
}
