//! Image validation, shared by the staged update and the installed image.
//!
//! Checks run in a fixed order and each failure is handed to the failure
//! policy before the next check starts, so an `Abort` skips the rest of
//! the work and a repairing action is visible to the checks after it.
use super::{Bootloader, CrcPolicy, RebootCause};
use crate::{
    devices::{
        failure::{FailureReason, FailureSource},
        image::{ImageFlags, ImageHeader, HEADER_SIZE},
        keys::PublicKey,
        otp_map::KeyKind,
        security_ext::SecurityExtension,
        signature::verify_signature,
        traits::Storage,
        version::{FwVersion, LedgerReading},
    },
    hal::{crypto::CryptoEngine, otp::Otp, rng::Entropy, system::System},
};

/// Which image a validation pass looks at.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum Target {
    /// Header, extension and code all live in the update partition.
    Update,
    /// Header and extension in the header partition, code in the exec one.
    Exec,
}

impl Target {
    fn source(self) -> FailureSource {
        match self {
            Target::Update => FailureSource::UpdateImage,
            Target::Exec => FailureSource::ExecImage,
        }
    }
}

impl<P: Storage, O: Otp, E: CryptoEngine, R: Entropy, S: System> Bootloader<P, O, E, R, S> {
    pub(crate) fn validate_update(&mut self) -> Result<bool, RebootCause> {
        self.validate(Target::Update)
    }

    pub(crate) fn validate_exec(&mut self) -> Result<bool, RebootCause> {
        self.validate(Target::Exec)
    }

    /// Validates `target`, reporting every failed check to the policy as
    /// it happens. `Ok(true)` means the image may be used.
    pub(crate) fn validate(&mut self, target: Target) -> Result<bool, RebootCause> {
        let source = target.source();
        let Some(image) = self.image_header(target) else {
            return Ok(false);
        };

        if !self.check(image.is_ready(), FailureReason::InvalidImageSignature, source)? {
            return Ok(false);
        }

        let Some(crc_matches) = self.code_crc_matches(target, &image) else {
            trace_warn!("{} image code could not be mapped", target);
            return Ok(false);
        };
        if !self.check(crc_matches, FailureReason::CrcMismatch, source)? {
            return Ok(false);
        }

        if !self.secure {
            return Ok(true);
        }

        let fw_version = self.extension_fw_version(target);
        if !self.check(fw_version.is_some(), FailureReason::SecurityExtensionInvalid, source)? {
            return Ok(false);
        }

        let public_key = self.root_key(target);
        if !self.check(public_key.is_some(), FailureReason::InvalidRootKey, source)? {
            return Ok(false);
        }

        let signature_valid = self.signature_valid(target, &image, public_key.as_ref());
        if !self.check(signature_valid, FailureReason::ImageSignature, source)? {
            return Ok(false);
        }

        let fw_version = fw_version.unwrap_or_default();
        let versions_match = image.version() == Some(fw_version);
        if !self.check(versions_match, FailureReason::FwVersionMismatch, source)? {
            return Ok(false);
        }

        let reading = self.ledger.read(&mut self.otp);
        if !self.check(reading != LedgerReading::Broken, FailureReason::VersionArrayBroken, source)? {
            return Ok(false);
        }

        let recent_enough = fw_version >= reading.floor();
        self.check(recent_enough, FailureReason::FwVersionTooLow, source)
    }

    /// Hands `reason` to the policy when a check did not pass. `Ok(false)`
    /// means validation stops here.
    fn check(
        &mut self,
        passed: bool,
        reason: FailureReason,
        source: FailureSource,
    ) -> Result<bool, RebootCause> {
        if passed {
            return Ok(true);
        }
        trace_warn!("{} check failed", reason);
        self.report(reason, source)
    }

    /// Partition and offset holding the header and extension of `target`.
    fn header_partition(&self, target: Target) -> (Option<&P>, usize) {
        match target {
            Target::Update => (self.update.as_ref(), self.config.update_header_offset),
            Target::Exec => (self.header.as_ref(), 0),
        }
    }

    /// A missing partition or an unreadable header fails validation
    /// without consulting the policy.
    fn image_header(&mut self, target: Target) -> Option<ImageHeader> {
        let (partition, offset) = match target {
            Target::Update => (self.update.as_mut(), self.config.update_header_offset),
            Target::Exec => (self.header.as_mut(), 0),
        };
        let Some(partition) = partition else {
            trace_warn!("Image partition for {} is missing", target);
            return None;
        };
        ImageHeader::read(partition, offset).ok()
    }

    /// Code of `target` as described by `image`, or `None` if it cannot be
    /// mapped in full.
    fn code(&self, target: Target, image: &ImageHeader) -> Option<&[u8]> {
        let (partition, offset) = match target {
            Target::Update => {
                (self.update.as_ref(), self.config.update_header_offset + image.exec_location())
            }
            Target::Exec => (self.exec.as_ref(), 0),
        };
        let code = partition?.map(offset, image.code_size());
        (code.len() == image.code_size()).then_some(code)
    }

    fn code_crc_matches(&self, target: Target, image: &ImageHeader) -> Option<bool> {
        let code = self.code(target, image)?;
        let crc_required = match self.config.crc_policy {
            CrcPolicy::Always => true,
            CrcPolicy::HonourForceFlag => {
                target == Target::Update
                    || self.secure
                    || image.flags().contains(ImageFlags::FORCE_CRC)
            }
        };
        Some(!crc_required || image.crc_matches(code))
    }

    fn extension(&self, target: Target) -> Option<SecurityExtension<'_>> {
        let (partition, offset) = self.header_partition(target);
        SecurityExtension::read_from(partition?, offset + HEADER_SIZE, self.config.sector_size, &self.map)
            .ok()
    }

    fn extension_fw_version(&self, target: Target) -> Option<FwVersion> {
        self.extension(target).map(|extension| extension.fw_version())
    }

    /// The root key the extension of `target` names, if it is valid.
    fn root_key(&mut self, target: Target) -> Option<PublicKey> {
        let Self { update, header, otp, map, keys, config, .. } = self;
        let (partition, offset) = match target {
            Target::Update => (update.as_ref(), config.update_header_offset),
            Target::Exec => (header.as_ref(), 0),
        };
        let extension =
            SecurityExtension::read_from(partition?, offset + HEADER_SIZE, config.sector_size, map).ok()?;
        let address = map.key_address(KeyKind::Public, extension.header().public_key_id)?;
        keys.read_public_key(otp, address)
    }

    fn signature_valid(&mut self, target: Target, image: &ImageHeader, public_key: Option<&PublicKey>) -> bool {
        let Some(public_key) = public_key else {
            return false;
        };
        let Self { update, exec, header, engine, map, config, .. } = self;
        let header_offset = config.update_header_offset;
        let (header_partition, offset, code_partition, code_offset) = match target {
            Target::Update => {
                (update.as_ref(), header_offset, update.as_ref(), header_offset + image.exec_location())
            }
            Target::Exec => (header.as_ref(), 0, exec.as_ref(), 0),
        };
        let (Some(header_partition), Some(code_partition)) = (header_partition, code_partition) else {
            return false;
        };
        let Ok(extension) =
            SecurityExtension::read_from(header_partition, offset + HEADER_SIZE, config.sector_size, map)
        else {
            return false;
        };
        let code = code_partition.map(code_offset, image.code_size());
        verify_signature(
            engine,
            extension.header(),
            public_key.as_bytes(),
            extension.device_administration(),
            code,
            extension.signature(),
        )
    }
}

/// Installed firmware version, or `0.0` when the extension cannot be parsed.
pub(crate) fn extension_version(extension: Option<SecurityExtension<'_>>) -> FwVersion {
    extension.map(|extension| extension.fw_version()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{
        doubles::{staged, CountingCrypto, Device, ImageBuilder, Provisioning, SigningKey},
        failure::{default_policy, Action},
        version::FwVersion,
    };
    use std::{cell::RefCell, vec::Vec};

    thread_local! {
        static REPORTED: RefCell<Vec<FailureReason>> = RefCell::new(Vec::new());
    }

    fn reported() -> Vec<FailureReason> { REPORTED.with(|reported| reported.take()) }

    fn record(reason: FailureReason) { REPORTED.with(|reported| reported.borrow_mut().push(reason)); }

    /// Lets every check fail without consequences.
    fn lenient(reason: FailureReason, _: FailureSource) -> Action {
        record(reason);
        Action::Continue
    }

    fn recording(reason: FailureReason, source: FailureSource) -> Action {
        record(reason);
        default_policy(reason, source)
    }

    fn seed_on_mismatch(reason: FailureReason, _: FailureSource) -> Action {
        record(reason);
        match reason {
            FailureReason::FwVersionMismatch => Action::SeedVersionLedger,
            _ => Action::Continue,
        }
    }

    fn signed(version: &str, fw: FwVersion) -> ImageBuilder {
        ImageBuilder::signed(SigningKey::ed25519(1), 0, version, fw)
    }

    #[test]
    fn clean_images_pass_every_check() {
        let image = signed("2.0", FwVersion::new(2, 0));
        let mut bootloader = Device::new(Provisioning::secure().burn())
            .with_installed(&image)
            .with_staged(&image)
            .bootloader()
            .with_policy(recording);
        bootloader.secure = true;

        assert_eq!(bootloader.validate(Target::Update), Ok(true));
        assert_eq!(bootloader.validate(Target::Exec), Ok(true));
        assert!(reported().is_empty());
    }

    #[test]
    fn blank_partition_reports_a_bad_header() {
        let mut bootloader = Device::new(Provisioning::secure().burn()).bootloader().with_policy(lenient);
        assert_eq!(bootloader.validate(Target::Update), Ok(false));
        assert_eq!(reported(), vec![FailureReason::InvalidImageSignature]);
    }

    #[test]
    fn missing_partition_fails_silently() {
        let image = ImageBuilder::plain("1.0");
        let mut device = Device::new(Provisioning::insecure().burn()).with_installed(&image);
        device.exec = None;
        let mut bootloader = device.bootloader().with_policy(lenient);
        assert_eq!(bootloader.validate(Target::Exec), Ok(false));
        assert!(reported().is_empty());
    }

    #[test]
    fn invalidated_updates_are_not_hashed() {
        let image = signed("2.0", FwVersion::new(2, 0));
        let mut bootloader = Device::new(Provisioning::secure().burn())
            .with_staged(&image)
            .bootloader_with(CountingCrypto::default())
            .with_policy(recording);
        bootloader.secure = true;
        bootloader.invalidate_update_image();

        assert_eq!(bootloader.validate(Target::Update), Ok(false));
        assert_eq!(reported(), vec![FailureReason::InvalidImageSignature]);
        assert_eq!(bootloader.engine.digests, 0);
    }

    #[test]
    fn valid_updates_are_hashed_once() {
        let image = signed("2.0", FwVersion::new(2, 0));
        let mut bootloader = Device::new(Provisioning::secure().burn())
            .with_staged(&image)
            .bootloader_with(CountingCrypto::default());
        bootloader.secure = true;

        assert_eq!(bootloader.validate(Target::Update), Ok(true));
        assert_eq!(bootloader.engine.digests, 1);
    }

    #[test]
    fn corrupt_updates_stop_at_the_crc() {
        let image = signed("2.0", FwVersion::new(2, 0));
        let mut device = Device::new(Provisioning::secure().burn()).with_staged(&image);
        let last_code_byte = staged(&image).len() - 1;
        device.update.as_mut().unwrap().contents_mut()[last_code_byte] ^= 0x01;
        let mut bootloader = device.bootloader_with(CountingCrypto::default()).with_policy(recording);
        bootloader.secure = true;

        assert_eq!(bootloader.validate(Target::Update), Ok(false));
        assert_eq!(reported(), vec![FailureReason::CrcMismatch]);
        assert_eq!(bootloader.engine.digests, 0);
    }

    #[test]
    fn invalid_extension_cascades_into_later_checks() {
        let image = signed("1.0", FwVersion::new(1, 0));
        let mut device = Device::new(Provisioning::secure().burn()).with_installed(&image);
        // Corrupt the security section tag.
        device.header.as_mut().unwrap().contents_mut()[HEADER_SIZE] = 0x00;
        let mut bootloader = device.bootloader().with_policy(lenient);
        bootloader.secure = true;

        assert_eq!(bootloader.validate(Target::Exec), Ok(true));
        assert_eq!(
            reported(),
            vec![
                FailureReason::SecurityExtensionInvalid,
                FailureReason::InvalidRootKey,
                FailureReason::ImageSignature,
                FailureReason::FwVersionMismatch,
                FailureReason::FwVersionTooLow,
            ]
        );
    }

    #[test]
    fn repairs_are_visible_to_later_checks() {
        let image = signed("1.1", FwVersion::new(1, 0));
        let mut bootloader = Device::new(Provisioning::secure().without_ledger().burn())
            .with_installed(&image)
            .bootloader()
            .with_policy(seed_on_mismatch);
        bootloader.secure = true;

        assert_eq!(bootloader.validate(Target::Exec), Ok(true));
        assert_eq!(reported(), vec![FailureReason::FwVersionMismatch]);
        assert_eq!(bootloader.ledger.read(&mut bootloader.otp), LedgerReading::Valid(FwVersion::new(1, 0)));
    }

    #[test]
    fn insecure_devices_stop_after_the_crc() {
        let image = ImageBuilder::plain("1.0");
        let mut device = Device::new(Provisioning::insecure().burn()).with_installed(&image);
        device.exec.as_mut().unwrap().contents_mut()[10] ^= 0x40;
        let mut bootloader = device.bootloader().with_policy(lenient);
        assert_eq!(bootloader.validate(Target::Exec), Ok(true));
        assert_eq!(reported(), vec![FailureReason::CrcMismatch]);
    }

    #[test]
    fn unparsable_version_strings_never_match() {
        let image = signed("one.two", FwVersion::new(0, 0));
        let mut bootloader =
            Device::new(Provisioning::secure().burn()).with_installed(&image).bootloader().with_policy(lenient);
        bootloader.secure = true;
        assert_eq!(bootloader.validate(Target::Exec), Ok(true));
        assert_eq!(reported(), vec![FailureReason::FwVersionMismatch, FailureReason::FwVersionTooLow]);
    }

    #[test]
    fn extension_version_defaults_to_zero() {
        assert_eq!(extension_version(None), FwVersion::new(0, 0));
    }
}
