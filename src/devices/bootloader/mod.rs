//! Secure boot state machine.
//!
//! This module contains all bootloader functionality, with
//! the exception of how to construct one. Board constants
//! (OTP layout, flash geometry) come from the `ports` module.
//!
//! A boot runs to completion in this order:
//!
//! 1. Device integrity: bootloader CRC, secure flag, keys, version ledger.
//! 2. Validation of the staged update image, and if it passes, device
//!    administration (install, raise the rollback floor, revoke keys).
//! 3. Validation of the installed image, which must pass.
//! 4. Reset vector sanity check and hand over to the application.
//!
//! Every failed check goes through the [failure policy](super::failure),
//! whose answer may end the boot with a watchdog reboot.
use super::{
    failure::{default_policy, Action, FailurePolicy, FailureReason, FailureSource},
    image::{vector_table_is_sane, ImageHeader, VECTOR_TABLE_SIZE},
    keys::KeyLedger,
    otp_map::OtpMap,
    security_ext::SecurityExtension,
    traits::Storage,
    version::VersionLedger,
};
use crate::hal::{
    crypto::CryptoEngine,
    flash::{Nvms, PartitionId},
    otp::Otp,
    rng::Entropy,
    system::System,
};

mod administration;
mod integrity;
mod validation;

/// When the CRC of the installed executable is checked.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum CrcPolicy {
    /// On every boot.
    Always,
    /// On secure devices, or when the image header sets `FORCE_CRC`.
    HonourForceFlag,
}

impl Default for CrcPolicy {
    fn default() -> Self { CrcPolicy::Always }
}

/// Flash geometry and boot options.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BootConfig {
    /// Erase unit, and upper bound for header plus security extension.
    pub sector_size: usize,
    /// Offset of the image header inside the update partition.
    pub update_header_offset: usize,
    pub crc_policy: CrcPolicy,
}

/// Why the loader gave up and asked for a watchdog reset.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum RebootCause {
    /// The failure policy asked for it.
    Policy { reason: FailureReason, source: FailureSource },
    /// A valid update could not be installed.
    AdministrationFailed,
    NoValidImage,
    /// The vector table of the installed image could not be mapped.
    VectorTableUnmapped,
    /// Reset vector rejected and the policy did not let it through.
    ImageInsane,
}

/// Outcome of a complete boot pass.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum BootDecision {
    /// Jump to the installed image mapped at `image_address`.
    Start { image_address: u32, secure: bool },
    Reboot(RebootCause),
}

pub struct Bootloader<P: Storage, O: Otp, E: CryptoEngine, R: Entropy, S: System> {
    pub(crate) update: Option<P>,
    pub(crate) exec: Option<P>,
    pub(crate) header: Option<P>,
    pub(crate) otp: O,
    pub(crate) engine: E,
    pub(crate) entropy: R,
    pub(crate) system: S,
    pub(crate) map: OtpMap,
    pub(crate) config: BootConfig,
    pub(crate) keys: KeyLedger,
    pub(crate) ledger: VersionLedger,
    pub(crate) policy: FailurePolicy,
    /// Set by the integrity check once the secure device flag is read.
    pub(crate) secure: bool,
}

impl<P: Storage, O: Otp, E: CryptoEngine, R: Entropy, S: System> Bootloader<P, O, E, R, S> {
    /// Opens the three image partitions. They stay open for the lifetime
    /// of the loader; a missing one simply fails every check that needs it.
    pub fn new<N: Nvms<Partition = P>>(
        nvms: &mut N,
        otp: O,
        engine: E,
        entropy: R,
        system: S,
        map: OtpMap,
        config: BootConfig,
    ) -> Self {
        Self {
            update: nvms.open(PartitionId::FirmwareUpdate),
            exec: nvms.open(PartitionId::FirmwareExec),
            header: nvms.open(PartitionId::ImageHeader),
            otp,
            engine,
            entropy,
            system,
            map,
            config,
            keys: KeyLedger::new(map),
            ledger: VersionLedger::new(map),
            policy: default_policy,
            secure: false,
        }
    }

    /// Replaces the default failure policy.
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Main bootloader routine. Never returns: it either starts the
    /// installed image or resets the device.
    pub fn run(mut self) -> ! {
        trace!("Secure bootloader started");
        match self.decide() {
            BootDecision::Start { secure, .. } => {
                let vector_table = self.exec.as_ref().map(|exec| exec.map(0, VECTOR_TABLE_SIZE));
                match vector_table {
                    Some(vector_table) if vector_table.len() == VECTOR_TABLE_SIZE => {
                        self.system.start_image(vector_table, secure)
                    }
                    _ => self.system.reboot(),
                }
            }
            BootDecision::Reboot(_cause) => {
                trace_warn!("Rebooting: {}", _cause);
                self.system.reboot()
            }
        }
    }

    /// Runs the whole boot sequence and reports what should happen next,
    /// without acting on it.
    pub fn decide(&mut self) -> BootDecision {
        match self.boot_sequence() {
            Ok(decision) => decision,
            Err(cause) => BootDecision::Reboot(cause),
        }
    }

    fn boot_sequence(&mut self) -> Result<BootDecision, RebootCause> {
        if !self.device_integrity_check()? {
            trace!("Device integrity check failure");
        }

        trace!("Checking update image...");
        if self.validate_update()? {
            trace!("Update image is valid, performing device administration");
            if !self.device_administration()? {
                trace_warn!("Device administration failed");
                return Err(RebootCause::AdministrationFailed);
            }
        }

        if !self.validate_exec()? {
            trace_warn!("No valid image");
            return Err(RebootCause::NoValidImage);
        }

        let (image_address, sane) = {
            let exec = self.exec.as_ref().ok_or(RebootCause::NoValidImage)?;
            let vector_table = exec.map(0, VECTOR_TABLE_SIZE);
            if vector_table.len() != VECTOR_TABLE_SIZE {
                return Err(RebootCause::VectorTableUnmapped);
            }
            (exec.base_address(), vector_table_is_sane(vector_table, exec.base_address()))
        };

        if !sane {
            trace!("Current executable is insane");
            if !self.report(FailureReason::ImageInsane, FailureSource::ExecImage)? {
                return Err(RebootCause::ImageInsane);
            }
        }

        if self.secure {
            self.keys.mark_invalid_symmetric_keys(&mut self.otp);
        }

        trace!("Starting image at {=u32:#x}", image_address);
        Ok(BootDecision::Start { image_address, secure: self.secure })
    }

    /// Hands a failed check to the policy. `Ok(true)` means carry on,
    /// `Ok(false)` means the current check sequence is over.
    pub(crate) fn report(
        &mut self,
        reason: FailureReason,
        source: FailureSource,
    ) -> Result<bool, RebootCause> {
        let action = (self.policy)(reason, source);
        trace!("Failure {} from {}: {}", reason, source, action);
        match action {
            Action::Continue => Ok(true),
            Action::Abort => Ok(false),
            Action::InvalidateUpdateImage => {
                self.invalidate_update_image();
                Ok(false)
            }
            Action::Reboot => Err(RebootCause::Policy { reason, source }),
            Action::GenerateSymmetricKeys => {
                if self.keys.generate_symmetric_keys(&mut self.otp, &mut self.entropy).is_err() {
                    trace_warn!("Symmetric key generation failed");
                }
                Ok(true)
            }
            Action::SeedVersionLedger => {
                self.write_first_min_version();
                Ok(true)
            }
        }
    }

    /// Clears the VALID flag and magic of the staged image, in place.
    pub(crate) fn invalidate_update_image(&mut self) {
        let offset = self.config.update_header_offset;
        let Some(update) = self.update.as_mut() else {
            return;
        };
        let Ok(header) = ImageHeader::read(update, offset) else {
            return;
        };
        if header.is_invalidated() {
            return;
        }
        match header.invalidated().write(update, offset) {
            Ok(()) => trace!("Update image invalidated"),
            Err(_) => trace_warn!("Failed to invalidate the update image"),
        }
    }

    /// Parses the security extension following the header at
    /// `header_offset` of `partition`.
    pub(crate) fn extension_of<'a>(
        &self,
        partition: &'a P,
        header_offset: usize,
    ) -> Option<SecurityExtension<'a>> {
        SecurityExtension::read_from(
            partition,
            header_offset + super::image::HEADER_SIZE,
            self.config.sector_size,
            &self.map,
        )
        .ok()
    }
}
