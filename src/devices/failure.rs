//! Failure reasons and the policy that decides what each one means.
//!
//! Every failed check is reported as a `(reason, source)` pair and the
//! policy answers with an [`Action`]. Update image failures never take the
//! device down, exec image failures always do, and missing device
//! provisioning is repaired in place.

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum FailureReason {
    /// The bootloader stored in OTP does not match its CRC.
    BootloaderCrcMismatch,
    /// Image header magic or VALID flag missing.
    InvalidImageSignature,
    CrcMismatch,
    /// Reset vector outside the image or not a Thumb address.
    ImageInsane,
    SecurityExtensionInvalid,
    InvalidRootKey,
    ImageSignature,
    /// Version string and structured version disagree.
    FwVersionMismatch,
    /// Below the anti-rollback floor.
    FwVersionTooLow,
    UpdateLowerThanCurrent,
    VersionArrayBroken,
    VersionArrayEmpty,
    InvalidRootKeys,
    InvalidSymmetricKeys,
    EmptySymmetricKeys,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum FailureSource {
    Device,
    UpdateImage,
    ExecImage,
}

/// What to do about a failed check.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum Action {
    /// Ignore the failure and carry on with the next check.
    Continue,
    /// Stop checking; the image or device is rejected.
    Abort,
    /// Make sure the staged image is never looked at again, then abort.
    InvalidateUpdateImage,
    /// Watchdog reset.
    Reboot,
    /// Provision the symmetric key area, then continue.
    GenerateSymmetricKeys,
    /// Write the first minimum version entry, then continue.
    SeedVersionLedger,
}

pub type FailurePolicy = fn(FailureReason, FailureSource) -> Action;

pub fn default_policy(reason: FailureReason, source: FailureSource) -> Action {
    match source {
        FailureSource::Device => device_policy(reason),
        FailureSource::UpdateImage => update_image_policy(reason),
        FailureSource::ExecImage => exec_image_policy(reason),
    }
}

fn device_policy(reason: FailureReason) -> Action {
    use FailureReason::*;
    match reason {
        VersionArrayEmpty => Action::SeedVersionLedger,
        EmptySymmetricKeys => Action::GenerateSymmetricKeys,
        VersionArrayBroken | BootloaderCrcMismatch | InvalidRootKeys | InvalidSymmetricKeys => {
            Action::Reboot
        }
        _ => Action::Continue,
    }
}

fn update_image_policy(reason: FailureReason) -> Action {
    use FailureReason::*;
    match reason {
        // Already invalidated, or never a valid image to begin with.
        InvalidImageSignature => Action::Abort,
        UpdateLowerThanCurrent => Action::Continue,
        CrcMismatch | SecurityExtensionInvalid | InvalidRootKey | ImageSignature
        | FwVersionMismatch | FwVersionTooLow => Action::InvalidateUpdateImage,
        _ => Action::Continue,
    }
}

fn exec_image_policy(reason: FailureReason) -> Action {
    use FailureReason::*;
    match reason {
        InvalidImageSignature | CrcMismatch | ImageInsane | SecurityExtensionInvalid
        | InvalidRootKey | ImageSignature | VersionArrayBroken | FwVersionMismatch
        | FwVersionTooLow => Action::Reboot,
        _ => Action::Continue,
    }
}
