//! DA1468x OTP layout and flash geometry.
use crate::{
    devices::{
        bootloader::{BootConfig, Bootloader, CrcPolicy},
        otp_map::OtpMap,
        traits::Storage,
    },
    hal::{crypto::CryptoEngine, flash::Nvms, otp::Otp, rng::Entropy, system::System},
};

pub const OTP_MAP: OtpMap = OtpMap {
    base: 0x07F8_0000,
    asymmetric_keys: 0x07F8_E6C0,
    inverse_asymmetric_keys: 0x07F8_E5C0,
    symmetric_keys: 0x07F8_E8C0,
    inverse_symmetric_keys: 0x07F8_E7C0,
    asymmetric_key_markers: 0x07F8_E360,
    symmetric_key_markers: 0x07F8_E380,
    min_version_ledger: 0x07F8_E3C0,
    secure_device: 0x07F8_EA68,
    bootloader_length: 0x07F8_EA10,
    bootloader_crc: 0x07F8_EA38,
};

/// QSPI flash erases in 4KiB sectors. The update image header sits at
/// the start of its partition.
pub const BOOT_CONFIG: BootConfig =
    BootConfig { sector_size: 4096, update_header_offset: 0, crc_policy: CrcPolicy::Always };

impl<P: Storage, O: Otp, E: CryptoEngine, R: Entropy, S: System> Bootloader<P, O, E, R, S> {
    /// Loader for a DA1468x with its default OTP layout.
    pub fn da1468x<N: Nvms<Partition = P>>(
        nvms: &mut N,
        otp: O,
        engine: E,
        entropy: R,
        system: S,
    ) -> Self {
        Self::new(nvms, otp, engine, entropy, system, OTP_MAP, BOOT_CONFIG)
    }
}
