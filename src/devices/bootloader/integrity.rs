//! Device level checks run before any image is looked at.
use super::{Bootloader, RebootCause};
use crate::{
    devices::{
        failure::{FailureReason, FailureSource},
        otp_map::{self, SECURE_DEVICE_ENABLED, SYMMETRIC_KEY_COUNT},
        traits::Storage,
        version::LedgerReading,
    },
    hal::{crypto::CryptoEngine, otp::Otp, rng::Entropy, system::System},
    utilities::crc16::Crc16,
};

/// OTP is checksummed in chunks of this size.
const CRC_CHUNK_SIZE: usize = 256;

impl<P: Storage, O: Otp, E: CryptoEngine, R: Entropy, S: System> Bootloader<P, O, E, R, S> {
    /// Checks the bootloader itself, the secure device flag, the key areas
    /// and the minimum version ledger. Sets `secure` as a side effect.
    ///
    /// Returns `false` if the policy stopped the sequence early.
    pub(crate) fn device_integrity_check(&mut self) -> Result<bool, RebootCause> {
        let device = FailureSource::Device;

        if !self.bootloader_crc_matches() {
            trace_warn!("Secure bootloader CRC is invalid");
            if !self.report(FailureReason::BootloaderCrcMismatch, device)? {
                return Ok(false);
            }
        }

        let mut field = [0u8; 8];
        if otp_map::read(&mut self.otp, self.map.secure_device, &mut field).is_err() {
            return Ok(false);
        }
        if field[0] != SECURE_DEVICE_ENABLED {
            trace!("Device is not secure");
            return Ok(true);
        }
        self.secure = true;

        // Masks revoked slots before any key cell is read.
        self.keys.load_markers(&mut self.otp);

        let symmetric = self.keys.check_symmetric_keys(&mut self.otp);
        if symmetric.valid.is_empty() {
            let reason = if symmetric.empty.len() == SYMMETRIC_KEY_COUNT {
                trace!("Symmetric key area is empty");
                FailureReason::EmptySymmetricKeys
            } else {
                trace_warn!("There is no valid symmetric key");
                FailureReason::InvalidSymmetricKeys
            };
            if !self.report(reason, device)? {
                return Ok(false);
            }
        }

        if self.keys.check_root_keys(&mut self.otp).is_empty() {
            trace_warn!("There is no valid root key");
            if !self.report(FailureReason::InvalidRootKeys, device)? {
                return Ok(false);
            }
        }

        match self.ledger.read(&mut self.otp) {
            LedgerReading::Broken => {
                trace_warn!("Minimum version ledger is broken");
                if !self.report(FailureReason::VersionArrayBroken, device)? {
                    return Ok(false);
                }
                Ok(true)
            }
            LedgerReading::Empty => {
                trace!("Minimum version ledger is empty");
                self.report(FailureReason::VersionArrayEmpty, device)
            }
            LedgerReading::Valid(_) => Ok(true),
        }
    }

    /// Recomputes the CRC16 of the bootloader image at the start of OTP
    /// and compares it with the value burned at provisioning time. A blank
    /// or unreadable length, or an unreadable image, counts as a mismatch.
    pub(crate) fn bootloader_crc_matches(&mut self) -> bool {
        let mut word = [0u8; 4];
        if otp_map::read(&mut self.otp, self.map.bootloader_length, &mut word).is_err() {
            return false;
        }
        let words = u32::from_le_bytes(word);
        if words == 0 {
            return false;
        }
        if otp_map::read(&mut self.otp, self.map.bootloader_crc, &mut word).is_err() {
            return false;
        }
        let expected = u32::from_le_bytes(word);

        let mut remaining = (words as usize).saturating_mul(4);
        let mut address = self.map.base;
        let mut crc = Crc16::new();
        let mut chunk = [0u8; CRC_CHUNK_SIZE];
        while remaining > 0 {
            let size = remaining.min(CRC_CHUNK_SIZE);
            if otp_map::read(&mut self.otp, address, &mut chunk[..size]).is_err() {
                return false;
            }
            crc.update(&chunk[..size]);
            remaining -= size;
            address = address.wrapping_add(size as u32);
        }

        expected == u32::from(crc.value())
    }
}
