//! Root and symmetric key bookkeeping in OTP.
//!
//! Every key slot has a twin slot holding its bitwise inverse. A slot pair
//! is valid when each byte XORs to `0xFF`, and empty when both halves are
//! still blank. OTP bits can only be set, so keys are revoked by burning
//! both halves to all ones and recording an all-ones marker in the per
//! kind marker table. The marker tables are the authority on revocation:
//! poisoned cells may not read back reliably, so masked slots are never
//! read again.
use super::otp_map::{
    self, KeyKind, OtpMap, ASYMMETRIC_KEY_COUNT, ASYMMETRIC_KEY_SIZE, KEY_MARKER_SIZE,
    SYMMETRIC_KEY_COUNT, SYMMETRIC_KEY_SIZE,
};
use crate::{
    error::Error,
    hal::{otp::Otp, rng::Entropy},
    utilities::bitwise::{BitFlags, SliceBits},
};

/// Key identifier as carried by revocation records and security headers:
/// either a slot index or an absolute OTP address.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub struct KeyId {
    pub kind: KeyKind,
    pub id: u32,
}

/// One bit per key slot.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub struct KeyMask(u8);

impl KeyMask {
    pub const NONE: KeyMask = KeyMask(0);

    pub fn contains(self, index: usize) -> bool { index < 8 && self.0.is_set(index as u8) }

    pub fn insert(&mut self, index: usize) { self.0 |= 1 << index; }

    pub fn remove(&mut self, index: usize) { self.0 &= !(1 << index); }

    pub fn is_empty(self) -> bool { self.0 == 0 }

    pub fn len(self) -> usize { self.0.count_ones() as usize }

    pub fn bits(self) -> u8 { self.0 }
}

/// A root key read back from OTP, trimmed to its actual length.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PublicKey {
    bytes: [u8; ASYMMETRIC_KEY_SIZE],
    size: usize,
}

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8] { &self.bytes[..self.size] }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SymmetricKeyStatus {
    pub valid: KeyMask,
    pub empty: KeyMask,
}

/// Snapshot of the revocation marker tables plus the operations that
/// depend on it.
#[derive(Copy, Clone, Debug)]
pub struct KeyLedger {
    map: OtpMap,
    invalid_public: KeyMask,
    invalid_symmetric: KeyMask,
}

impl KeyLedger {
    pub fn new(map: OtpMap) -> Self {
        Self { map, invalid_public: KeyMask::NONE, invalid_symmetric: KeyMask::NONE }
    }

    pub fn invalid(&self, kind: KeyKind) -> KeyMask {
        match kind {
            KeyKind::Public => self.invalid_public,
            KeyKind::Symmetric => self.invalid_symmetric,
        }
    }

    /// Folds the OTP marker tables into the in-memory masks. Markers are
    /// sticky: a slot once seen as invalid stays invalid for this boot.
    pub fn load_markers<O: Otp>(&mut self, otp: &mut O) {
        self.invalid_public = KeyMask(
            self.invalid_public.0 | self.read_markers(otp, KeyKind::Public, ASYMMETRIC_KEY_COUNT).0,
        );
        self.invalid_symmetric = KeyMask(
            self.invalid_symmetric.0
                | self.read_markers(otp, KeyKind::Symmetric, SYMMETRIC_KEY_COUNT).0,
        );
    }

    fn read_markers<O: Otp>(&self, otp: &mut O, kind: KeyKind, count: usize) -> KeyMask {
        let mut table = [0u8; KEY_MARKER_SIZE * SYMMETRIC_KEY_COUNT];
        let table = &mut table[..KEY_MARKER_SIZE * count];
        if otp_map::read(otp, self.map.marker_table(kind), table).is_err() {
            return KeyMask::NONE;
        }
        let mut mask = KeyMask::NONE;
        table
            .chunks(KEY_MARKER_SIZE)
            .enumerate()
            .filter(|(_, marker)| !marker.is_blank())
            .for_each(|(index, _)| mask.insert(index));
        mask
    }

    /// Reads and checks the root key at `address`. Trailing bytes where
    /// both the key and its inverse are blank belong to a shorter key and
    /// are trimmed; any other mismatch rejects the key.
    pub fn read_public_key<O: Otp>(&self, otp: &mut O, address: u32) -> Option<PublicKey> {
        let kind = KeyKind::Public;
        if self.invalid_public.contains(self.map.key_index(kind, address)) {
            return None;
        }

        let mut key = [0u8; ASYMMETRIC_KEY_SIZE];
        let mut inverse = [0u8; ASYMMETRIC_KEY_SIZE];
        otp_map::read(otp, address, &mut key).ok()?;
        otp_map::read(otp, self.map.inverse_address(kind, address), &mut inverse).ok()?;

        let mut size = ASYMMETRIC_KEY_SIZE;
        for index in (0..ASYMMETRIC_KEY_SIZE).rev() {
            if key[index] ^ inverse[index] != 0xFF {
                if key[index] == 0 && inverse[index] == 0 {
                    size = index;
                } else {
                    size = 0;
                    break;
                }
            }
        }

        (size != 0).then_some(PublicKey { bytes: key, size })
    }

    /// Mask of root key slots holding a usable key.
    pub fn check_root_keys<O: Otp>(&self, otp: &mut O) -> KeyMask {
        let mut valid = KeyMask::NONE;
        for index in 0..ASYMMETRIC_KEY_COUNT {
            let address = self.map.key_area(KeyKind::Public) + (index * ASYMMETRIC_KEY_SIZE) as u32;
            if self.read_public_key(otp, address).is_some() {
                valid.insert(index);
            }
        }
        valid
    }

    pub fn check_symmetric_keys<O: Otp>(&self, otp: &mut O) -> SymmetricKeyStatus {
        let kind = KeyKind::Symmetric;
        let mut status = SymmetricKeyStatus { valid: KeyMask::NONE, empty: KeyMask::NONE };

        for index in 0..SYMMETRIC_KEY_COUNT {
            if self.invalid_symmetric.contains(index) {
                continue;
            }
            let address = self.map.key_area(kind) + (index * SYMMETRIC_KEY_SIZE) as u32;
            let mut key = [0u8; SYMMETRIC_KEY_SIZE];
            let mut inverse = [0u8; SYMMETRIC_KEY_SIZE];
            if otp_map::read(otp, address, &mut key).is_err()
                || otp_map::read(otp, self.map.inverse_address(kind, address), &mut inverse).is_err()
            {
                continue;
            }

            if key.is_blank() && inverse.is_blank() {
                status.empty.insert(index);
            } else if key.is_complement_of(&inverse) {
                status.valid.insert(index);
            }
        }
        status
    }

    /// Poisons a single key and records its marker. Returns `false` when
    /// the marker table already lists the key, in which case nothing is
    /// written.
    ///
    /// This does not protect the key in use or the last symmetric key;
    /// [`KeyLedger::revoke_keys`] is the entry point that does.
    pub(crate) fn revoke_key<O: Otp>(
        &self,
        otp: &mut O,
        address: u32,
        kind: KeyKind,
    ) -> Result<bool, Error> {
        let index = self.map.key_index(kind, address);
        let marker_address = self.map.marker_address(kind, index);
        let mut marker = [0u8; KEY_MARKER_SIZE];
        otp_map::read(otp, marker_address, &mut marker)?;
        if !marker.is_blank() {
            return Ok(false);
        }

        let poison = [0xFFu8; ASYMMETRIC_KEY_SIZE];
        otp_map::write(otp, marker_address, &poison[..KEY_MARKER_SIZE])?;
        otp_map::write(otp, address, &poison[..kind.slot_size()])?;
        otp_map::write(otp, self.map.inverse_address(kind, address), &poison[..kind.slot_size()])?;
        Ok(true)
    }

    /// Revokes the listed keys, skipping unresolvable or already invalid
    /// ones. The key at `key_in_use` and the last valid symmetric key are
    /// never revoked. The marker snapshot is refreshed afterwards.
    pub fn revoke_keys<O: Otp>(&mut self, otp: &mut O, revocations: &[KeyId], key_in_use: Option<u32>) {
        if revocations.is_empty() {
            return;
        }

        let mut valid_symmetric = self.check_symmetric_keys(otp).valid;

        for revocation in revocations {
            let Some(address) = self.map.key_address(revocation.kind, revocation.id) else {
                continue;
            };

            if Some(address) == key_in_use {
                trace!("Cannot revoke public key - it verifies the current image");
                continue;
            }

            match revocation.kind {
                KeyKind::Symmetric => {
                    let index = self.map.key_index(KeyKind::Symmetric, address);
                    if !valid_symmetric.contains(index) {
                        continue;
                    }
                    if valid_symmetric.len() == 1 {
                        trace!("Cannot revoke symmetric key - it is the last valid key");
                        continue;
                    }
                    valid_symmetric.remove(index);
                }
                KeyKind::Public => {
                    if self.read_public_key(otp, address).is_none() {
                        continue;
                    }
                }
            }

            match self.revoke_key(otp, address, revocation.kind) {
                Ok(true) => trace!("Key at {=u32:#x} revoked", address),
                Ok(false) => {}
                Err(_) => trace_warn!("Failed to revoke key at {=u32:#x}", address),
            }
        }

        self.load_markers(otp);
    }

    /// Records a marker for every symmetric slot that is not valid, so the
    /// application can tell usable keys apart without reading them.
    pub fn mark_invalid_symmetric_keys<O: Otp>(&self, otp: &mut O) {
        let valid = self.check_symmetric_keys(otp).valid;
        let mut table = [0u8; KEY_MARKER_SIZE * SYMMETRIC_KEY_COUNT];
        // A failed read leaves the table blank, so every marker gets rewritten.
        let _ = otp_map::read(otp, self.map.marker_table(KeyKind::Symmetric), &mut table);

        for (index, marker) in table.chunks(KEY_MARKER_SIZE).enumerate() {
            if valid.contains(index) || marker.is_saturated() {
                continue;
            }
            let address = self.map.marker_address(KeyKind::Symmetric, index);
            if otp_map::write(otp, address, &[0xFF; KEY_MARKER_SIZE]).is_err() {
                trace_warn!("Failed to mark symmetric key {=usize}", index);
            }
        }
    }

    /// Provisions every symmetric slot with fresh random material.
    pub fn generate_symmetric_keys<O: Otp, T: Entropy>(
        &self,
        otp: &mut O,
        entropy: &mut T,
    ) -> Result<(), Error> {
        let kind = KeyKind::Symmetric;
        for index in 0..SYMMETRIC_KEY_COUNT {
            let mut key = [0u8; SYMMETRIC_KEY_SIZE];
            entropy.fill(&mut key);
            let mut inverse = key;
            inverse.iter_mut().for_each(|byte| *byte = !*byte);

            let address = self.map.key_area(kind) + (index * SYMMETRIC_KEY_SIZE) as u32;
            otp_map::write(otp, address, &key)?;
            otp_map::write(otp, self.map.inverse_address(kind, address), &inverse)?;
        }
        trace!("Symmetric keys generated");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{hal::doubles::otp::FakeOtp, ports::da1468x::OTP_MAP};

    pub fn blank_otp() -> FakeOtp { FakeOtp::new(OTP_MAP.base, 0x1_0000) }

    /// Burns a root key of arbitrary length into `slot`, with its inverse.
    pub fn provision_public_key(otp: &mut FakeOtp, slot: usize, key: &[u8]) {
        let address = OTP_MAP.asymmetric_keys + (slot * ASYMMETRIC_KEY_SIZE) as u32;
        let inverse: Vec<u8> = key.iter().map(|b| !b).collect();
        otp.burn(address, key);
        otp.burn(OTP_MAP.inverse_address(KeyKind::Public, address), &inverse);
    }

    pub fn provision_symmetric_key(otp: &mut FakeOtp, slot: usize, fill: u8) {
        let address = OTP_MAP.symmetric_keys + (slot * SYMMETRIC_KEY_SIZE) as u32;
        otp.burn(address, &[fill; SYMMETRIC_KEY_SIZE]);
        otp.burn(OTP_MAP.inverse_address(KeyKind::Symmetric, address), &[!fill; SYMMETRIC_KEY_SIZE]);
    }

    fn symmetric(id: u32) -> KeyId { KeyId { kind: KeyKind::Symmetric, id } }
    fn public(id: u32) -> KeyId { KeyId { kind: KeyKind::Public, id } }

    #[test]
    fn reads_full_length_public_keys() {
        let mut otp = blank_otp();
        let key: Vec<u8> = (1..=64).collect();
        provision_public_key(&mut otp, 1, &key);
        let ledger = KeyLedger::new(OTP_MAP);

        let read = ledger.read_public_key(&mut otp, OTP_MAP.key_address(KeyKind::Public, 1).unwrap());
        assert_eq!(read.unwrap().as_bytes(), &key[..]);
    }

    #[test]
    fn trims_short_public_keys() {
        let mut otp = blank_otp();
        provision_public_key(&mut otp, 0, &[0x5A; 32]);
        let ledger = KeyLedger::new(OTP_MAP);
        let read = ledger.read_public_key(&mut otp, OTP_MAP.asymmetric_keys).unwrap();
        assert_eq!(read.as_bytes().len(), 32);
    }

    #[test]
    fn rejects_corrupt_and_blank_public_keys() {
        let mut otp = blank_otp();
        provision_public_key(&mut otp, 0, &[0x11; 64]);
        otp.burn(OTP_MAP.asymmetric_keys + 10, &[0x02]);
        let ledger = KeyLedger::new(OTP_MAP);
        assert!(ledger.read_public_key(&mut otp, OTP_MAP.asymmetric_keys).is_none());
        assert!(ledger.read_public_key(&mut otp, OTP_MAP.asymmetric_keys + 64).is_none());
        assert_eq!(ledger.check_root_keys(&mut otp), KeyMask::NONE);
    }

    #[test]
    fn root_key_mask_reflects_provisioned_slots() {
        let mut otp = blank_otp();
        provision_public_key(&mut otp, 0, &[0x21; 64]);
        provision_public_key(&mut otp, 2, &[0x43; 56]);
        let ledger = KeyLedger::new(OTP_MAP);
        assert_eq!(ledger.check_root_keys(&mut otp).bits(), 0b0101);
    }

    #[test]
    fn symmetric_status_separates_valid_and_empty_slots() {
        let mut otp = blank_otp();
        provision_symmetric_key(&mut otp, 0, 0x3C);
        provision_symmetric_key(&mut otp, 5, 0x00);
        // Corrupt slot 6: key without inverse
        otp.burn(OTP_MAP.symmetric_keys + 6 * 32, &[0x77; 32]);
        let ledger = KeyLedger::new(OTP_MAP);

        let status = ledger.check_symmetric_keys(&mut otp);
        assert_eq!(status.valid.bits(), 0b0010_0001);
        assert_eq!(status.empty.bits(), 0b1001_1110);
    }

    #[test]
    fn revoking_twice_is_a_no_op() {
        let mut otp = blank_otp();
        provision_public_key(&mut otp, 3, &[0x99; 64]);
        let ledger = KeyLedger::new(OTP_MAP);
        let address = OTP_MAP.key_address(KeyKind::Public, 3).unwrap();

        assert_eq!(ledger.revoke_key(&mut otp, address, KeyKind::Public), Ok(true));
        let after_first = otp.clone();
        let writes = otp.write_count();

        // The poisoned key cells no longer read back.
        otp.make_unreadable(address..address + 64);
        assert_eq!(ledger.revoke_key(&mut otp, address, KeyKind::Public), Ok(false));
        assert_eq!(otp.write_count(), writes);
        assert_eq!(otp.peek(OTP_MAP.base, 0x1_0000), after_first.peek(OTP_MAP.base, 0x1_0000));
        assert!(otp.peek(address, 64).is_saturated());
        assert!(otp.peek(OTP_MAP.marker_address(KeyKind::Public, 3), 8).is_saturated());
    }

    #[test]
    fn revoked_keys_are_masked_after_refresh() {
        let mut otp = blank_otp();
        provision_public_key(&mut otp, 0, &[0x01; 64]);
        provision_public_key(&mut otp, 1, &[0x02; 64]);
        let mut ledger = KeyLedger::new(OTP_MAP);

        ledger.revoke_keys(&mut otp, &[public(1)], Some(OTP_MAP.asymmetric_keys));
        assert!(ledger.invalid(KeyKind::Public).contains(1));
        assert_eq!(ledger.check_root_keys(&mut otp).bits(), 0b0001);
    }

    #[test]
    fn never_revokes_the_key_in_use() {
        let mut otp = blank_otp();
        provision_public_key(&mut otp, 0, &[0x01; 64]);
        provision_public_key(&mut otp, 1, &[0x02; 64]);
        let mut ledger = KeyLedger::new(OTP_MAP);
        let in_use = OTP_MAP.asymmetric_keys;

        // Same key named by index and by address
        ledger.revoke_keys(&mut otp, &[public(0), public(in_use)], Some(in_use));
        assert_eq!(ledger.check_root_keys(&mut otp).bits(), 0b0011);
        assert!(ledger.invalid(KeyKind::Public).is_empty());
    }

    #[test]
    fn never_revokes_the_last_symmetric_key() {
        let mut otp = blank_otp();
        (0..SYMMETRIC_KEY_COUNT).for_each(|slot| provision_symmetric_key(&mut otp, slot, 0x40 + slot as u8));
        let mut ledger = KeyLedger::new(OTP_MAP);

        let everything: Vec<KeyId> = (0..SYMMETRIC_KEY_COUNT as u32).map(symmetric).collect();
        ledger.revoke_keys(&mut otp, &everything, None);

        let status = ledger.check_symmetric_keys(&mut otp);
        assert_eq!(status.valid.len(), 1);
        assert!(status.valid.contains(SYMMETRIC_KEY_COUNT - 1));
        assert_eq!(ledger.invalid(KeyKind::Symmetric).len(), SYMMETRIC_KEY_COUNT - 1);
    }

    #[test]
    fn invalid_identifiers_are_ignored() {
        let mut otp = blank_otp();
        provision_symmetric_key(&mut otp, 0, 0x10);
        provision_symmetric_key(&mut otp, 1, 0x20);
        let mut ledger = KeyLedger::new(OTP_MAP);
        let writes = otp.write_count();

        ledger.revoke_keys(&mut otp, &[symmetric(8), symmetric(0xDEAD_BEEF), symmetric(4)], None);
        assert_eq!(otp.write_count(), writes);
    }

    #[test]
    fn generated_keys_are_all_valid() {
        let mut otp = blank_otp();
        let ledger = KeyLedger::new(OTP_MAP);
        let mut entropy = crate::hal::doubles::rng::FakeEntropy::new(0x1234);

        ledger.generate_symmetric_keys(&mut otp, &mut entropy).unwrap();
        let status = ledger.check_symmetric_keys(&mut otp);
        assert_eq!(status.valid.len(), SYMMETRIC_KEY_COUNT);
        assert!(status.empty.is_empty());
    }

    #[test]
    fn marks_every_unusable_symmetric_slot_once() {
        let mut otp = blank_otp();
        provision_symmetric_key(&mut otp, 2, 0x66);
        let ledger = KeyLedger::new(OTP_MAP);

        ledger.mark_invalid_symmetric_keys(&mut otp);
        for index in 0..SYMMETRIC_KEY_COUNT {
            let marker = otp.peek(OTP_MAP.marker_address(KeyKind::Symmetric, index), 8);
            assert_eq!(marker.is_saturated(), index != 2);
        }

        let writes = otp.write_count();
        ledger.mark_invalid_symmetric_keys(&mut otp);
        assert_eq!(otp.write_count(), writes);
    }
}
