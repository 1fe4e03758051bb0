//! ECDSA over the NIST curves.
//!
//! The engine works on fixed 32 byte big endian operands, so every
//! coordinate, signature half and digest is right aligned into its slot.
use super::hash_message;
use crate::hal::crypto::{
    CryptoEngine, Curve, EcdsaOperands, EngineError, HashMethod, Operand, OPERAND_SIZE,
};

fn right_align(slot: &mut Operand, value: &[u8]) {
    slot[OPERAND_SIZE - value.len()..].copy_from_slice(value);
}

/// Splits `bytes` into two equal halves that each fit an operand slot.
fn halves(bytes: &[u8]) -> Option<(&[u8], &[u8])> {
    let half = bytes.len() / 2;
    (half > 0 && bytes.len() % 2 == 0 && half <= OPERAND_SIZE).then(|| bytes.split_at(half))
}

pub(super) fn verify<E: CryptoEngine>(
    engine: &mut E,
    curve: Curve,
    hash: HashMethod,
    public_key: &[u8],
    device_administration: &[u8],
    exec: &[u8],
    signature: &[u8],
) -> Result<bool, EngineError> {
    if curve == Curve::Edwards25519 {
        return Ok(false);
    }
    let (Some((x, y)), Some((r, s))) = (halves(public_key), halves(signature)) else {
        return Ok(false);
    };

    let mut operands = EcdsaOperands::default();
    right_align(&mut operands.public_x, x);
    right_align(&mut operands.public_y, y);
    right_align(&mut operands.r, r);
    right_align(&mut operands.s, s);

    // The ECC engine takes at most one operand worth of digest.
    let digest_size = hash.digest_size().min(OPERAND_SIZE);
    let mut digest = [0u8; OPERAND_SIZE];
    engine.hash_configure(hash, digest_size)?;
    hash_message(engine, device_administration, exec)?;
    engine.hash_output(&mut digest[..digest_size])?;
    right_align(&mut operands.hash, &digest[..digest_size.min(x.len())]);

    match engine.ecdsa_verify(curve, &operands) {
        Ok(()) => Ok(true),
        Err(EngineError::VerificationFailed | EngineError::InvalidOperand) => Ok(false),
        Err(error) => Err(error),
    }
}
