//! Ed25519 (RFC 8032, pure variant) over the ECC engine primitives.
use super::hash_message;
use crate::hal::crypto::{
    CryptoEngine, EdwardsPoint, EngineError, HashMethod, Operand, OPERAND_SIZE,
};

const PUBLIC_KEY_SIZE: usize = 32;
const SIGNATURE_SIZE: usize = 64;
const DIGEST_SIZE: usize = 64;

/// Decodes a compressed point: little endian `y` with the sign of `x` in
/// the top bit.
fn decode_point<E: CryptoEngine>(engine: &mut E, encoded: &[u8]) -> Result<EdwardsPoint, EngineError> {
    let mut y: Operand = [0u8; OPERAND_SIZE];
    y.copy_from_slice(&encoded[..OPERAND_SIZE]);
    let x_sign = y[OPERAND_SIZE - 1] >> 7;
    y[OPERAND_SIZE - 1] &= 0x7F;

    let mut x = engine.ed25519_recover_x(&y)?;
    // x = 0 has no negative, so a set sign bit is a second encoding.
    if x_sign == 1 && x == [0u8; OPERAND_SIZE] {
        return Err(EngineError::InvalidOperand);
    }
    if x[0] & 1 != x_sign {
        x = engine.ed25519_negate(&x)?;
    }

    let point = EdwardsPoint { x, y };
    engine.ed25519_point_on_curve(&point)?;
    Ok(point)
}

pub(super) fn verify<E: CryptoEngine>(
    engine: &mut E,
    hash: HashMethod,
    public_key: &[u8],
    device_administration: &[u8],
    exec: &[u8],
    signature: &[u8],
) -> Result<bool, EngineError> {
    if public_key.len() != PUBLIC_KEY_SIZE
        || signature.len() != SIGNATURE_SIZE
        || hash != HashMethod::Sha512
        || device_administration.is_empty()
        || exec.is_empty()
    {
        return Ok(false);
    }

    let (encoded_r, s) = signature.split_at(OPERAND_SIZE);
    let r = match decode_point(engine, encoded_r) {
        Ok(point) => point,
        Err(EngineError::InvalidOperand) => return Ok(false),
        Err(error) => return Err(error),
    };
    let a = match decode_point(engine, public_key) {
        Ok(point) => point,
        Err(EngineError::InvalidOperand) => return Ok(false),
        Err(error) => return Err(error),
    };

    // h = SHA-512(R || A || M) mod L
    let mut digest = [0u8; DIGEST_SIZE];
    engine.hash_configure(HashMethod::Sha512, DIGEST_SIZE)?;
    engine.hash_input(encoded_r, false)?;
    engine.hash_input(public_key, false)?;
    hash_message(engine, device_administration, exec)?;
    engine.hash_output(&mut digest)?;
    let h = engine.ed25519_reduce(&digest)?;

    let mut s_operand: Operand = [0u8; OPERAND_SIZE];
    s_operand.copy_from_slice(s);
    match engine.ed25519_check_signature(&s_operand, &r, &a, &h) {
        Ok(()) => Ok(true),
        Err(EngineError::VerificationFailed | EngineError::InvalidOperand) => Ok(false),
        Err(error) => Err(error),
    }
}
