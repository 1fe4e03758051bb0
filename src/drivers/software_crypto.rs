//! Software implementation of the crypto engine interfaces.
//!
//! Behaves like the coprocessors as seen through [`crate::hal::crypto`],
//! including the hash engine's alignment restriction, so the verification
//! code runs unchanged on the host and on parts without the ECC block.
use crate::hal::crypto::{
    Curve, EccEngine, EcdsaOperands, EdwardsPoint, EngineError, HashEngine, HashMethod, Operand,
    OPERAND_SIZE,
};
use crypto_bigint::{impl_modulus, modular::constant_mod::Residue, Encoding, U256};
use curve25519_dalek::{
    edwards::{CompressedEdwardsY, EdwardsPoint as DalekPoint},
    scalar::Scalar,
};
use ecdsa::signature::hazmat::PrehashVerifier;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

const MAX_DIGEST_SIZE: usize = 64;
const DMA_ALIGNMENT: usize = 8;

impl_modulus!(
    FieldModulus,
    U256,
    "7fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffed"
);

type FieldElement = Residue<FieldModulus, { U256::LIMBS }>;

/// Edwards curve constant `d = -121665/121666`.
const D: U256 =
    U256::from_be_hex("52036cee2b6ffe738cc740797779e89800700a4d4141d8ab75eb4dca135978a3");
/// A square root of -1.
const SQRT_M1: U256 =
    U256::from_be_hex("2b8324804fc1df0b2b4d00993dfbd7a72f431806ad2fe478c4ee1b274a0ea0b0");
/// `(p + 3) / 8`, the candidate square root exponent.
const SQRT_EXPONENT: U256 =
    U256::from_be_hex("0ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffe");
/// `p - 2`, the inversion exponent.
const INVERT_EXPONENT: U256 =
    U256::from_be_hex("7fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffeb");
const MODULUS: U256 =
    U256::from_be_hex("7fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffed");

enum Hasher {
    Sha224(Sha224),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Hasher {
    fn new(method: HashMethod) -> Self {
        match method {
            HashMethod::Sha224 => Hasher::Sha224(Sha224::new()),
            HashMethod::Sha256 => Hasher::Sha256(Sha256::new()),
            HashMethod::Sha384 => Hasher::Sha384(Sha384::new()),
            HashMethod::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, block: &[u8]) {
        match self {
            Hasher::Sha224(hasher) => hasher.update(block),
            Hasher::Sha256(hasher) => hasher.update(block),
            Hasher::Sha384(hasher) => hasher.update(block),
            Hasher::Sha512(hasher) => hasher.update(block),
        }
    }

    fn finish(self, output: &mut [u8; MAX_DIGEST_SIZE]) {
        match self {
            Hasher::Sha224(hasher) => output[..28].copy_from_slice(&hasher.finalize()),
            Hasher::Sha256(hasher) => output[..32].copy_from_slice(&hasher.finalize()),
            Hasher::Sha384(hasher) => output[..48].copy_from_slice(&hasher.finalize()),
            Hasher::Sha512(hasher) => output[..64].copy_from_slice(&hasher.finalize()),
        }
    }
}

enum HashState {
    Idle,
    Running(Hasher),
    Done([u8; MAX_DIGEST_SIZE]),
}

pub struct SoftwareCrypto {
    hash: HashState,
    output_size: usize,
}

impl Default for SoftwareCrypto {
    fn default() -> Self { Self::new() }
}

impl SoftwareCrypto {
    pub fn new() -> Self { Self { hash: HashState::Idle, output_size: 0 } }
}

impl HashEngine for SoftwareCrypto {
    fn hash_configure(&mut self, method: HashMethod, output_size: usize) -> Result<(), EngineError> {
        if output_size == 0 || output_size > method.digest_size() {
            return Err(EngineError::UnsupportedHash);
        }
        self.hash = HashState::Running(Hasher::new(method));
        self.output_size = output_size;
        Ok(())
    }

    fn hash_input(&mut self, block: &[u8], last: bool) -> Result<(), EngineError> {
        let HashState::Running(hasher) = &mut self.hash else {
            return Err(EngineError::InvalidOperand);
        };
        if !last && block.len() % DMA_ALIGNMENT != 0 {
            return Err(EngineError::Restriction);
        }
        hasher.update(block);

        if last {
            if let HashState::Running(hasher) = core::mem::replace(&mut self.hash, HashState::Idle) {
                let mut digest = [0u8; MAX_DIGEST_SIZE];
                hasher.finish(&mut digest);
                self.hash = HashState::Done(digest);
            }
        }
        Ok(())
    }

    fn hash_output(&mut self, output: &mut [u8]) -> Result<(), EngineError> {
        let HashState::Done(digest) = &self.hash else {
            return Err(EngineError::Busy);
        };
        if output.len() > self.output_size {
            return Err(EngineError::InvalidOperand);
        }
        output.copy_from_slice(&digest[..output.len()]);
        Ok(())
    }
}

/// Narrows a left padded operand slot to the curve width.
fn narrow(operand: &Operand, width: usize) -> Result<&[u8], EngineError> {
    let (padding, value) = operand.split_at(OPERAND_SIZE - width);
    if padding.iter().any(|&b| b != 0) {
        return Err(EngineError::InvalidOperand);
    }
    Ok(value)
}

macro_rules! verify_with {
    ($curve:ident, $operands:expr, $width:expr) => {{
        use $curve::{
            ecdsa::{Signature, VerifyingKey},
            EncodedPoint, FieldBytes,
        };
        let operands: &EcdsaOperands = $operands;
        let width: usize = $width;
        let x = narrow(&operands.public_x, width)?;
        let y = narrow(&operands.public_y, width)?;
        let point = EncodedPoint::from_affine_coordinates(
            FieldBytes::from_slice(x),
            FieldBytes::from_slice(y),
            false,
        );
        let key =
            VerifyingKey::from_encoded_point(&point).map_err(|_| EngineError::InvalidOperand)?;

        let mut signature = [0u8; 2 * OPERAND_SIZE];
        signature[..width].copy_from_slice(narrow(&operands.r, width)?);
        signature[width..2 * width].copy_from_slice(narrow(&operands.s, width)?);
        let signature = Signature::from_slice(&signature[..2 * width])
            .map_err(|_| EngineError::InvalidOperand)?;

        key.verify_prehash(narrow(&operands.hash, width)?, &signature)
            .map_err(|_| EngineError::VerificationFailed)
    }};
}

fn field(operand: &Operand) -> Result<FieldElement, EngineError> {
    let value = U256::from_le_slice(operand);
    if value >= MODULUS {
        return Err(EngineError::InvalidOperand);
    }
    Ok(FieldElement::new(&value))
}

fn to_operand(element: FieldElement) -> Operand {
    let mut operand = [0u8; OPERAND_SIZE];
    operand.copy_from_slice(&element.retrieve().to_le_bytes());
    operand
}

fn is_equal(a: FieldElement, b: FieldElement) -> bool { a.retrieve() == b.retrieve() }

/// Re-compresses an affine point and lets the curve library decode it.
fn to_dalek(point: &EdwardsPoint) -> Result<DalekPoint, EngineError> {
    let mut encoded = point.y;
    encoded[OPERAND_SIZE - 1] |= (point.x[0] & 1) << 7;
    CompressedEdwardsY(encoded).decompress().ok_or(EngineError::InvalidOperand)
}

impl EccEngine for SoftwareCrypto {
    fn ecdsa_verify(&mut self, curve: Curve, operands: &EcdsaOperands) -> Result<(), EngineError> {
        match curve {
            Curve::Secp192r1 => verify_with!(p192, operands, curve.width()),
            Curve::Secp224r1 => verify_with!(p224, operands, curve.width()),
            Curve::Secp256r1 => verify_with!(p256, operands, curve.width()),
            Curve::Edwards25519 => Err(EngineError::UnsupportedCurve),
        }
    }

    fn ed25519_recover_x(&mut self, y: &Operand) -> Result<Operand, EngineError> {
        let y = field(y)?;
        let d = FieldElement::new(&D);
        let y_squared = y * y;
        let u = y_squared - FieldElement::ONE;
        let v = d * y_squared + FieldElement::ONE;
        let x_squared = u * v.pow(&INVERT_EXPONENT);

        let mut x = x_squared.pow(&SQRT_EXPONENT);
        if !is_equal(x * x, x_squared) {
            x = x * FieldElement::new(&SQRT_M1);
        }
        if !is_equal(x * x, x_squared) {
            return Err(EngineError::InvalidOperand);
        }

        let x = to_operand(x);
        if x[0] & 1 == 1 {
            self.ed25519_negate(&x)
        } else {
            Ok(x)
        }
    }

    fn ed25519_negate(&mut self, x: &Operand) -> Result<Operand, EngineError> {
        Ok(to_operand(-field(x)?))
    }

    fn ed25519_point_on_curve(&mut self, point: &EdwardsPoint) -> Result<(), EngineError> {
        let x = field(&point.x)?;
        let y = field(&point.y)?;
        let x_squared = x * x;
        let y_squared = y * y;
        let d = FieldElement::new(&D);
        // -x^2 + y^2 == 1 + d x^2 y^2
        let left = y_squared - x_squared;
        let right = FieldElement::ONE + d * x_squared * y_squared;
        if is_equal(left, right) {
            Ok(())
        } else {
            Err(EngineError::InvalidOperand)
        }
    }

    fn ed25519_reduce(&mut self, wide: &[u8; 64]) -> Result<Operand, EngineError> {
        Ok(Scalar::from_bytes_mod_order_wide(wide).to_bytes())
    }

    fn ed25519_check_signature(
        &mut self,
        s: &Operand,
        r: &EdwardsPoint,
        a: &EdwardsPoint,
        h: &Operand,
    ) -> Result<(), EngineError> {
        let s = Option::<Scalar>::from(Scalar::from_canonical_bytes(*s))
            .ok_or(EngineError::InvalidOperand)?;
        let h = Option::<Scalar>::from(Scalar::from_canonical_bytes(*h))
            .ok_or(EngineError::InvalidOperand)?;
        let r = to_dalek(r)?;
        let a = to_dalek(a)?;

        // s·B - h·A == R
        if DalekPoint::vartime_double_scalar_mul_basepoint(&h, &(-a), &s) == r {
            Ok(())
        } else {
            Err(EngineError::VerificationFailed)
        }
    }
}
