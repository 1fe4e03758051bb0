//! Interfaces to the AES/HASH and ECC coprocessors.
//!
//! Each operation is a blocking, self-contained call: implementations
//! load whatever curve parameters or microcode they need on every call
//! and keep no state between unrelated operations, apart from an
//! in-progress hash.
use marker_blanket::marker_blanket;

/// Width in bytes of a single operand slot.
pub const OPERAND_SIZE: usize = 32;

/// A single engine operand. ECDSA operands are big endian and left padded
/// with zeroes, Ed25519 operands are little endian.
pub type Operand = [u8; OPERAND_SIZE];

/// Digests supported by the hash engine.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum HashMethod {
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl HashMethod {
    /// Full digest length in bytes.
    pub fn digest_size(self) -> usize {
        match self {
            HashMethod::Sha224 => 28,
            HashMethod::Sha256 => 32,
            HashMethod::Sha384 => 48,
            HashMethod::Sha512 => 64,
        }
    }
}

/// Curves supported by the ECC engine.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum Curve {
    Secp192r1,
    Secp224r1,
    Secp256r1,
    Edwards25519,
}

impl Curve {
    /// Byte width of a field element on this curve.
    pub fn width(self) -> usize {
        match self {
            Curve::Secp192r1 => 24,
            Curve::Secp224r1 => 28,
            Curve::Secp256r1 | Curve::Edwards25519 => 32,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum EngineError {
    /// The engine did not become ready.
    Busy,
    /// A non-final hash block was not a multiple of 8 bytes long.
    Restriction,
    /// An operand was malformed, out of range, or not a curve point.
    InvalidOperand,
    UnsupportedCurve,
    UnsupportedHash,
    /// The operation completed and reported a mismatch.
    VerificationFailed,
}

/// Affine Edwards point, both coordinates little endian.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EdwardsPoint {
    pub x: Operand,
    pub y: Operand,
}

/// Operands for a single ECDSA verification, in engine slot order.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct EcdsaOperands {
    pub public_x: Operand,
    pub public_y: Operand,
    pub r: Operand,
    pub s: Operand,
    pub hash: Operand,
}

/// DMA driven SHA-2 engine.
pub trait HashEngine {
    /// Starts a new digest, discarding any previous one.
    fn hash_configure(&mut self, method: HashMethod, output_size: usize) -> Result<(), EngineError>;

    /// Feeds one block of input. Every block but the last must be a
    /// multiple of 8 bytes long.
    fn hash_input(&mut self, block: &[u8], last: bool) -> Result<(), EngineError>;

    /// Copies out the first `output.len()` bytes of the finished digest.
    fn hash_output(&mut self, output: &mut [u8]) -> Result<(), EngineError>;
}

/// Modular arithmetic engine.
pub trait EccEngine {
    /// Runs ECDSA verification on one of the NIST curves. Succeeds only
    /// if the engine reports no error bits.
    fn ecdsa_verify(&mut self, curve: Curve, operands: &EcdsaOperands) -> Result<(), EngineError>;

    /// Computes the even-parity x coordinate matching `y` on edwards25519.
    fn ed25519_recover_x(&mut self, y: &Operand) -> Result<Operand, EngineError>;

    /// Computes `-x mod p`.
    fn ed25519_negate(&mut self, x: &Operand) -> Result<Operand, EngineError>;

    fn ed25519_point_on_curve(&mut self, point: &EdwardsPoint) -> Result<(), EngineError>;

    /// Reduces a 64 byte little endian integer modulo the group order.
    fn ed25519_reduce(&mut self, wide: &[u8; 64]) -> Result<Operand, EngineError>;

    /// Checks `s·B == R + h·A`.
    fn ed25519_check_signature(
        &mut self,
        s: &Operand,
        r: &EdwardsPoint,
        a: &EdwardsPoint,
        h: &Operand,
    ) -> Result<(), EngineError>;
}

/// A complete crypto backend offers both engines.
#[marker_blanket]
pub trait CryptoEngine: HashEngine + EccEngine {}
