//! Image signature verification on top of the crypto engine.
//!
//! Both schemes sign the same logical message: the device administration
//! section immediately followed by the executable. The two halves live in
//! different places, so they are streamed into the hash engine as
//! separate blocks (see [`hash_message`]).
use super::security_ext::{SecurityHeader, SignatureMode};
use crate::hal::crypto::{CryptoEngine, EngineError, HashEngine};

mod ecdsa;
mod ed25519;

/// Non-final hash engine blocks must be a multiple of this many bytes.
pub const HASH_BLOCK_ALIGNMENT: usize = 8;

/// Verifies `signature` over `device_administration ++ exec`, using the
/// algorithms named in `header` and the raw root key bytes `public_key`.
/// Any malformed input or engine failure counts as a bad signature.
pub fn verify_signature<E: CryptoEngine>(
    engine: &mut E,
    header: &SecurityHeader,
    public_key: &[u8],
    device_administration: &[u8],
    exec: &[u8],
    signature: &[u8],
) -> bool {
    let verified = match header.mode {
        SignatureMode::Eddsa => ed25519::verify(
            engine,
            header.hash,
            public_key,
            device_administration,
            exec,
            signature,
        ),
        SignatureMode::Ecdsa => ecdsa::verify(
            engine,
            header.curve,
            header.hash,
            public_key,
            device_administration,
            exec,
            signature,
        ),
    };

    verified.unwrap_or_else(|_error| {
        trace_warn!("Signature check aborted by the crypto engine: {}", _error);
        false
    })
}

/// Streams `first ++ second` into an already configured hash engine as the
/// final part of the message.
///
/// The tail of `first` that does not fill a whole aligned block is glued to
/// the head of `second` in a small stack buffer, so every block but the
/// last keeps the engine's alignment.
pub(crate) fn hash_message<H: HashEngine>(
    engine: &mut H,
    first: &[u8],
    second: &[u8],
) -> Result<(), EngineError> {
    let aligned = first.len() - first.len() % HASH_BLOCK_ALIGNMENT;
    let (head, tail) = first.split_at(aligned);
    if !head.is_empty() {
        engine.hash_input(head, false)?;
    }

    if tail.is_empty() {
        return engine.hash_input(second, true);
    }

    let mut glue = [0u8; HASH_BLOCK_ALIGNMENT];
    let borrowed = (HASH_BLOCK_ALIGNMENT - tail.len()).min(second.len());
    glue[..tail.len()].copy_from_slice(tail);
    glue[tail.len()..tail.len() + borrowed].copy_from_slice(&second[..borrowed]);
    let glue = &glue[..tail.len() + borrowed];

    let rest = &second[borrowed..];
    if rest.is_empty() {
        engine.hash_input(glue, true)
    } else {
        engine.hash_input(glue, false)?;
        engine.hash_input(rest, true)
    }
}
