//! Driver implementations for the hardware abstraction layer.
//!
//! The only driver that lives in this crate is the software crypto
//! engine. It backs the host tests and stands in for the AES/HASH and
//! ECC coprocessors on parts that lack them.

pub mod software_crypto;
