//! Hardware Abstraction Layer, containing interfaces
//! for the collaborators the loader drives: partitioned
//! flash, OTP, the crypto coprocessor, the TRNG and the
//! system control block.
#![macro_use]

pub mod crypto;
pub mod flash;
pub mod otp;
pub mod rng;
pub mod system;

#[cfg(not(target_arch = "arm"))]
#[doc(hidden)]
pub mod doubles;
