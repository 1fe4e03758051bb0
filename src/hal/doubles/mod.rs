//! Host side test doubles for the hardware abstraction layer.
pub mod error;
pub mod flash;
pub mod otp;
pub mod rng;
pub mod system;
