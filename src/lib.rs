//! # Secure SUOTA Loader Library
//!
//! This crate contains the secure boot path of a SUOTA (software
//! update over the air) bootloader in library form: image and
//! security extension parsing, signature verification, the OTP key
//! and minimum-version ledgers, and the state machine that decides
//! whether to apply a staged update, boot the installed image or reboot.
#![cfg_attr(test, allow(unused_imports))]
#![cfg_attr(target_arch = "arm", no_std)]

extern crate static_assertions;

#[macro_use]
pub mod utilities {
    pub mod bitwise;
    pub mod crc16;
    mod macros;
}

pub mod hal;
pub mod devices;
pub mod drivers;
pub mod ports;
pub mod error;
