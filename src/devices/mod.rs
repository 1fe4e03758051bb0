//! Complex modules with business logic related to the problem
//! domain, that lay on top of abstract drivers. Devices are
//! generic, while board specifics (OTP layout, flash geometry) are
//! handled in the `ports` module.

pub mod bootloader;
pub mod failure;
pub mod image;
pub mod keys;
pub mod otp_map;
pub mod security_ext;
pub mod signature;
pub mod version;

#[cfg(test)]
pub mod doubles;

/// General purpose traits that summarize requirements on devices.
pub mod traits {
    use crate::{error, hal::flash};
    use marker_blanket::marker_blanket;

    /// A supported image partition must be able to read, write, erase,
    /// map and report errors to the bootloader.
    #[marker_blanket]
    pub trait Storage: flash::Partition<Error: error::Convertible> {}
}
