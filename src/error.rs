//! Error types for the secure loader as a whole.
use core::fmt;

/// Top level error type for the loader. Unlike the policy level
/// [failure reasons](crate::devices::failure::FailureReason), which describe
/// why an image or the device was rejected, these describe why an operation
/// could not be carried out at all.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum Error {
    /// Error caused by a low level peripheral driver
    DriverError(&'static str),
    /// Error caused by a faulty configuration
    ConfigurationError(&'static str),
    /// Error caused by a high level device driver
    DeviceError(&'static str),
    PartitionUnavailable,
    HeaderInvalid,
    ImageUnmapped,
    SecurityExtensionInvalid,
    KeyIdInvalid,
    OtpReadFailed,
    OtpWriteFailed,
}

/// Driver level errors implement this to become a top level [`Error`].
pub trait Convertible {
    fn into(self) -> Error;
}

impl<T: Convertible> From<T> for Error {
    fn from(t: T) -> Self { t.into() }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::DriverError(text) => write!(f, "[Driver Error] -> {}", text),
            Error::ConfigurationError(text) => write!(f, "[Configuration Error] -> {}", text),
            Error::DeviceError(text) => write!(f, "[Device Error] -> {}", text),
            Error::PartitionUnavailable => {
                write!(f, "[Logic Error] -> Partition missing from the partition table")
            }
            Error::HeaderInvalid => write!(f, "[Logic Error] -> Image header is malformed"),
            Error::ImageUnmapped => {
                write!(f, "[Logic Error] -> Image region could not be memory mapped")
            }
            Error::SecurityExtensionInvalid => {
                write!(f, "[Logic Error] -> Security extension is malformed")
            }
            Error::KeyIdInvalid => write!(f, "[Logic Error] -> Key identifier out of range"),
            Error::OtpReadFailed => write!(f, "[Device Error] -> OTP read failed"),
            Error::OtpWriteFailed => write!(f, "[Device Error] -> OTP write failed"),
        }
    }
}
