//! Convenience macros for the secure loader.
#![macro_use]

/// Emits a diagnostic trace line.
///
/// Traces are routed through `defmt` on target builds and compile to
/// nothing on the host, so they cost neither flash nor time in tests.
///
/// # Example
/// ```ignore
/// trace!("Checking image CRC");
/// trace!("Revoking key at {=u32:#x}", address);
/// ```
#[macro_export]
macro_rules! trace {
    ($($arg:tt)+) => {{
        #[cfg(target_arch = "arm")]
        defmt::info!($($arg)+);
    }};
}

/// Same as [`trace!`], but for conditions worth flagging as suspicious.
#[macro_export]
macro_rules! trace_warn {
    ($($arg:tt)+) => {{
        #[cfg(target_arch = "arm")]
        defmt::warn!($($arg)+);
    }};
}
