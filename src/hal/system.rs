//! Processor level control: resets and handing over to an application.

pub trait System {
    /// Forces a watchdog reset so the whole boot sequence is retried.
    fn reboot(&mut self) -> !;

    /// Hands control to the application whose 256 byte interrupt vector
    /// table is given. When `secure` is set, the secure boot indication
    /// is latched before the handover.
    fn start_image(&mut self, vector_table: &[u8], secure: bool) -> !;
}
