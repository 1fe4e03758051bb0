use crate::hal::system::System;

/// Diverges by panicking, so tests can observe the final decision with
/// `#[should_panic]`.
#[derive(Default)]
pub struct FakeSystem;

impl System for FakeSystem {
    fn reboot(&mut self) -> ! { panic!("watchdog reboot requested") }

    fn start_image(&mut self, vector_table: &[u8], secure: bool) -> ! {
        panic!(
            "starting image with reset vector {:#010x} (secure: {})",
            u32::from_le_bytes([vector_table[4], vector_table[5], vector_table[6], vector_table[7]]),
            secure
        )
    }
}
