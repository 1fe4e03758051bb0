//! True random number generation.

pub trait Entropy {
    fn fill(&mut self, bytes: &mut [u8]);
}
