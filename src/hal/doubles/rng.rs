use crate::hal::rng::Entropy;

/// Deterministic xorshift stream standing in for the TRNG.
pub struct FakeEntropy {
    state: u32,
}

impl FakeEntropy {
    pub fn new(seed: u32) -> Self { Self { state: seed.max(1) } }
}

impl Entropy for FakeEntropy {
    fn fill(&mut self, bytes: &mut [u8]) {
        for byte in bytes {
            self.state ^= self.state << 13;
            self.state ^= self.state >> 17;
            self.state ^= self.state << 5;
            *byte = self.state as u8;
        }
    }
}
