/// Wrapping 32 bit sum of bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Checksum(pub(crate) u32);

impl Checksum {
    pub const fn new() -> Self {
        Checksum(0)
    }

    pub fn update(&mut self, bytes: &[u8]) -> &mut Self {
        for byte in bytes {
            self.0 = self.0.wrapping_add(u32::from(*byte));
        }
        self
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    pub fn of(bytes: &[u8]) -> u32 {
        let mut sum = Checksum::new();
        sum.update(bytes);
        sum.value()
    }
}
