//! Pass-through filter accumulating a CRC-32 of everything that crosses it.

use crate::checksum::Crc32;

use super::FilterStep;

pub(crate) struct Crc32Tap {
    crc: Crc32,
}

impl Crc32Tap {
    pub fn new() -> Self {
        Self { crc: Crc32::new() }
    }

    pub fn value(&self) -> u32 {
        self.crc.value()
    }

    pub fn reset(&mut self) {
        self.crc.reset();
    }

    pub fn process(&mut self, input: &mut &[u8], fin: bool, out: &mut Vec<u8>) -> FilterStep {
        if input.is_empty() {
            return if fin { FilterStep::Done } else { FilterStep::More };
        }
        self.crc.update(&input[..]);
        out.extend_from_slice(&input[..]);
        *input = &[];
        FilterStep::Data
    }
}
