//! Pass-through filter (compression method "store").

use super::FilterStep;

pub(crate) struct Store(());

impl Store {
    pub fn new() -> Self {
        Self(())
    }

    pub fn process(&mut self, input: &mut &[u8], fin: bool, out: &mut Vec<u8>) -> FilterStep {
        if input.is_empty() {
            return if fin { FilterStep::Done } else { FilterStep::More };
        }
        out.extend_from_slice(&input[..]);
        *input = &[];
        FilterStep::Data
    }
}
