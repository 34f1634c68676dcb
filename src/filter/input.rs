//! Pipeline head: slices a `(offset, size)` window off the caller's input.

use crate::Result;

use super::FilterStep;

/// The input source filter.
///
/// Holds the absolute offset and remaining size of the packed stream it
/// feeds downstream. When the caller's current offset does not match, it
/// requests a seek; otherwise it slices off up to `remaining` bytes.
pub(crate) struct InputSource {
    off: u64,
    remaining: u64,
}

impl InputSource {
    pub fn new(off: u64, size: u64) -> Self {
        Self {
            off,
            remaining: size,
        }
    }

    pub fn pull(
        &mut self,
        input: &mut &[u8],
        offset: &mut u64,
        out: &mut Vec<u8>,
    ) -> Result<FilterStep> {
        if self.remaining == 0 {
            return Ok(FilterStep::Done);
        }
        if *offset != self.off {
            *offset = self.off;
            return Ok(FilterStep::Seek(self.off));
        }
        if input.is_empty() {
            return Ok(FilterStep::More);
        }

        let n = usize::try_from(self.remaining)
            .unwrap_or(usize::MAX)
            .min(input.len());
        out.extend_from_slice(&input[..n]);
        *input = &input[n..];
        *offset += n as u64;
        self.off += n as u64;
        self.remaining -= n as u64;
        Ok(FilterStep::Data)
    }
}
