//! Terminal clip filter.
//!
//! Cuts an upstream stream to an exact `(absolute_offset, size)` window in
//! the producer's output coordinates, so unpackers may over-produce and
//! get truncated deterministically. The pipeline terminates exactly when
//! the window is exhausted.

use super::FilterStep;

pub(crate) struct Bounds {
    start: u64,
    size: u64,
    /// Absolute position in upstream output coordinates consumed so far.
    read: u64,
}

impl Bounds {
    pub fn new(start: u64, size: u64) -> Self {
        Self {
            start,
            size,
            read: 0,
        }
    }

    /// Re-aims the window without resetting the consumed position, so a
    /// pipeline can serve several sub-files of one unpacked stream.
    pub fn reset(&mut self, start: u64, size: u64) {
        self.start = start;
        self.size = size;
    }

    pub fn process(&mut self, input: &mut &[u8], out: &mut Vec<u8>) -> FilterStep {
        let end = self.start + self.size;
        let in_start = self.read;
        let in_end = in_start + input.len() as u64;

        let l = in_start.max(self.start).min(in_end);
        let r = end.min(in_end).max(l);
        let consumed = (r - in_start) as usize;

        let slice = &input[(l - in_start) as usize..consumed];
        if slice.is_empty() {
            *input = &input[consumed..];
            self.read += consumed as u64;
            if self.read == end {
                return FilterStep::Done;
            }
            return FilterStep::More;
        }

        out.extend_from_slice(slice);
        *input = &input[consumed..];
        self.read += consumed as u64;
        FilterStep::Data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(b: &mut Bounds, data: &[u8]) -> (Vec<u8>, FilterStep) {
        let mut out = Vec::new();
        let mut input = data;
        loop {
            match b.process(&mut input, &mut out) {
                FilterStep::Data => continue,
                step => return (out, step),
            }
        }
    }

    #[test]
    fn clips_middle_window() {
        let mut b = Bounds::new(3, 4);
        let (out, step) = feed(&mut b, b"0123456789");
        assert_eq!(out, b"3456");
        assert_eq!(step, FilterStep::Done);
    }

    #[test]
    fn spans_chunks() {
        let mut b = Bounds::new(3, 4);
        let (out, step) = feed(&mut b, b"0123");
        assert_eq!(out, b"3");
        assert_eq!(step, FilterStep::More);
        let (out, step) = feed(&mut b, b"456789");
        assert_eq!(out, b"456");
        assert_eq!(step, FilterStep::Done);
    }

    #[test]
    fn empty_window_is_done() {
        let mut b = Bounds::new(0, 0);
        let (out, step) = feed(&mut b, b"abc");
        assert_eq!(out, b"");
        assert_eq!(step, FilterStep::Done);
    }
}
