//! Raw-deflate encode filter over `flate2::Compress`.

use flate2::{Compress, Compression, FlushCompress, Status};

use crate::{Error, Result};

use super::{CHUNK, FilterStep};

pub(crate) struct Deflate {
    ctx: Compress,
    done: bool,
}

impl Deflate {
    /// Creates a raw-deflate encoder (no zlib wrapper).
    ///
    /// `level` 0 selects the library default.
    pub fn new(level: u32) -> Self {
        let level = if level == 0 {
            Compression::default()
        } else {
            Compression::new(level.min(9))
        };
        Self {
            ctx: Compress::new(level, false),
            done: false,
        }
    }

    pub fn process(&mut self, input: &mut &[u8], fin: bool, out: &mut Vec<u8>) -> Result<FilterStep> {
        if self.done {
            return Ok(FilterStep::Done);
        }

        let before_in = self.ctx.total_in();
        let before_out = self.ctx.total_out();
        let start = out.len();
        out.resize(start + CHUNK, 0);

        let flush = if fin {
            FlushCompress::Finish
        } else {
            FlushCompress::None
        };
        let status = self
            .ctx
            .compress(&input[..], &mut out[start..], flush)
            .map_err(|e| Error::Codec(e.to_string()))?;

        let consumed = (self.ctx.total_in() - before_in) as usize;
        let produced = (self.ctx.total_out() - before_out) as usize;
        *input = &input[consumed..];
        out.truncate(start + produced);

        match status {
            Status::StreamEnd => {
                self.done = true;
                if produced > 0 {
                    Ok(FilterStep::Data)
                } else {
                    Ok(FilterStep::Done)
                }
            }
            _ if produced > 0 => Ok(FilterStep::Data),
            _ => Ok(FilterStep::More),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::inflate::Inflate;
    use super::*;

    #[test]
    fn deflate_inflate_roundtrip() {
        let data: Vec<u8> = (0..50_000u32).map(|i| (i * 31 % 251) as u8).collect();

        let mut enc = Deflate::new(6);
        let mut packed = Vec::new();
        let mut input: &[u8] = &data;
        loop {
            match enc.process(&mut input, true, &mut packed).unwrap() {
                FilterStep::Done => break,
                _ => continue,
            }
        }
        assert!(packed.len() < data.len());

        let mut dec = Inflate::new();
        let mut unpacked = Vec::new();
        let mut input: &[u8] = &packed;
        loop {
            match dec.process(&mut input, false, &mut unpacked).unwrap() {
                FilterStep::Done => break,
                FilterStep::More => panic!("decoder starved"),
                _ => continue,
            }
        }
        assert_eq!(unpacked, data);
    }

    #[test]
    fn inflate_leaves_trailing_bytes() {
        let mut enc = Deflate::new(6);
        let mut packed = Vec::new();
        let mut input: &[u8] = b"payload";
        while !matches!(
            enc.process(&mut input, true, &mut packed).unwrap(),
            FilterStep::Done
        ) {}
        packed.extend_from_slice(b"TRAILER!");

        let mut dec = Inflate::new();
        let mut out = Vec::new();
        let mut input: &[u8] = &packed;
        loop {
            match dec.process(&mut input, false, &mut out).unwrap() {
                FilterStep::Done => break,
                FilterStep::More => panic!("decoder starved"),
                _ => continue,
            }
        }
        assert_eq!(out, b"payload");
        assert_eq!(input, b"TRAILER!");
    }
}
