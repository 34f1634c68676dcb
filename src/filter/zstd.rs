//! Zstandard decode/encode filters over `zstd::stream::raw`.

use zstd::stream::raw::{CParameter, Decoder, Encoder, InBuffer, Operation, OutBuffer};

use crate::{Error, Result};

use super::{CHUNK, FilterStep};

fn codec_err(e: std::io::Error) -> Error {
    Error::Codec(e.to_string())
}

pub(crate) struct ZstdDecode {
    ctx: Decoder<'static>,
    frame_done: bool,
}

impl ZstdDecode {
    pub fn new() -> Result<Self> {
        Ok(Self {
            ctx: Decoder::new().map_err(codec_err)?,
            frame_done: false,
        })
    }

    pub fn process(&mut self, input: &mut &[u8], fin: bool, out: &mut Vec<u8>) -> Result<FilterStep> {
        if self.frame_done && input.is_empty() {
            return Ok(FilterStep::Done);
        }

        let start = out.len();
        out.resize(start + CHUNK, 0);
        let mut inb = InBuffer::around(&input[..]);
        let mut outb = OutBuffer::around(&mut out[start..]);
        let hint = self.ctx.run(&mut inb, &mut outb).map_err(codec_err)?;
        let consumed = inb.pos;
        let produced = outb.pos();
        *input = &input[consumed..];
        out.truncate(start + produced);

        if hint == 0 {
            self.frame_done = true;
        }
        if produced > 0 {
            return Ok(FilterStep::Data);
        }
        if self.frame_done {
            return Ok(FilterStep::Done);
        }
        if fin && input.is_empty() {
            return Err(Error::Truncated);
        }
        Ok(FilterStep::More)
    }
}

pub(crate) struct ZstdEncode {
    ctx: Encoder<'static>,
    done: bool,
}

impl ZstdEncode {
    /// `level` 0 selects the library default; `workers` > 0 enables the
    /// library's internal worker pool.
    pub fn new(level: i32, workers: u32) -> Result<Self> {
        let mut ctx = Encoder::new(if level == 0 { 3 } else { level }).map_err(codec_err)?;
        if workers > 0 {
            ctx.set_parameter(CParameter::NbWorkers(workers))
                .map_err(codec_err)?;
        }
        Ok(Self { ctx, done: false })
    }

    pub fn process(&mut self, input: &mut &[u8], fin: bool, out: &mut Vec<u8>) -> Result<FilterStep> {
        if self.done {
            return Ok(FilterStep::Done);
        }

        let start = out.len();
        out.resize(start + CHUNK, 0);

        if !input.is_empty() {
            let mut inb = InBuffer::around(&input[..]);
            let mut outb = OutBuffer::around(&mut out[start..]);
            self.ctx.run(&mut inb, &mut outb).map_err(codec_err)?;
            let consumed = inb.pos;
            let produced = outb.pos();
            *input = &input[consumed..];
            out.truncate(start + produced);
            return Ok(if produced > 0 {
                FilterStep::Data
            } else {
                FilterStep::More
            });
        }

        if !fin {
            out.truncate(start);
            return Ok(FilterStep::More);
        }

        let mut outb = OutBuffer::around(&mut out[start..]);
        let remaining = self.ctx.finish(&mut outb, true).map_err(codec_err)?;
        let produced = outb.pos();
        out.truncate(start + produced);
        if produced > 0 {
            return Ok(FilterStep::Data);
        }
        if remaining == 0 {
            self.done = true;
            return Ok(FilterStep::Done);
        }
        Ok(FilterStep::More)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zstd_roundtrip() {
        let data: Vec<u8> = (0..40_000u32).map(|i| (i % 61) as u8).collect();

        let mut enc = ZstdEncode::new(3, 0).unwrap();
        let mut packed = Vec::new();
        let mut input: &[u8] = &data;
        loop {
            match enc.process(&mut input, true, &mut packed).unwrap() {
                FilterStep::Done => break,
                _ => continue,
            }
        }
        assert!(!packed.is_empty());

        let mut dec = ZstdDecode::new().unwrap();
        let mut unpacked = Vec::new();
        let mut input: &[u8] = &packed;
        loop {
            match dec.process(&mut input, true, &mut unpacked).unwrap() {
                FilterStep::Done => break,
                FilterStep::More => panic!("decoder starved"),
                _ => continue,
            }
        }
        assert_eq!(unpacked, data);
    }
}
