//! Raw-deflate decode filter over `flate2::Decompress`.

use flate2::{Decompress, FlushDecompress, Status};

use crate::{Error, Result};

use super::{CHUNK, FilterStep};

pub(crate) struct Inflate {
    ctx: Decompress,
    done: bool,
}

impl Inflate {
    /// Creates a raw-deflate decoder (no zlib wrapper).
    pub fn new() -> Self {
        Self {
            ctx: Decompress::new(false),
            done: false,
        }
    }

    /// Resets for the next deflate stream (concatenated gz members, the
    /// next zip entry).
    pub fn reset(&mut self) {
        self.ctx.reset(false);
        self.done = false;
    }

    pub fn process(&mut self, input: &mut &[u8], fin: bool, out: &mut Vec<u8>) -> Result<FilterStep> {
        if self.done {
            return Ok(FilterStep::Done);
        }

        let before_in = self.ctx.total_in();
        let before_out = self.ctx.total_out();
        let start = out.len();
        out.resize(start + CHUNK, 0);

        let flush = if fin && input.is_empty() {
            FlushDecompress::Finish
        } else {
            FlushDecompress::None
        };
        let status = self
            .ctx
            .decompress(&input[..], &mut out[start..], flush)
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
