//! Streaming `.gz` writer.

use crate::checksum::Crc32;
use crate::event::WriteEvent;
use crate::filter::FilterStep;
use crate::filter::deflate::Deflate;
use crate::{Error, Result};

use super::fmt;

/// Configuration for one `.gz` member.
#[derive(Debug, Clone, Default)]
pub struct GzWriterConfig {
    /// Deflate level 1..=9; 0 selects the library default.
    pub deflate_level: u32,
    /// Original file name; must not contain NUL.
    pub name: Vec<u8>,
    /// Comment; must not contain NUL.
    pub comment: Vec<u8>,
    /// Modification time, seconds since 1970.
    pub mtime: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Header,
    Data,
    Trailer,
    Done,
}

/// Push-style `.gz` writer for a single member.
///
/// Concatenated files are produced by running one writer per member and
/// appending the outputs.
pub struct GzWriter {
    state: State,
    header: Vec<u8>,
    deflate: Deflate,
    crc: Crc32,
    total_rd: u64,
    finished: bool,
}

impl GzWriter {
    /// Creates a writer.
    ///
    /// # Errors
    ///
    /// Fails if the name or comment contains a NUL byte.
    pub fn new(conf: &GzWriterConfig) -> Result<Self> {
        if conf.name.contains(&0) || conf.comment.contains(&0) {
            return Err(Error::NameInvalid("gz name/comment contains NUL"));
        }
        let mut header = Vec::new();
        fmt::header_write(&conf.name, &conf.comment, conf.mtime, &mut header);
        Ok(Self {
            state: State::Header,
            header,
            deflate: Deflate::new(conf.deflate_level),
            crc: Crc32::new(),
            total_rd: 0,
            finished: false,
        })
    }

    /// Declares that all input data has been supplied.
    pub fn finish(&mut self) {
        self.finished = true;
    }

    /// Writes the next chunk. Output bytes are appended to `out`, which is
    /// cleared on entry.
    pub fn process(&mut self, input: &mut &[u8], out: &mut Vec<u8>) -> Result<WriteEvent> {
        out.clear();

        loop {
            match self.state {
                State::Header => {
                    out.append(&mut self.header);
                    self.state = State::Data;
                    return Ok(WriteEvent::Data);
                }

                State::Data => {
                    let before: &[u8] = *input;
                    let step = self.deflate.process(input, self.finished, out)?;
                    let consumed = before.len() - input.len();
                    self.crc.update(&before[..consumed]);
                    self.total_rd += consumed as u64;

                    match step {
                        FilterStep::More => return Ok(WriteEvent::More),
                        FilterStep::Data => return Ok(WriteEvent::Data),
                        FilterStep::Done => self.state = State::Trailer,
                        FilterStep::Seek(_) => {
                            return Err(Error::NotReady("unexpected seek from deflate"));
                        }
                    }
                }

                State::Trailer => {
                    fmt::trailer_write(self.crc.value(), self.total_rd as u32, out);
                    self.state = State::Done;
                    return Ok(WriteEvent::Data);
                }

                State::Done => return Ok(WriteEvent::Done),
            }
        }
    }
}
