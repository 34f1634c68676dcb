//! Streaming `.tar` reader.

use crate::archive_path::{Normalize, normalize};
use crate::error::{TarDefect, Warning};
use crate::event::ReadEvent;
use crate::gather::Gather;
use crate::{Error, Result};

use super::fmt::{self, RECORD, TarEntry, TarType};

/// Longest accepted GNU long-name payload.
const NAME_MAX: u64 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Header,
    HeaderCont,
    LongName,
    SkipExt,
    Data,
    Padding,
    FileDone,
    Fin,
    Done,
}

/// Pull-style `.tar` reader.
pub struct TarReader {
    state: State,
    gather: Gather,
    offset: u64,
    size_left: u64,
    skip_left: u64,
    fin_left: u64,
    entry: TarEntry,
    pending_long_name: Option<String>,
    started: bool,
}

impl Default for TarReader {
    fn default() -> Self {
        Self::new()
    }
}

impl TarReader {
    /// Creates a reader.
    pub fn new() -> Self {
        Self {
            state: State::Header,
            gather: Gather::new(),
            offset: 0,
            size_left: 0,
            skip_left: 0,
            fin_left: 0,
            entry: TarEntry::default(),
            pending_long_name: None,
            started: false,
        }
    }

    /// Current logical input offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Info for the entry announced by the last `FileHeader` event.
    pub fn entry(&self) -> &TarEntry {
        &self.entry
    }

    fn fill(&mut self, input: &mut &[u8]) -> bool {
        self.offset += self.gather.fill(input) as u64;
        self.gather.ready()
    }

    /// Reads the next chunk. File bytes are appended to `out`, which is
    /// cleared on entry.
    pub fn process(&mut self, input: &mut &[u8], out: &mut Vec<u8>) -> Result<ReadEvent> {
        out.clear();

        loop {
            match self.state {
                State::Header => {
                    if !self.started {
                        self.started = true;
                        self.gather.request(RECORD);
                    }
                    if !self.fill(input) {
                        return Ok(ReadEvent::More);
                    }
                    let d = self.gather.take();

                    if d[0] == 0 {
                        // first of the two terminating zero records
                        if !d.iter().all(|&b| b == 0) {
                            return Err(Error::BadStructure("nonzero bytes in tar terminator"));
                        }
                        self.fin_left = RECORD as u64;
                        self.gather.request(RECORD);
                        self.state = State::Fin;
                        continue;
                    }

                    let (entry, defects) = fmt::header_read(&d)?;
                    self.entry = entry;
                    self.state = State::HeaderCont;
                    if defects.any() {
                        let defect = if defects.number {
                            TarDefect::BadNumber
                        } else if defects.checksum {
                            TarDefect::BadChecksum
                        } else {
                            TarDefect::UnexpectedData
                        };
                        return Ok(ReadEvent::Warning(Warning::TarHeader(defect)));
                    }
                }

                State::HeaderCont => {
                    match self.entry.entry_type {
                        TarType::LongName => {
                            if self.pending_long_name.is_some() {
                                return Err(Error::BadStructure(
                                    "two consecutive tar long-name records",
                                ));
                            }
                            if self.entry.size > NAME_MAX {
                                return Err(Error::NameInvalid("tar long name over 4096 bytes"));
                            }
                            let padded = (self.entry.size as usize).div_ceil(RECORD) * RECORD;
                            self.gather.request(padded);
                            self.state = State::LongName;
                            continue;
                        }
                        TarType::GlobalExt | TarType::ExtHeader => {
                            self.skip_left = self.entry.size.div_ceil(RECORD as u64) * RECORD as u64;
                            self.state = State::SkipExt;
                            continue;
                        }
                        _ => {}
                    }

                    if let Some(name) = self.pending_long_name.take() {
                        self.entry.name = name;
                    }
                    self.entry.name = normalize(
                        &self.entry.name,
                        Normalize {
                            simple: true,
                            ..Normalize::default()
                        },
                    );

                    log::debug!(
                        "tar entry: {:?} {} ({} bytes)",
                        self.entry.entry_type,
                        self.entry.name,
                        self.entry.size
                    );

                    self.size_left = self.entry.size;
                    self.state = if self.entry.size == 0 {
                        State::FileDone
                    } else {
                        State::Data
                    };
                    return Ok(ReadEvent::FileHeader);
                }

                State::LongName => {
                    if !self.fill(input) {
                        return Ok(ReadEvent::More);
                    }
                    let d = self.gather.take();
                    let name = &d[..self.entry.size as usize];
                    self.pending_long_name =
                        Some(String::from_utf8_lossy(name).into_owned());
                    self.gather.request(RECORD);
                    self.state = State::Header;
                }

                State::SkipExt => {
                    let n = usize::try_from(self.skip_left)
                        .unwrap_or(usize::MAX)
                        .min(input.len());
                    *input = &input[n..];
                    self.offset += n as u64;
                    self.skip_left -= n as u64;
                    if self.skip_left != 0 {
                        return Ok(ReadEvent::More);
                    }
                    self.gather.request(RECORD);
                    self.state = State::Header;
                }

                State::Data => {
                    if input.is_empty() {
                        return Ok(ReadEvent::More);
                    }
                    let n = usize::try_from(self.size_left)
                        .unwrap_or(usize::MAX)
                        .min(input.len());
                    out.extend_from_slice(&input[..n]);
                    *input = &input[n..];
                    self.offset += n as u64;
                    self.size_left -= n as u64;

                    if self.size_left == 0 {
                        let rem = (self.entry.size % RECORD as u64) as usize;
                        if rem == 0 {
                            self.state = State::FileDone;
                        } else {
                            self.gather.request(RECORD - rem);
                            self.state = State::Padding;
                        }
                    }
                    return Ok(ReadEvent::Data);
                }

                State::Padding => {
                    if !self.fill(input) {
                        return Ok(ReadEvent::More);
                    }
                    let d = self.gather.take();
                    if !d.iter().all(|&b| b == 0) {
                        return Err(Error::BadStructure("nonzero tar data padding"));
                    }
                    self.state = State::FileDone;
                }

                State::FileDone => {
                    self.gather.request(RECORD);
                    self.state = State::Header;
                    return Ok(ReadEvent::FileDone);
                }

                State::Fin => {
                    if !self.fill(input) {
                        return Ok(ReadEvent::More);
                    }
                    let d = self.gather.take();
                    if !d.iter().all(|&b| b == 0) {
                        return Err(Error::BadStructure("nonzero bytes in tar terminator"));
                    }
                    self.fin_left -= RECORD as u64;
                    if self.fin_left != 0 {
                        self.gather.request(RECORD);
                        continue;
                    }
                    self.state = State::Done;
                }

                State::Done => return Ok(ReadEvent::Done),
            }
        }
    }
}
