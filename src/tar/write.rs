//! Streaming `.tar` writer.

use crate::archive_path::{Normalize, normalize};
use crate::event::WriteEvent;
use crate::{Error, Result};

use super::fmt::{self, RECORD, TarEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    NewFile,
    Header,
    Data,
    Padding,
    FileDone,
    Footer,
    Done,
}

/// Push-style `.tar` writer.
///
/// For every entry: [`TarWriter::add_file`], push the data through
/// [`TarWriter::process`], then [`TarWriter::finish_file`]. Close the
/// archive with [`TarWriter::finish`].
pub struct TarWriter {
    state: State,
    header: Vec<u8>,
    fsize: u64,
    fsize_hdr: u64,
    file_fin: bool,
    arc_fin: bool,
}

impl Default for TarWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl TarWriter {
    /// Creates a writer.
    pub fn new() -> Self {
        Self {
            state: State::NewFile,
            header: Vec::new(),
            fsize: 0,
            fsize_hdr: 0,
            file_fin: false,
            arc_fin: false,
        }
    }

    /// Prepares the next entry. Long names get a GNU long-name record.
    pub fn add_file(&mut self, meta: &TarEntry) -> Result<()> {
        if self.state != State::NewFile {
            return Err(Error::NotReady("previous tar entry is not finished"));
        }

        let mut name = normalize(
            &meta.name,
            Normalize {
                windows_separators: true,
                force_slash: true,
                simple: true,
                disk_letter: true,
            },
        );
        let dir = meta.mode & 0o170000 == 0o040000;
        if dir && !name.is_empty() && !name.ends_with('/') {
            name.push('/');
        }

        let entry = TarEntry {
            name,
            ..meta.clone()
        };
        self.header = fmt::header_write(&entry)?;
        self.fsize_hdr = if dir { 0 } else { meta.size };
        self.state = State::Header;
        Ok(())
    }

    /// Declares the current entry's data complete.
    pub fn finish_file(&mut self) {
        self.file_fin = true;
    }

    /// Declares the archive complete.
    pub fn finish(&mut self) {
        self.arc_fin = true;
    }

    /// Writes the next chunk. Output bytes are appended to `out`, which is
    /// cleared on entry.
    pub fn process(&mut self, input: &mut &[u8], out: &mut Vec<u8>) -> Result<WriteEvent> {
        out.clear();

        loop {
            match self.state {
                State::NewFile => {
                    if self.arc_fin {
                        self.state = State::Footer;
                        continue;
                    }
                    return Err(Error::NotReady("no tar entry added"));
                }

                State::Header => {
                    out.append(&mut self.header);
                    self.fsize = 0;
                    self.state = State::Data;
                    return Ok(WriteEvent::Data);
                }

                State::Data => {
                    if input.is_empty() {
                        if self.file_fin {
                            self.state = State::Padding;
                            continue;
                        }
                        return Ok(WriteEvent::More);
                    }
                    out.extend_from_slice(&input[..]);
                    self.fsize += input.len() as u64;
                    *input = &[];
                    return Ok(WriteEvent::Data);
                }

                State::Padding => {
                    let rem = (self.fsize % RECORD as u64) as usize;
                    self.state = State::FileDone;
                    if rem != 0 {
                        out.resize(RECORD - rem, 0);
                        return Ok(WriteEvent::Data);
                    }
                }

                State::FileDone => {
                    if self.fsize != self.fsize_hdr {
                        return Err(Error::BadStructure(
                            "tar data size doesn't match the size in the header",
                        ));
                    }
                    self.file_fin = false;
                    self.state = State::NewFile;
                    return Ok(WriteEvent::FileDone);
                }

                State::Footer => {
                    out.resize(3 * RECORD, 0);
                    self.state = State::Done;
                    return Ok(WriteEvent::Data);
                }

                State::Done => return Ok(WriteEvent::Done),
            }
        }
    }
}
