//! Streaming ISO-9660 reader.

use crate::archive_path::normalize_name;
use crate::event::ReadEvent;
use crate::gather::Gather;
use crate::text;
use crate::{Error, Result};

use super::fmt::{self, IsoEntry, SECTOR};

/// Reader behavior switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct IsoReaderOptions {
    /// Ignore a Joliet supplementary volume descriptor.
    pub no_joliet: bool,
    /// Ignore Rock-Ridge records.
    pub no_rock_ridge: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SeekPrimary,
    Primary,
    VolDesc,
    EntrySeek,
    Entry,
    FileSeek,
    FileData,
    FileDone,
}

/// Pull-style ISO-9660 reader.
///
/// Directory entries are enumerated breadth-first and surfaced with
/// `FileHeader` events while being collected into [`IsoReader::entries`].
/// After the `Done` event the caller picks entries and starts per-file
/// streams with [`IsoReader::read_file`].
pub struct IsoReader {
    state: State,
    options: IsoReaderOptions,
    gather: Gather,
    offset: u64,
    sector: Vec<u8>,
    spos: usize,
    fsize: u64,
    root_start: u64,
    root_size: u64,
    joliet: bool,
    entries: Vec<IsoEntry>,
    cursor: usize,
    curdir: Option<usize>,
    current: IsoEntry,
}

impl IsoReader {
    /// Creates a reader.
    pub fn new(options: IsoReaderOptions) -> Self {
        Self {
            state: State::SeekPrimary,
            options,
            gather: Gather::new(),
            offset: 0,
            sector: Vec::new(),
            spos: 0,
            fsize: 0,
            root_start: 0,
            root_size: 0,
            joliet: false,
            entries: Vec::new(),
            cursor: 0,
            curdir: None,
            current: IsoEntry::default(),
        }
    }

    /// Current logical input offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The entry announced by the last `FileHeader` event.
    pub fn entry(&self) -> &IsoEntry {
        &self.current
    }

    /// All entries enumerated so far, in emission order.
    pub fn entries(&self) -> &[IsoEntry] {
        &self.entries
    }

    /// Starts streaming the data of an enumerated entry.
    pub fn read_file(&mut self, index: usize) -> Result<()> {
        let f = self
            .entries
            .get(index)
            .ok_or(Error::NotReady("entry index out of range"))?;
        if f.is_dir() || f.size == 0 {
            self.state = State::FileDone;
            return Ok(());
        }
        self.offset = f.offset;
        self.fsize = f.size;
        self.state = State::FileSeek;
        Ok(())
    }

    fn fill(&mut self, input: &mut &[u8]) -> bool {
        self.offset += self.gather.fill(input) as u64;
        self.gather.ready()
    }

    /// Picks the next directory whose contents have not been walked yet.
    fn next_dir(&mut self) -> Option<usize> {
        while self.cursor < self.entries.len() {
            let i = self.cursor;
            self.cursor += 1;
            if self.entries[i].is_dir() {
                return Some(i);
            }
        }
        None
    }

    /// Reads the next chunk. File bytes are appended to `out`, which is
    /// cleared on entry.
    pub fn process(&mut self, input: &mut &[u8], out: &mut Vec<u8>) -> Result<ReadEvent> {
        out.clear();

        loop {
            match self.state {
                State::SeekPrimary => {
                    self.offset = 16 * SECTOR as u64;
                    self.gather.request(SECTOR);
                    self.state = State::Primary;
                    return Ok(ReadEvent::Seek(self.offset));
                }

                State::Primary => {
                    if !self.fill(input) {
                        return Ok(ReadEvent::More);
                    }
                    let d = self.gather.take();
                    if d[0] != fmt::VD_PRIMARY {
                        return Err(Error::BadStructure("no primary volume descriptor"));
                    }
                    let root = fmt::voldesc_prim_read(&d)?;
                    self.root_start = root.offset;
                    self.root_size = root.size;
                    self.gather.request(SECTOR);
                    self.state = State::VolDesc;
                }

                State::VolDesc => {
                    if !self.fill(input) {
                        return Ok(ReadEvent::More);
                    }
                    let d = self.gather.take();
                    let vd_type = d[0];
                    log::debug!("iso volume descriptor type {vd_type:#x}");

                    if vd_type == fmt::VD_JOLIET && !self.options.no_joliet {
                        if let Ok(root) = fmt::voldesc_prim_read(&d) {
                            self.root_start = root.offset;
                            self.root_size = root.size;
                            self.joliet = true;
                        }
                    } else if vd_type == fmt::VD_TERMINATOR {
                        self.offset = self.root_start;
                        self.fsize = self.root_size;
                        self.curdir = None;
                        self.state = State::EntrySeek;
                        return Ok(ReadEvent::Info);
                    }
                    self.gather.request(SECTOR);
                }

                State::EntrySeek => {
                    self.gather.request(SECTOR);
                    self.sector.clear();
                    self.spos = 0;
                    self.state = State::Entry;
                    return Ok(ReadEvent::Seek(self.offset));
                }

                State::Entry => {
                    if self.spos == self.sector.len() {
                        if self.fsize == 0 {
                            // this directory is exhausted; descend into the
                            // next stored one
                            match self.next_dir() {
                                Some(i) => {
                                    self.curdir = Some(i);
                                    self.offset = self.entries[i].offset;
                                    self.fsize = self.entries[i].size;
                                    self.state = State::EntrySeek;
                                    continue;
                                }
                                None => {
                                    self.curdir = None;
                                    return Ok(ReadEvent::Done);
                                }
                            }
                        }
                        if !self.fill(input) {
                            return Ok(ReadEvent::More);
                        }
                        self.sector = self.gather.take();
                        self.spos = 0;
                        self.gather.request(SECTOR);
                    }

                    let rest = &self.sector[self.spos..];
                    let Some((mut f, len)) = fmt::ent_read(rest)? else {
                        // zero byte: no more records in this sector
                        let skipped = (self.sector.len() - self.spos) as u64;
                        self.fsize = self.fsize.saturating_sub(skipped);
                        self.spos = self.sector.len();
                        continue;
                    };

                    let body = fmt::ent_len(usize::from(rest[32]));
                    let record = rest[..len].to_vec();
                    self.spos += len;
                    self.fsize = self.fsize.saturating_sub(len as u64);

                    // decode the stored name, then let Rock-Ridge records
                    // replace (NM) or hide (RE) it
                    if !f.name.is_empty() {
                        let decoded = if self.joliet {
                            text::utf16be_to_utf8(&f.name)?
                        } else {
                            String::from_utf8_lossy(fmt::strip_version(&f.name)).into_owned()
                        };
                        f.name = decoded.into_bytes();
                    }
                    if !self.options.no_rock_ridge && body < record.len() {
                        fmt::rr_read(&record[body..], &mut f)?;
                    }
                    if f.name.is_empty() {
                        continue; // self, parent or relocated entry
                    }

                    let mut name = String::from_utf8_lossy(&f.name).into_owned();
                    if let Some(d) = self.curdir {
                        name = format!("{}/{}", self.entries[d].name, name);
                    }
                    name = normalize_name(name.as_bytes());

                    self.current = IsoEntry {
                        name,
                        mtime: f.mtime,
                        attr: f.attr,
                        uid: f.uid,
                        gid: f.gid,
                        offset: f.offset,
                        size: f.size,
                    };
                    self.entries.push(self.current.clone());
                    return Ok(ReadEvent::FileHeader);
                }

                State::FileSeek => {
                    self.gather.request(SECTOR);
                    self.state = State::FileData;
                    return Ok(ReadEvent::Seek(self.offset));
                }

                State::FileData => {
                    if !self.fill(input) {
                        return Ok(ReadEvent::More);
                    }
                    let d = self.gather.take();
                    let n = (self.fsize).min(d.len() as u64) as usize;
                    out.extend_from_slice(&d[..n]);
                    self.fsize -= n as u64;
                    if self.fsize == 0 {
                        self.state = State::FileDone;
                    } else {
                        self.gather.request(SECTOR);
                    }
                    return Ok(ReadEvent::Data);
                }

                State::FileDone => return Ok(ReadEvent::FileDone),
            }
        }
    }
}
