//! Streaming ISO-9660 writer.
//!
//! All entries are added up front (directories before their contents);
//! the writer then computes the complete layout, streams the image in
//! order, and finishes by seeking back to the volume-descriptor area.

use std::collections::HashMap;

use crate::archive_path::{Normalize, normalize, split_path};
use crate::event::WriteEvent;
use crate::{Error, Result};

use super::fmt::{
    self, ATTR_DIR, ENT_JOLIET, ENT_RR, ENT_RR_SP, IsoEntry, SECTOR, VolDesc,
};

/// Writer behavior switches.
#[derive(Debug, Clone, Default)]
pub struct IsoWriterOptions {
    /// Volume name for the descriptors; defaults to `CDROM`.
    pub volume_name: String,
    /// Skip the Joliet supplementary descriptor and tree.
    pub no_joliet: bool,
    /// Skip Rock-Ridge records.
    pub no_rock_ridge: bool,
}

#[derive(Debug, Clone)]
struct DirFile {
    name: String,
    attr: u32,
    mtime: i64,
    size: u64,
    off: u64,
}

#[derive(Debug, Clone)]
struct Dir {
    /// Full path; empty for the root.
    path: String,
    /// Offset of the basename within `path`.
    name_off: usize,
    parent: usize,
    /// Index of this directory's entry in the parent's file list.
    ifile: usize,
    files: Vec<DirFile>,
    off: u64,
    size: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct PathTable {
    size: u32,
    off_le: u32,
    off_be: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    DirWait,
    Empty,
    EmptyVd,
    PathTabLe,
    PathTabBe,
    PathTabJltLe,
    PathTabJltBe,
    Dir,
    DirJlt,
    FileNext,
    File,
    FilePad,
    VoldescSeek,
    VoldescPrim,
    VoldescJlt,
    VoldescTerm,
    Done,
}

/// Push-style ISO-9660 writer.
pub struct IsoWriter {
    state: State,
    options: IsoWriterOptions,
    off: u64,
    dirs: Vec<Dir>,
    dirs_jlt: Vec<Dir>,
    dir_index: HashMap<String, usize>,
    pathtab: PathTable,
    pathtab_jlt: PathTable,
    idir: usize,
    ifile: Option<usize>,
    nsectors: u32,
    curfile_size: u64,
}

fn align_sector(n: u64) -> u64 {
    n.div_ceil(SECTOR as u64) * SECTOR as u64
}

impl IsoWriter {
    /// Creates a writer.
    pub fn new(options: IsoWriterOptions) -> Self {
        let root = Dir {
            path: String::new(),
            name_off: 0,
            parent: 0,
            ifile: 0,
            files: Vec::new(),
            off: 0,
            size: 0,
        };
        let mut dir_index = HashMap::new();
        dir_index.insert(String::new(), 0);
        Self {
            state: State::DirWait,
            options,
            off: 0,
            dirs: vec![root],
            dirs_jlt: Vec::new(),
            dir_index,
            pathtab: PathTable::default(),
            pathtab_jlt: PathTable::default(),
            idir: 0,
            ifile: None,
            nsectors: 0,
            curfile_size: 0,
        }
    }

    /// Current logical output offset.
    pub fn offset(&self) -> u64 {
        self.off
    }

    /// Registers an entry. Directories must be added before anything
    /// inside them.
    pub fn add_file(&mut self, meta: &IsoEntry) -> Result<()> {
        if self.state != State::DirWait {
            return Err(Error::NotReady("iso layout is already fixed"));
        }

        let mut path = normalize(&meta.name, Normalize::archive());
        if path.ends_with('/') {
            path.pop();
        }
        if path.is_empty() {
            return Err(Error::NameInvalid("iso entry name normalizes to empty"));
        }

        let (parent_path, name) = split_path(&path);
        let &parent = self
            .dir_index
            .get(parent_path)
            .ok_or(Error::BadStructure("iso parent directory not added first"))?;

        if meta.is_dir() {
            let dir = Dir {
                path: path.clone(),
                name_off: if parent_path.is_empty() {
                    0
                } else {
                    parent_path.len() + 1
                },
                parent,
                ifile: self.dirs[parent].files.len(),
                files: Vec::new(),
                off: 0,
                size: 0,
            };
            self.dir_index.insert(path.clone(), self.dirs.len());
            self.dirs.push(dir);
        }

        self.dirs[parent].files.push(DirFile {
            name: name.to_string(),
            attr: meta.attr | if meta.is_dir() { ATTR_DIR } else { 0 },
            mtime: meta.mtime,
            size: if meta.is_dir() { 0 } else { meta.size },
            off: 0,
        });
        Ok(())
    }

    /// Prepares the next file's data stream, in `add_file` order.
    pub fn next_file(&mut self) -> Result<()> {
        if self.state != State::FileNext {
            return Err(Error::NotReady("iso writer is not between files"));
        }
        let next = {
            let mut start = self.ifile.map_or(0, |i| i + 1);
            let mut found = None;
            for d in self.idir..self.dirs.len() {
                if let Some(k) = (start..self.dirs[d].files.len())
                    .find(|&k| self.dirs[d].files[k].attr & ATTR_DIR == 0)
                {
                    found = Some((d, k));
                    break;
                }
                start = 0;
            }
            found
        };
        let Some((d, k)) = next else {
            return Err(Error::NotReady("no more iso files to write"));
        };
        self.idir = d;
        self.ifile = Some(k);
        self.curfile_size = 0;
        self.state = State::File;
        Ok(())
    }

    /// Declares all file data written; the volume descriptors follow.
    pub fn finish(&mut self) -> Result<()> {
        if self.state != State::FileNext {
            return Err(Error::NotReady("iso writer is mid-file"));
        }
        self.state = State::VoldescSeek;
        Ok(())
    }

    fn ent_flags(&self, joliet: bool) -> u32 {
        if joliet {
            ENT_JOLIET
        } else if self.options.no_rock_ridge {
            0
        } else {
            ENT_RR
        }
    }

    /// Assigns extents to every directory, walking in creation order
    /// (parents first).
    fn count_dirs(dirs: &mut [Dir], off: &mut u64, flags: u32) -> Result<()> {
        for i in 0..dirs.len() {
            let self_flags = if i == 0 && flags & ENT_RR != 0 {
                flags | ENT_RR_SP
            } else {
                flags
            };
            let mut pos = (fmt::ent_size("\0", ATTR_DIR, self_flags)?
                + fmt::ent_size("\u{1}", ATTR_DIR, flags)?) as u64;

            for f in &dirs[i].files {
                let r = fmt::ent_size(&f.name, f.attr, flags)? as u64;
                if pos % SECTOR as u64 + r > SECTOR as u64 {
                    pos = align_sector(pos);
                }
                pos += r;
            }

            let size = align_sector(pos);
            dirs[i].off = *off;
            dirs[i].size = size;
            if i != 0 {
                let (p, fi) = (dirs[i].parent, dirs[i].ifile);
                dirs[p].files[fi].off = *off;
                dirs[p].files[fi].size = size;
            }
            *off += size;
        }
        Ok(())
    }

    /// Assigns extents to every file, in directory order.
    fn set_file_offsets(dirs: &mut [Dir], mut off: u64) {
        for d in dirs {
            for f in &mut d.files {
                if f.attr & ATTR_DIR == 0 {
                    f.off = off;
                    off += align_sector(f.size);
                }
            }
        }
    }

    fn pathtab_bytes(dirs: &[Dir], joliet: bool) -> Result<u64> {
        let mut size = 0u64;
        for d in dirs {
            let name = if d.path.is_empty() {
                "\0"
            } else {
                &d.path[d.name_off..]
            };
            size += fmt::path_entry_size(name, joliet)? as u64;
        }
        Ok(size)
    }

    /// Lays the whole image out: path tables, directory extents, file
    /// extents.
    fn compute_layout(&mut self) -> Result<()> {
        let joliet = !self.options.no_joliet;

        let prim_tab = align_sector(Self::pathtab_bytes(&self.dirs, false)?);
        let jlt_tab = if joliet {
            align_sector(Self::pathtab_bytes(&self.dirs, true)?)
        } else {
            0
        };
        let tables_total = 2 * prim_tab + 2 * jlt_tab;

        let mut off = 19 * SECTOR as u64 + tables_total;
        let flags = self.ent_flags(false);
        Self::count_dirs(&mut self.dirs, &mut off, flags)?;
        if joliet {
            self.dirs_jlt = self.dirs.clone();
            Self::count_dirs(&mut self.dirs_jlt, &mut off, ENT_JOLIET)?;
        }

        Self::set_file_offsets(&mut self.dirs, off);
        if joliet {
            Self::set_file_offsets(&mut self.dirs_jlt, off);
        }
        Ok(())
    }

    /// Serializes one path table, recording its position.
    fn pathtab_write(&mut self, out: &mut Vec<u8>, big_endian: bool, joliet: bool) -> Result<()> {
        let dirs = if joliet { &self.dirs_jlt } else { &self.dirs };
        let start = out.len();
        for d in dirs {
            let name = if d.path.is_empty() {
                "\0"
            } else {
                &d.path[d.name_off..]
            };
            fmt::path_entry_write(
                out,
                name,
                (d.off / SECTOR as u64) as u32,
                (d.parent + 1) as u16,
                big_endian,
                joliet,
            )?;
            log::trace!("iso path table: {name:?} extent:{:#x} parent:{}", d.off, d.parent + 1);
        }
        let size = (out.len() - start) as u32;
        out.resize(start + align_sector(u64::from(size)) as usize, 0);

        let sector = (self.off / SECTOR as u64) as u32;
        let tab = if joliet {
            &mut self.pathtab_jlt
        } else {
            &mut self.pathtab
        };
        tab.size = size;
        if big_endian {
            tab.off_be = sector;
        } else {
            tab.off_le = sector;
        }
        Ok(())
    }

    /// Serializes one directory's contents, padded to its extent size.
    fn dir_write(&self, index: usize, joliet: bool, out: &mut Vec<u8>) -> Result<()> {
        let dirs = if joliet { &self.dirs_jlt } else { &self.dirs };
        let d = &dirs[index];
        let flags = self.ent_flags(joliet);
        let self_flags = if index == 0 && flags & ENT_RR != 0 {
            flags | ENT_RR_SP
        } else {
            flags
        };

        let start = out.len();
        out.reserve(d.size as usize);

        let mut rec = Vec::new();
        fmt::ent_write(&mut rec, "\0", ATTR_DIR, d.off, d.size, 0, self_flags)?;
        let parent = &dirs[d.parent];
        fmt::ent_write(&mut rec, "\u{1}", ATTR_DIR, parent.off, parent.size, 0, flags)?;

        for f in &d.files {
            let mut ent = Vec::new();
            fmt::ent_write(&mut ent, &f.name, f.attr, f.off, f.size, f.mtime, flags)?;
            if rec.len() % SECTOR + ent.len() > SECTOR {
                rec.resize(align_sector(rec.len() as u64) as usize, 0);
            }
            rec.extend_from_slice(&ent);
            log::trace!(
                "iso dir record: {} body-off:{:#x} body-len:{:#x}",
                f.name,
                f.off,
                f.size
            );
        }

        rec.resize(d.size as usize, 0);
        out.truncate(start);
        out.extend_from_slice(&rec);
        Ok(())
    }

    fn voldesc(&self, joliet: bool) -> VolDesc {
        let (root, tab) = if joliet {
            (&self.dirs_jlt[0], &self.pathtab_jlt)
        } else {
            (&self.dirs[0], &self.pathtab)
        };
        VolDesc {
            joliet,
            volume_name: if self.options.volume_name.is_empty() {
                "CDROM".into()
            } else {
                self.options.volume_name.clone()
            },
            root_dir_off: root.off,
            root_dir_size: root.size,
            vol_sectors: self.nsectors,
            path_table_size: tab.size,
            path_table_off: tab.off_le,
            path_table_off_be: tab.off_be,
        }
    }

    /// Writes the next chunk. Output bytes are appended to `out`, which is
    /// cleared on entry.
    pub fn process(&mut self, input: &mut &[u8], out: &mut Vec<u8>) -> Result<WriteEvent> {
        out.clear();

        loop {
            match self.state {
                State::DirWait => {
                    self.state = State::Empty;
                }

                State::Empty => {
                    out.resize(16 * SECTOR, 0);
                    self.off += out.len() as u64;
                    self.state = State::EmptyVd;
                    return Ok(WriteEvent::Data);
                }

                State::EmptyVd => {
                    out.resize(3 * SECTOR, 0);
                    self.off += out.len() as u64;
                    self.compute_layout()?;
                    self.idir = 0;
                    self.state = State::PathTabLe;
                    return Ok(WriteEvent::Data);
                }

                State::PathTabLe
                | State::PathTabBe
                | State::PathTabJltLe
                | State::PathTabJltBe => {
                    let joliet = matches!(self.state, State::PathTabJltLe | State::PathTabJltBe);
                    if joliet && self.options.no_joliet {
                        self.state = State::Dir;
                        continue;
                    }
                    let big_endian =
                        matches!(self.state, State::PathTabBe | State::PathTabJltBe);
                    self.pathtab_write(out, big_endian, joliet)?;
                    self.off += out.len() as u64;
                    self.state = match self.state {
                        State::PathTabLe => State::PathTabBe,
                        State::PathTabBe => State::PathTabJltLe,
                        State::PathTabJltLe => State::PathTabJltBe,
                        _ => State::Dir,
                    };
                    return Ok(WriteEvent::Data);
                }

                State::Dir | State::DirJlt => {
                    let joliet = self.state == State::DirJlt;
                    if self.idir == self.dirs.len() {
                        self.idir = 0;
                        if !joliet && !self.options.no_joliet {
                            self.state = State::DirJlt;
                            continue;
                        }
                        self.ifile = None;
                        self.state = State::FileNext;
                        return Ok(WriteEvent::More);
                    }
                    self.dir_write(self.idir, joliet, out)?;
                    self.idir += 1;
                    self.off += out.len() as u64;
                    return Ok(WriteEvent::Data);
                }

                State::FileNext => return Ok(WriteEvent::More),

                State::File => {
                    let Some(k) = self.ifile else {
                        return Err(Error::NotReady("no active iso file"));
                    };
                    let fsize = self.dirs[self.idir].files[k].size;
                    if input.is_empty() {
                        if self.curfile_size == fsize {
                            self.state = State::FilePad;
                            continue;
                        }
                        return Ok(WriteEvent::More);
                    }
                    out.extend_from_slice(&input[..]);
                    self.curfile_size += input.len() as u64;
                    *input = &[];
                    self.off += out.len() as u64;
                    if self.curfile_size > fsize {
                        return Err(Error::BadStructure(
                            "iso file data exceeds the declared size",
                        ));
                    }
                    if self.curfile_size == fsize {
                        self.state = State::FilePad;
                    }
                    return Ok(WriteEvent::Data);
                }

                State::FilePad => {
                    self.state = State::FileNext;
                    let rem = (self.curfile_size % SECTOR as u64) as usize;
                    if rem != 0 {
                        out.resize(SECTOR - rem, 0);
                        self.off += out.len() as u64;
                        return Ok(WriteEvent::Data);
                    }
                }

                State::VoldescSeek => {
                    self.nsectors = (self.off / SECTOR as u64) as u32;
                    self.off = 16 * SECTOR as u64;
                    self.state = State::VoldescPrim;
                    return Ok(WriteEvent::Seek(self.off));
                }

                State::VoldescPrim => {
                    out.resize(SECTOR, 0);
                    fmt::voldesc_write(out, &self.voldesc(false))?;
                    self.off += SECTOR as u64;
                    self.state = if self.options.no_joliet {
                        State::VoldescTerm
                    } else {
                        State::VoldescJlt
                    };
                    return Ok(WriteEvent::Data);
                }

                State::VoldescJlt => {
                    out.resize(SECTOR, 0);
                    fmt::voldesc_write(out, &self.voldesc(true))?;
                    self.off += SECTOR as u64;
                    self.state = State::VoldescTerm;
                    return Ok(WriteEvent::Data);
                }

                State::VoldescTerm => {
                    out.resize(SECTOR, 0);
                    fmt::voldesc_term_write(out);
                    self.off += SECTOR as u64;
                    self.state = State::Done;
                    return Ok(WriteEvent::Data);
                }

                State::Done => return Ok(WriteEvent::Done),
            }
        }
    }
}
