//! Shared drivers for exercising the pull/push state machines over
//! in-memory archives.

#![allow(dead_code)]

use arkpack::{ReadEvent, Result, WriteEvent};

/// Anything with the uniform reader `process` contract.
pub trait PullReader {
    fn process(&mut self, input: &mut &[u8], out: &mut Vec<u8>) -> Result<ReadEvent>;
}

macro_rules! impl_pull_reader {
    ($ty:ty) => {
        impl PullReader for $ty {
            fn process(&mut self, input: &mut &[u8], out: &mut Vec<u8>) -> Result<ReadEvent> {
                <$ty>::process(self, input, out)
            }
        }
    };
}

impl_pull_reader!(arkpack::gz::GzReader);
impl_pull_reader!(arkpack::xz::XzReader);
impl_pull_reader!(arkpack::tar::TarReader);
impl_pull_reader!(arkpack::iso::IsoReader);
impl_pull_reader!(arkpack::sevenz::SevenZReader);
impl_pull_reader!(arkpack::zip::ZipReader);

/// Drives a reader over an in-memory image, delivering input in chunks
/// of at most `chunk` bytes and honoring `Seek`.
///
/// The callback sees every event except `More`/`Seek`; returning `false`
/// stops the loop. The loop also stops at `Done`.
pub fn drive_chunked<R: PullReader>(
    reader: &mut R,
    image: &[u8],
    chunk: usize,
    mut on_event: impl FnMut(&mut R, ReadEvent, &[u8]) -> bool,
) -> Result<()> {
    let mut pos = 0usize;
    let mut out = Vec::new();
    let mut steps = 0u64;

    loop {
        let end = (pos + chunk).min(image.len());
        let mut input = &image[pos.min(image.len())..end];
        let before = input.len();
        let ev = reader.process(&mut input, &mut out)?;
        pos += before - input.len();

        steps += 1;
        assert!(steps < 50_000_000, "reader made no progress");

        match ev {
            ReadEvent::More => {
                assert!(pos < image.len(), "reader starved at offset {pos}");
            }
            ReadEvent::Seek(off) => {
                pos = off as usize;
            }
            ReadEvent::Done => {
                on_event(reader, ev, &out);
                return Ok(());
            }
            ev => {
                if !on_event(reader, ev, &out) {
                    return Ok(());
                }
            }
        }
    }
}

/// Drives a reader with a comfortable chunk size.
pub fn drive<R: PullReader>(
    reader: &mut R,
    image: &[u8],
    on_event: impl FnMut(&mut R, ReadEvent, &[u8]) -> bool,
) -> Result<()> {
    drive_chunked(reader, image, 64 * 1024, on_event)
}

/// A growable output sink honoring writer `Seek` directives.
#[derive(Debug, Default)]
pub struct Sink {
    pub buf: Vec<u8>,
    pos: usize,
}

impl Sink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, data: &[u8]) {
        let end = self.pos + data.len();
        if self.buf.len() < end {
            self.buf.resize(end, 0);
        }
        self.buf[self.pos..end].copy_from_slice(data);
        self.pos = end;
    }

    pub fn seek(&mut self, off: u64) {
        self.pos = off as usize;
        if self.buf.len() < self.pos {
            self.buf.resize(self.pos, 0);
        }
    }

    /// Applies one writer event; returns `true` until `Done`.
    pub fn apply(&mut self, ev: WriteEvent, out: &[u8]) -> bool {
        match ev {
            WriteEvent::Data => {
                self.write(out);
                true
            }
            WriteEvent::Seek(off) => {
                self.seek(off);
                true
            }
            WriteEvent::Done => false,
            _ => true,
        }
    }
}
