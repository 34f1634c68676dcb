//! The shared filter layer.
//!
//! A filter is a pure transformer over byte cursors: it consumes bytes
//! from the front of an input slice and appends produced bytes to an
//! output buffer. Format readers and writers compose one to five filters
//! into a [`Pipeline`]; single-codec formats (gz, zip entries) drive a
//! filter directly.
//!
//! Filters are a tagged sum rather than trait objects so that ownership
//! of third-party codec contexts stays explicit and drop-safe.

pub(crate) mod bcj;
pub(crate) mod bounds;
pub(crate) mod crc32;
pub(crate) mod input;
pub(crate) mod store;

#[cfg(feature = "deflate")]
pub(crate) mod deflate;
#[cfg(feature = "deflate")]
pub(crate) mod inflate;

#[cfg(feature = "lzma")]
pub(crate) mod lzma;

#[cfg(feature = "zstd")]
pub(crate) mod zstd;

use crate::{Error, Result};

/// Output buffer growth step; also bounds the work done per producer step.
pub(crate) const CHUNK: usize = 64 * 1024;

/// The outcome of one `process` call on a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FilterStep {
    /// The filter needs more input bytes.
    More,
    /// The filter appended produced bytes to its output.
    Data,
    /// The filter has finished producing.
    Done,
    /// The input source needs the stream repositioned (first stage only).
    Seek(u64),
}

/// One decompression or transform stage.
pub(crate) enum Filter {
    Input(input::InputSource),
    Bounds(bounds::Bounds),
    Store(store::Store),
    Crc32(crc32::Crc32Tap),
    Bcj(bcj::BcjDecode),
    #[cfg(feature = "deflate")]
    Inflate(inflate::Inflate),
    #[cfg(feature = "deflate")]
    Deflate(deflate::Deflate),
    #[cfg(feature = "lzma")]
    Lzma(lzma::LzmaDecode),
    #[cfg(feature = "zstd")]
    ZstdDecode(zstd::ZstdDecode),
    #[cfg(feature = "zstd")]
    ZstdEncode(zstd::ZstdEncode),
}

impl Filter {
    /// Runs one transform step: consume from `input`, append to `out`.
    ///
    /// `fin` tells the filter that no input beyond `input` will ever
    /// arrive. The `Input` variant is driven separately by the pipeline.
    pub fn process(
        &mut self,
        input: &mut &[u8],
        fin: bool,
        out: &mut Vec<u8>,
    ) -> Result<FilterStep> {
        match self {
            Filter::Input(_) => Err(Error::NotReady("input filter must be the pipeline head")),
            Filter::Bounds(f) => Ok(f.process(input, out)),
            Filter::Store(f) => Ok(f.process(input, fin, out)),
            Filter::Crc32(f) => Ok(f.process(input, fin, out)),
            Filter::Bcj(f) => Ok(f.process(input, fin, out)),
            #[cfg(feature = "deflate")]
            Filter::Inflate(f) => f.process(input, fin, out),
            #[cfg(feature = "deflate")]
            Filter::Deflate(f) => f.process(input, fin, out),
            #[cfg(feature = "lzma")]
            Filter::Lzma(f) => f.process(input, fin, out),
            #[cfg(feature = "zstd")]
            Filter::ZstdDecode(f) => f.process(input, fin, out),
            #[cfg(feature = "zstd")]
            Filter::ZstdEncode(f) => f.process(input, fin, out),
        }
    }
}

/// What a single pipeline step surfaced to the format reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PipeEvent {
    /// More caller input is required.
    More,
    /// The final stage produced data; take it with [`Pipeline::take_output`].
    Data,
    /// The final stage finished.
    Done,
    /// The caller must reposition its input to the given offset.
    Seek(u64),
}

struct Stage {
    filter: Filter,
    pending: Vec<u8>,
    out: Vec<u8>,
    fin: bool,
    read: u64,
    written: u64,
}

impl Stage {
    fn new(filter: Filter) -> Self {
        Self {
            filter,
            pending: Vec::new(),
            out: Vec::new(),
            fin: false,
            read: 0,
            written: 0,
        }
    }
}

/// A front-to-back chain of filters driven one producer step at a time.
pub(crate) struct Pipeline {
    stages: Vec<Stage>,
    cur: usize,
}

impl Pipeline {
    pub fn new(filters: Vec<Filter>) -> Self {
        Self {
            stages: filters.into_iter().map(Stage::new).collect(),
            cur: 0,
        }
    }

    /// Runs exactly one producer step.
    ///
    /// `Ok(None)` means internal progress was made and the caller should
    /// step again; `Ok(Some(_))` surfaces a directive. CPU per call is
    /// bounded: no stage loops to completion.
    pub fn step(&mut self, input: &mut &[u8], offset: &mut u64) -> Result<Option<PipeEvent>> {
        let i = self.cur;
        let last = self.stages.len() - 1;
        let st = &mut self.stages[i];

        let step = match &mut st.filter {
            Filter::Input(src) => src.pull(input, offset, &mut st.out)?,
            filter => {
                let mut sl: &[u8] = &st.pending;
                let r = filter.process(&mut sl, st.fin, &mut st.out)?;
                let consumed = st.pending.len() - sl.len();
                st.pending.drain(..consumed);
                st.read += consumed as u64;
                r
            }
        };

        match step {
            FilterStep::More => {
                if st.fin {
                    return Err(Error::Truncated);
                }
                if i == 0 {
                    return Ok(Some(PipeEvent::More));
                }
                self.cur = i - 1;
                Ok(None)
            }
            FilterStep::Data => {
                st.written += st.out.len() as u64;
                log::trace!(
                    "filter#{i}: +{} [{:#x}->{:#x}]",
                    st.out.len(),
                    st.read,
                    st.written
                );
                if i == last {
                    return Ok(Some(PipeEvent::Data));
                }
                let produced = std::mem::take(&mut st.out);
                self.stages[i + 1].pending.extend_from_slice(&produced);
                self.cur = i + 1;
                Ok(None)
            }
            FilterStep::Done => {
                log::trace!("filter#{i}: done");
                if i == last {
                    return Ok(Some(PipeEvent::Done));
                }
                self.stages[i + 1].fin = true;
                self.cur = i + 1;
                Ok(None)
            }
            FilterStep::Seek(off) => {
                if i != 0 {
                    return Err(Error::NotReady("seek from a non-head filter"));
                }
                Ok(Some(PipeEvent::Seek(off)))
            }
        }
    }

    /// Takes the bytes produced by the final stage.
    pub fn take_output(&mut self) -> Vec<u8> {
        let last = self.stages.len() - 1;
        std::mem::take(&mut self.stages[last].out)
    }

    /// The bounds window of the final stage, when it is a bounds filter.
    pub fn set_bounds(&mut self, off: u64, size: u64) {
        let last = self.stages.len() - 1;
        if let Filter::Bounds(b) = &mut self.stages[last].filter {
            b.reset(off, size);
        }
    }
}
