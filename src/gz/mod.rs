//! The `.gz` container: DEFLATE-compressed single streams, optionally
//! concatenated, framed by a small header and a CRC-32 trailer.
//!
//! # Reading
//!
//! ```no_run
//! use arkpack::gz::GzReader;
//! use arkpack::ReadEvent;
//!
//! # fn read(file: &[u8]) -> arkpack::Result<Vec<u8>> {
//! let mut r = GzReader::new(Some(file.len() as u64));
//! let mut pos = 0usize;
//! let mut out = Vec::new();
//! let mut decoded = Vec::new();
//! loop {
//!     let mut input = &file[pos..];
//!     let before = input.len();
//!     let ev = r.process(&mut input, &mut out)?;
//!     pos += before - input.len();
//!     match ev {
//!         ReadEvent::Data => decoded.extend_from_slice(&out),
//!         ReadEvent::Seek(off) => pos = off as usize,
//!         ReadEvent::Done => break,
//!         _ => {}
//!     }
//! }
//! # Ok(decoded)
//! # }
//! ```

mod fmt;
mod read;
mod write;

pub use fmt::GzInfo;
pub use read::GzReader;
pub use write::{GzWriter, GzWriterConfig};
