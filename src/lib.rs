//! # arkpack
//!
//! Streaming readers and writers for the `.gz`, `.xz`, `.tar`, `.iso`,
//! `.7z` and `.zip` container formats.
//!
//! The codecs are pull/push state machines that never perform I/O: the
//! caller supplies input bytes (or collects output bytes) in chunks of
//! any size and receives directives ([`ReadEvent`]/[`WriteEvent`])
//! telling it what to do next. Seeking is expressed as a `Seek(offset)`
//! directive; the caller delivers bytes from that offset on the next
//! call.
//!
//! ## Reading a `.tar` stream
//!
//! ```rust,no_run
//! use arkpack::tar::TarReader;
//! use arkpack::{ReadEvent, Result};
//!
//! fn list(mut chunks: impl Iterator<Item = Vec<u8>>) -> Result<()> {
//!     let mut r = TarReader::new();
//!     let mut buf: Vec<u8> = Vec::new();
//!     let mut out = Vec::new();
//!     loop {
//!         let mut input = &buf[..];
//!         let ev = r.process(&mut input, &mut out)?;
//!         let used = buf.len() - input.len();
//!         buf.drain(..used);
//!         match ev {
//!             ReadEvent::More => match chunks.next() {
//!                 Some(c) => buf.extend_from_slice(&c),
//!                 None => break,
//!             },
//!             ReadEvent::FileHeader => println!("{}", r.entry().name),
//!             ReadEvent::Done => break,
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Writing a `.zip` archive
//!
//! ```rust,no_run
//! use arkpack::zip::{ZipFileOptions, ZipMethod, ZipWriter, ZipWriterConfig};
//! use arkpack::{Result, WriteEvent};
//!
//! fn write_one(payload: &[u8]) -> Result<Vec<u8>> {
//!     let mut w = ZipWriter::new(ZipWriterConfig::default());
//!     w.add_file(&ZipFileOptions {
//!         name: "hello.txt".into(),
//!         method: ZipMethod::Deflated,
//!         ..ZipFileOptions::default()
//!     })?;
//!
//!     let mut file = Vec::new();
//!     let mut input = payload;
//!     let mut out = Vec::new();
//!     w.finish_file();
//!     w.finish();
//!     loop {
//!         match w.process(&mut input, &mut out)? {
//!             WriteEvent::Data => file.extend_from_slice(&out),
//!             WriteEvent::Seek(off) => {
//!                 // patch in place when the sink is seekable
//!                 let at = off as usize;
//!                 let _ = at;
//!             }
//!             WriteEvent::Done => break,
//!             _ => {}
//!         }
//!     }
//!     Ok(file)
//! }
//! ```
//!
//! ## Feature flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `deflate` | Yes | Deflate via `flate2` (gz, zip, 7z deflate coders) |
//! | `lzma` | Yes | LZMA/LZMA2 via `lzma-rust2` (xz, 7z) |
//! | `zstd` | Yes | Zstandard via `zstd` (zip method 93) |

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod archive_path;
pub mod checksum;
pub mod error;
pub mod text;
pub mod timestamp;
pub mod varint;

mod event;
mod gather;

pub(crate) mod filter;

#[cfg(feature = "deflate")]
pub mod gz;

pub mod iso;
pub mod tar;

#[cfg(feature = "lzma")]
pub mod sevenz;

#[cfg(feature = "lzma")]
pub mod xz;

#[cfg(feature = "deflate")]
pub mod zip;

pub use error::{Error, Result, TarDefect, Warning};
pub use event::{ReadEvent, WriteEvent};
pub use timestamp::Timestamp;
