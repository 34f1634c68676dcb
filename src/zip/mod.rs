//! The `.zip` container: local file headers, compressed entry data, a
//! trailing central directory, zip64 extensions and data descriptors.
//!
//! Supported entry compression: stored, deflate and zstandard
//! (method 93). Encrypted entries and multi-disk archives are rejected.

mod fmt;
mod read;
mod write;

pub use fmt::{ZipEntry, ZipMethod};
pub use read::{ZipReader, ZipReaderConfig};
pub use write::{ZipFileOptions, ZipWriter, ZipWriterConfig};
