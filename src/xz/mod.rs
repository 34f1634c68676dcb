//! The `.xz` container: a stream header, LZMA2-compressed blocks with
//! per-block checks, a block index and a stream footer.
//!
//! Only reading is supported. Block filter chains of LZMA2, optionally
//! preceded by the x86 BCJ filter, are accepted; multi-stream files are
//! rejected.

mod fmt;
mod read;

pub use fmt::XzInfo;
pub use read::XzReader;
