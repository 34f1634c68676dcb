//! The `.7z` container (read only).
//!
//! Metadata is a recursive tagged-block stream parsed against a static
//! grammar; file data lives in *folders*, each a chain of coders applied
//! to a packed stream. Supported chains are `store`/`lzma1`/`lzma2`/
//! `deflate`, optionally followed by the x86 BCJ filter; BCJ2 is
//! rejected. An `EncodedHeader` (compressed metadata) is unpacked through
//! the same filter pipeline and reparsed.

mod fmt;
mod read;

pub use fmt::SevenZEntry;
pub use read::SevenZReader;
