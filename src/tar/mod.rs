//! The `.tar` container: 512-byte header records, raw file data padded to
//! record boundaries, GNU long-name extensions.

mod fmt;
mod read;
mod write;

pub use fmt::{TarEntry, TarType};
pub use read::TarReader;
pub use write::TarWriter;
