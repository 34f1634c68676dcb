//! Error types for archive codec operations.
//!
//! All fallible operations in this crate return [`Result<T>`], an alias for
//! `std::result::Result<T, Error>`. Fatal conditions surface as [`Error`];
//! recoverable findings (a per-file CRC mismatch on data that has already
//! been delivered, a tolerated header defect) surface as [`Warning`] events
//! from the reader so the caller can decide whether to continue.
//!
//! # Example
//!
//! ```rust
//! use arkpack::{Error, Result};
//!
//! fn check(sig: &[u8]) -> Result<()> {
//!     if sig != b"PK\x03\x04" {
//!         return Err(Error::BadMagic { format: "zip" });
//!     }
//!     Ok(())
//! }
//! ```

/// The main error type for archive codec operations.
///
/// Every variant corresponds to one semantic failure kind. Failures are
/// terminal for the current entry (zip/iso/7z) or for the whole archive
/// (gz/xz/tar); the codec stays in a well-defined state so the caller can
/// drop it cleanly.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A signature in a header or trailer did not match.
    #[error("{format}: bad magic")]
    BadMagic {
        /// The format that was being parsed.
        format: &'static str,
    },

    /// A version field is outside the recognized range.
    #[error("{format}: unsupported version {version}")]
    UnsupportedVersion {
        /// The format that was being parsed.
        format: &'static str,
        /// The version value found.
        version: u32,
    },

    /// A CRC over header or footer bytes mismatches the stored value.
    #[error("bad header CRC at offset {offset:#x}: expected {expected:#010x}, got {actual:#010x}")]
    BadHeaderCrc {
        /// Input offset of the checked record.
        offset: u64,
        /// The CRC stored in the archive.
        expected: u32,
        /// The CRC computed over the record.
        actual: u32,
    },

    /// A checksum over decompressed data mismatches the declared value.
    ///
    /// Most formats report this as [`Warning::DataCrcMismatch`] after the
    /// data has already been delivered; this error form is used where the
    /// original archive structure is unusable without the check passing
    /// (7z folders, xz block checks).
    #[error("bad data checksum: expected {expected:#x}, got {actual:#x}")]
    BadDataCrc {
        /// The checksum declared by the archive.
        expected: u64,
        /// The checksum computed over the produced data.
        actual: u64,
    },

    /// A variable-length integer exceeds its length limit or runs past the
    /// end of its record.
    #[error("bad varint")]
    BadVarint,

    /// The input ended in the middle of a record or a compressed stream.
    #[error("truncated input")]
    Truncated,

    /// A compression method or coder chain is not implemented.
    #[error("unsupported codec: {what}")]
    UnsupportedCodec {
        /// Description of the method or chain.
        what: &'static str,
    },

    /// Duplicate block, ordering violation or missing required field.
    #[error("bad structure: {0}")]
    BadStructure(&'static str),

    /// A file name cannot be decoded or normalizes to an empty path.
    #[error("invalid name: {0}")]
    NameInvalid(&'static str),

    /// An API call was made in a state that forbids it.
    #[error("not ready: {0}")]
    NotReady(&'static str),

    /// A third-party codec reported failure.
    #[error("codec error: {0}")]
    Codec(String),
}

/// Non-fatal findings reported by readers.
///
/// A warning accompanies data that has already been produced; the caller
/// may continue processing or abandon the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Warning {
    /// The CRC computed over delivered data does not match the declared one.
    DataCrcMismatch {
        /// The checksum declared by the archive.
        expected: u32,
        /// The checksum computed over the delivered data.
        actual: u32,
    },
    /// A gz header carries flag bits outside the defined set.
    GzHeaderFlags {
        /// The raw flag byte.
        flags: u8,
    },
    /// A tar header parsed with defects; the entry is still delivered.
    TarHeader(TarDefect),
}

/// The specific defect found in a tar header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TarDefect {
    /// A numeric field is not valid octal or base-256.
    BadNumber,
    /// The header checksum does not match.
    BadChecksum,
    /// A directory or link entry declares a non-zero data size.
    UnexpectedData,
}

impl Error {
    /// Returns `true` if this error indicates data corruption.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::BadHeaderCrc { .. } | Error::BadDataCrc { .. } | Error::Truncated
        )
    }

    /// Returns `true` if this error is about a missing capability rather
    /// than broken input.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedCodec { .. } | Error::UnsupportedVersion { .. }
        )
    }
}

/// A specialized Result type for archive codec operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_context() {
        let err = Error::BadHeaderCrc {
            offset: 0x10,
            expected: 0xdeadbeef,
            actual: 0xcafebabe,
        };
        let msg = err.to_string();
        assert!(msg.contains("0x10"));
        assert!(msg.contains("0xdeadbeef"));
        assert!(msg.contains("0xcafebabe"));

        let err = Error::BadMagic { format: "xz" };
        assert!(err.to_string().contains("xz"));
    }

    #[test]
    fn classification() {
        assert!(Error::Truncated.is_corruption());
        assert!(
            Error::BadDataCrc {
                expected: 1,
                actual: 2
            }
            .is_corruption()
        );
        assert!(Error::UnsupportedCodec { what: "bcj2" }.is_unsupported());
        assert!(!Error::BadVarint.is_unsupported());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
