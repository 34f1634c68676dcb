//! Rolling checksum computation.
//!
//! CRC-32 (IEEE 802.3 polynomial, LSB-first), the checksum used by gz,
//! xz, zip, iso and 7z, and CRC-64 (ECMA), used by the xz CRC64 block
//! check.
//!
//! # Example
//!
//! ```rust
//! use arkpack::checksum::Crc32;
//!
//! let mut crc = Crc32::new();
//! crc.update(b"Hello, ");
//! crc.update(b"World!");
//! assert_eq!(crc.value(), 0xEC4AC3D0);
//! assert_eq!(Crc32::compute(b"Hello, World!"), 0xEC4AC3D0);
//! ```

/// Rolling CRC-32 accumulator.
#[derive(Clone, Default)]
pub struct Crc32 {
    hasher: crc32fast::Hasher,
}

impl std::fmt::Debug for Crc32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crc32").field("value", &self.value()).finish()
    }
}

impl Crc32 {
    /// Creates a new accumulator.
    pub fn new() -> Self {
        Self {
            hasher: crc32fast::Hasher::new(),
        }
    }

    /// Feeds more data into the checksum.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Returns the checksum over everything fed so far.
    pub fn value(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Resets to the initial state.
    pub fn reset(&mut self) {
        self.hasher.reset();
    }

    /// Computes the checksum of a single slice.
    pub fn compute(data: &[u8]) -> u32 {
        crc32fast::hash(data)
    }
}

/// Rolling CRC-64 (ECMA) accumulator.
#[derive(Clone, Default)]
pub struct Crc64 {
    hasher: crc64fast::Digest,
}

impl std::fmt::Debug for Crc64 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crc64").field("value", &self.value()).finish()
    }
}

impl Crc64 {
    /// Creates a new accumulator.
    pub fn new() -> Self {
        Self {
            hasher: crc64fast::Digest::new(),
        }
    }

    /// Feeds more data into the checksum.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.write(data);
    }

    /// Returns the checksum over everything fed so far.
    pub fn value(&self) -> u64 {
        self.hasher.sum64()
    }

    /// Computes the checksum of a single slice.
    pub fn compute(data: &[u8]) -> u64 {
        let mut d = crc64fast::Digest::new();
        d.write(data);
        d.sum64()
    }
}
