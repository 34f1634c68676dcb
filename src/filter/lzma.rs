//! LZMA1/LZMA2 decode filter over `lzma-rust2`.
//!
//! The LZMA decoders are reader-shaped, so this filter gathers the
//! compressed payload first and then decodes from the gathered buffer
//! in bounded steps. Every caller knows the payload's extent up front:
//! an xz block ends at the LZMA2 end marker, a 7z folder at its
//! pack-stream size.

use std::io::{Cursor, Read};

use lzma_rust2::{Lzma2Reader, LzmaReader};

use crate::{Error, Result};

use super::{CHUNK, FilterStep};

enum Props {
    Lzma1 {
        props_byte: u8,
        dict_size: u32,
        unpack_size: u64,
    },
    Lzma2 {
        dict_size: u32,
    },
}

enum Inner {
    Lzma1(LzmaReader<Cursor<Vec<u8>>>),
    Lzma2(Lzma2Reader<Cursor<Vec<u8>>>),
}

pub(crate) struct LzmaDecode {
    props: Props,
    acc: Vec<u8>,
    inner: Option<Inner>,
    done: bool,
}

/// Decodes the LZMA2 dictionary-size property byte (0..=40).
pub(crate) fn lzma2_dict_size(prop: u8) -> Result<u32> {
    if prop > 40 {
        return Err(Error::Codec(format!(
            "invalid LZMA2 dictionary size property: {prop}"
        )));
    }
    if prop == 40 {
        return Ok(0xffff_ffff);
    }
    let base_log = u32::from(prop) / 2 + 12;
    Ok(if prop % 2 == 0 {
        1u32 << base_log
    } else {
        3u32 << (base_log - 1)
    })
}

impl LzmaDecode {
    /// LZMA1 decoder from 7z coder properties (props byte + LE32 dict size).
    pub fn lzma1(properties: &[u8], unpack_size: u64) -> Result<Self> {
        if properties.len() < 5 {
            return Err(Error::UnsupportedCodec {
                what: "LZMA properties shorter than 5 bytes",
            });
        }
        let dict_size = u32::from_le_bytes([
            properties[1],
            properties[2],
            properties[3],
            properties[4],
        ]);
        Ok(Self {
            props: Props::Lzma1 {
                props_byte: properties[0],
                dict_size,
                unpack_size,
            },
            acc: Vec::new(),
            inner: None,
            done: false,
        })
    }

    /// LZMA2 decoder from a one-byte dictionary-size property.
    pub fn lzma2(properties: &[u8]) -> Result<Self> {
        let &prop = properties.first().ok_or(Error::UnsupportedCodec {
            what: "LZMA2 properties missing",
        })?;
        Ok(Self {
            props: Props::Lzma2 {
                dict_size: lzma2_dict_size(prop)?,
            },
            acc: Vec::new(),
            inner: None,
            done: false,
        })
    }

    pub fn process(&mut self, input: &mut &[u8], fin: bool, out: &mut Vec<u8>) -> Result<FilterStep> {
        if self.done {
            return Ok(FilterStep::Done);
        }
        if !input.is_empty() {
            self.acc.extend_from_slice(&input[..]);
            *input = &[];
        }
        if !fin {
            return Ok(FilterStep::More);
        }

        if self.inner.is_none() {
            let cursor = Cursor::new(std::mem::take(&mut self.acc));
            let inner = match self.props {
                Props::Lzma1 {
                    props_byte,
                    dict_size,
                    unpack_size,
                } => Inner::Lzma1(
                    LzmaReader::new_with_props(cursor, unpack_size, props_byte, dict_size, None)
                        .map_err(|e| Error::Codec(e.to_string()))?,
                ),
                Props::Lzma2 { dict_size } => {
                    Inner::Lzma2(Lzma2Reader::new(cursor, dict_size, None))
                }
            };
            self.inner = Some(inner);
        }
        let Some(inner) = self.inner.as_mut() else {
            return Err(Error::NotReady("LZMA decoder not initialized"));
        };

        let start = out.len();
        out.resize(start + CHUNK, 0);
        let n = match inner {
            Inner::Lzma1(r) => r.read(&mut out[start..]),
            Inner::Lzma2(r) => r.read(&mut out[start..]),
        }
        .map_err(|e| Error::Codec(e.to_string()))?;
        out.truncate(start + n);

        if n == 0 {
            self.done = true;
            return Ok(FilterStep::Done);
        }
        Ok(FilterStep::Data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dict_size_property() {
        assert_eq!(lzma2_dict_size(0).unwrap(), 4096);
        assert_eq!(lzma2_dict_size(1).unwrap(), 6144);
        assert_eq!(lzma2_dict_size(22).unwrap(), 8 << 20);
        assert_eq!(lzma2_dict_size(40).unwrap(), 0xffff_ffff);
        assert!(lzma2_dict_size(41).is_err());
    }

    #[test]
    fn lzma2_uncompressed_chunks() {
        // A hand-built LZMA2 stream of one uncompressed chunk:
        // 0x01 (reset dict), big-endian size-1, payload, 0x00 end marker.
        let mut stream = vec![0x01, 0x00, 0x09];
        stream.extend_from_slice(b"plain data");
        stream.push(0x00);

        let mut dec = LzmaDecode::lzma2(&[0x16]).unwrap();
        let mut out = Vec::new();
        let mut input: &[u8] = &stream;
        loop {
            match dec.process(&mut input, true, &mut out).unwrap() {
                FilterStep::Done => break,
                FilterStep::More => panic!("decoder starved"),
                _ => continue,
            }
        }
        assert_eq!(out, b"plain data");
    }
}

/// Incremental LZMA2 chunk-frame scanner.
///
/// Walks chunk headers without decoding to find where an LZMA2 stream
/// ends (the `0x00` end marker). This lets a caller gather exactly one
/// block's compressed payload from an unbounded input stream.
#[derive(Debug, Default)]
pub(crate) struct Lzma2Scan {
    hdr: Vec<u8>,
    skip: usize,
    done: bool,
}

impl Lzma2Scan {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the end marker has been seen.
    pub fn done(&self) -> bool {
        self.done
    }

    /// Examines `data` and returns how many leading bytes belong to the
    /// stream. The count is short of `data.len()` only once the end
    /// marker is reached.
    pub fn push(&mut self, data: &[u8]) -> Result<usize> {
        let mut pos = 0usize;

        while pos < data.len() && !self.done {
            if self.skip > 0 {
                let n = self.skip.min(data.len() - pos);
                self.skip -= n;
                pos += n;
                continue;
            }

            self.hdr.push(data[pos]);
            pos += 1;

            let control = self.hdr[0];
            if control == 0 {
                self.done = true;
                break;
            }
            if control < 0x80 {
                // uncompressed chunk: control, BE16 size-1
                if control > 2 {
                    return Err(Error::Codec(format!(
                        "invalid LZMA2 chunk control byte {control:#04x}"
                    )));
                }
                if self.hdr.len() == 3 {
                    self.skip = usize::from(u16::from_be_bytes([self.hdr[1], self.hdr[2]])) + 1;
                    self.hdr.clear();
                }
            } else {
                // compressed chunk: control (5 bits of unpacked size),
                // BE16 unpacked-1, BE16 packed-1, props byte on full reset
                let need = if (control >> 5) & 0x3 >= 2 { 6 } else { 5 };
                if self.hdr.len() == need {
                    self.skip = usize::from(u16::from_be_bytes([self.hdr[3], self.hdr[4]])) + 1;
                    self.hdr.clear();
                }
            }
        }

        Ok(pos)
    }
}
