//! End-to-end `.7z` scenarios over hand-assembled archives.

mod common;

use arkpack::checksum::Crc32;
use arkpack::sevenz::SevenZReader;
use arkpack::varint::sevenz_encode;
use arkpack::{Error, ReadEvent};
use common::drive_chunked;

fn v(n: u64, out: &mut Vec<u8>) {
    sevenz_encode(n, out);
}

fn utf16le_name(name: &str, out: &mut Vec<u8>) {
    for unit in name.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out.extend_from_slice(&[0, 0]);
}

/// `MainStreamsInfo` body describing one folder over one packed stream.
struct FolderDesc<'a> {
    pack_pos: u64,
    pack_size: u64,
    /// Raw coder records (already encoded).
    coders: &'a [u8],
    ncoders: u64,
    bonds: u64,
    unpack_sizes: &'a [u64],
    folder_crc: u32,
    /// `(sizes of all but the last substream, crc of each substream)`
    substreams: Option<(&'a [u64], &'a [u32])>,
}

/// Streams-info body: `PackInfo UnpackInfo SubStreamsInfo End`. The
/// trailing end marker pops the enclosing context (`MainStreamsInfo` or
/// `EncodedHeader`).
fn streams_info(d: &FolderDesc<'_>) -> Vec<u8> {
    let mut m = Vec::new();

    m.push(0x06); // PackInfo
    v(d.pack_pos, &mut m);
    v(1, &mut m);
    m.push(0x09); // Size
    v(d.pack_size, &mut m);
    m.push(0x00); // End of PackInfo

    m.push(0x07); // UnpackInfo
    m.push(0x0b); // Folder
    v(1, &mut m);
    m.push(0); // not external
    v(d.ncoders, &mut m);
    m.extend_from_slice(d.coders);
    for i in 0..d.bonds {
        v(i + 1, &mut m); // in index
        v(i, &mut m); // out index
    }
    m.push(0x0c); // UnpackSize
    for &s in d.unpack_sizes {
        v(s, &mut m);
    }
    m.push(0x0a); // CRC
    m.push(1); // all defined
    m.extend_from_slice(&d.folder_crc.to_le_bytes());
    m.push(0x00); // End of UnpackInfo

    m.push(0x08); // SubStreamsInfo
    if let Some((sizes, crcs)) = &d.substreams {
        m.push(0x0d); // NumUnPackStream
        v((sizes.len() + 1) as u64, &mut m);
        m.push(0x09); // Size
        for &s in *sizes {
            v(s, &mut m);
        }
        m.push(0x0a); // CRC
        m.push(1);
        for &c in *crcs {
            m.extend_from_slice(&c.to_le_bytes());
        }
    } else {
        // store-style single file: only a CRC record
        m.push(0x0a);
        m.push(1);
        m.extend_from_slice(&d.folder_crc.to_le_bytes());
    }
    m.push(0x00); // End of SubStreamsInfo

    m.push(0x00); // End of the enclosing streams context
    m
}

struct FilesDesc<'a> {
    names: &'a [&'a str],
    /// MSB-first bitmap of empty entries, one byte per 8 files.
    empty_bitmap: Option<&'a [u8]>,
    attrs: &'a [u32],
}

fn files_info(d: &FilesDesc<'_>) -> Vec<u8> {
    let mut m = Vec::new();
    m.push(0x05); // FilesInfo
    v(d.names.len() as u64, &mut m);

    if let Some(bitmap) = d.empty_bitmap {
        m.push(0x0e); // EmptyStream
        v(bitmap.len() as u64, &mut m);
        m.extend_from_slice(bitmap);
    }

    let mut names = Vec::new();
    for n in d.names {
        utf16le_name(n, &mut names);
    }
    m.push(0x11); // Name
    v(names.len() as u64 + 1, &mut m);
    m.push(0); // not external
    m.extend_from_slice(&names);

    m.push(0x15); // WinAttributes
    v(2 + 4 * d.attrs.len() as u64, &mut m);
    m.push(1); // all defined
    m.push(0); // not external
    for &a in d.attrs {
        m.extend_from_slice(&a.to_le_bytes());
    }

    m.push(0x00); // End of FilesInfo
    m
}

/// Assembles `signature header | payload | meta` with the meta block
/// prefixed by `0x01` (Header).
fn assemble(payload: &[u8], meta_body: Vec<u8>) -> Vec<u8> {
    let mut meta = vec![0x01]; // Header
    meta.extend_from_slice(&meta_body);
    meta.push(0x00); // End of Header
    assemble_raw(payload, meta)
}

fn assemble_raw(payload: &[u8], meta: Vec<u8>) -> Vec<u8> {
    let mut image = Vec::new();
    image.extend_from_slice(b"7z\xbc\xaf\x27\x1c");
    image.extend_from_slice(&[0, 4]);

    let mut tail = Vec::new();
    tail.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    tail.extend_from_slice(&(meta.len() as u64).to_le_bytes());
    tail.extend_from_slice(&Crc32::compute(&meta).to_le_bytes());

    image.extend_from_slice(&Crc32::compute(&tail).to_le_bytes());
    image.extend_from_slice(&tail);
    image.extend_from_slice(payload);
    image.extend_from_slice(&meta);
    image
}

/// Drives a reader over the image collecting `(name, data)` per entry.
fn read_all(image: &[u8], chunk: usize) -> Vec<(String, u32, Vec<u8>)> {
    let mut r = SevenZReader::new();

    // enumerate: drive until the metadata is parsed
    drive_chunked(&mut r, image, chunk, |_, _, _| true).unwrap();

    let mut files = Vec::new();
    loop {
        let Some(entry) = r.next_file() else { break };
        let name = entry.name.clone();
        let attr = entry.attr;
        let mut data = Vec::new();
        let mut pos = 0usize;
        let mut out = Vec::new();
        loop {
            let end = (pos + chunk).min(image.len());
            let mut input = &image[pos.min(image.len())..end];
            let before = input.len();
            let ev = r.process(&mut input, &mut out).unwrap();
            pos += before - input.len();
            match ev {
                ReadEvent::Seek(off) => pos = off as usize,
                ReadEvent::Data => data.extend_from_slice(&out),
                ReadEvent::FileDone => break,
                ReadEvent::More => assert!(pos < image.len(), "reader starved"),
                ev => panic!("unexpected event {ev:?}"),
            }
        }
        files.push((name, attr, data));
    }
    files
}

const PAYLOAD: &[u8] = b"data-afiledata-zfile";

fn store_meta_body() -> Vec<u8> {
    let mut body = vec![0x04]; // MainStreamsInfo
    body.extend_from_slice(&streams_info(&FolderDesc {
        pack_pos: 0,
        pack_size: PAYLOAD.len() as u64,
        coders: &[0x01, 0x00], // one coder: id length 1, method "store"
        ncoders: 1,
        bonds: 0,
        unpack_sizes: &[PAYLOAD.len() as u64],
        folder_crc: Crc32::compute(PAYLOAD),
        substreams: Some((
            &[10],
            &[
                Crc32::compute(b"data-afile"),
                Crc32::compute(b"data-zfile"),
            ],
        )),
    }));
    body.extend_from_slice(&files_info(&FilesDesc {
        names: &["afile.txt", "zfile.bin", "empty.txt", "dir"],
        empty_bitmap: Some(&[0x30]), // entries 2 and 3 are empty
        attrs: &[0x20, 0x20, 0x20, 0x10],
    }));
    body
}

#[test]
fn store_folder_with_empty_files_and_dir() {
    let image = assemble(PAYLOAD, store_meta_body());

    let files = read_all(&image, 64 * 1024);
    assert_eq!(files.len(), 4);
    assert_eq!(files[0].0, "afile.txt");
    assert_eq!(files[0].2, b"data-afile");
    assert_eq!(files[1].0, "zfile.bin");
    assert_eq!(files[1].2, b"data-zfile");
    assert_eq!(files[2].0, "empty.txt");
    assert_eq!(files[2].2, b"");
    assert_eq!(files[3].0, "dir");
    assert_eq!(files[3].1, 0x10);
    assert_eq!(files[3].2, b"");
}

#[test]
fn store_folder_survives_small_chunks() {
    let image = assemble(PAYLOAD, store_meta_body());
    let files = read_all(&image, 3);
    assert_eq!(files.len(), 4);
    assert_eq!(files[0].2, b"data-afile");
    assert_eq!(files[1].2, b"data-zfile");
}

#[test]
fn lzma2_folder_roundtrip() {
    // an LZMA2 stream of one uncompressed chunk
    let mut packed = vec![0x01, 0x00, (PAYLOAD.len() - 1) as u8];
    packed.extend_from_slice(PAYLOAD);
    packed.push(0x00);

    let mut body = vec![0x04]; // MainStreamsInfo
    body.extend_from_slice(&streams_info(&FolderDesc {
        pack_pos: 0,
        pack_size: packed.len() as u64,
        // one coder: id length 1 | props flag, method lzma2, 1 prop byte
        coders: &[0x21, 0x21, 0x01, 0x16],
        ncoders: 1,
        bonds: 0,
        unpack_sizes: &[PAYLOAD.len() as u64],
        folder_crc: Crc32::compute(PAYLOAD),
        substreams: None,
    }));
    body.extend_from_slice(&files_info(&FilesDesc {
        names: &["packed.bin"],
        empty_bitmap: None,
        attrs: &[0x20],
    }));
    let image = assemble(&packed, body);

    let files = read_all(&image, 7);
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].0, "packed.bin");
    assert_eq!(files[0].2, PAYLOAD);
}

#[test]
fn lzma2_with_x86_filter_chain() {
    // payload with no branch opcodes: the x86 pass must be a no-op
    let mut packed = vec![0x01, 0x00, (PAYLOAD.len() - 1) as u8];
    packed.extend_from_slice(PAYLOAD);
    packed.push(0x00);

    let mut coders = Vec::new();
    coders.extend_from_slice(&[0x21, 0x21, 0x01, 0x16]); // lzma2 + props
    coders.extend_from_slice(&[0x04, 0x03, 0x03, 0x01, 0x03]); // x86, id length 4

    let mut body = vec![0x04]; // MainStreamsInfo
    body.extend_from_slice(&streams_info(&FolderDesc {
        pack_pos: 0,
        pack_size: packed.len() as u64,
        coders: &coders,
        ncoders: 2,
        bonds: 1,
        unpack_sizes: &[PAYLOAD.len() as u64, PAYLOAD.len() as u64],
        folder_crc: Crc32::compute(PAYLOAD),
        substreams: None,
    }));
    body.extend_from_slice(&files_info(&FilesDesc {
        names: &["prog.bin"],
        empty_bitmap: None,
        attrs: &[0x20],
    }));
    let image = assemble(&packed, body);

    let files = read_all(&image, 64 * 1024);
    assert_eq!(files[0].2, PAYLOAD);
}

#[test]
fn encoded_header_is_unpacked_and_reparsed() {
    // inner metadata: the plain store archive's Header block
    let mut inner = vec![0x01];
    inner.extend_from_slice(&store_meta_body());
    inner.push(0x00);

    // the packed header is stored (copy coder) right after the payload
    let mut outer = vec![0x17]; // EncodedHeader
    outer.extend_from_slice(&streams_info(&FolderDesc {
        pack_pos: PAYLOAD.len() as u64,
        pack_size: inner.len() as u64,
        coders: &[0x01, 0x00],
        ncoders: 1,
        bonds: 0,
        unpack_sizes: &[inner.len() as u64],
        folder_crc: Crc32::compute(&inner),
        substreams: None,
    }));
    let mut payload = PAYLOAD.to_vec();
    payload.extend_from_slice(&inner);
    let image = assemble_raw(&payload, outer);

    let files = read_all(&image, 64 * 1024);
    assert_eq!(files.len(), 4);
    assert_eq!(files[0].0, "afile.txt");
    assert_eq!(files[0].2, b"data-afile");
    assert_eq!(files[1].2, b"data-zfile");
}

#[test]
fn corrupt_file_data_is_a_crc_error() {
    let mut image = assemble(PAYLOAD, store_meta_body());
    let pos = image.windows(10).position(|w| w == b"data-afile").unwrap();
    image[pos] ^= 1;

    let mut r = SevenZReader::new();
    drive_chunked(&mut r, &image, 64 * 1024, |_, _, _| true).unwrap();
    let _ = r.next_file().unwrap();

    let mut pos = 0usize;
    let mut out = Vec::new();
    let err = loop {
        let mut input = &image[pos..];
        let before = input.len();
        match r.process(&mut input, &mut out) {
            Ok(ReadEvent::Seek(off)) => pos = off as usize,
            Ok(_) => pos += before - input.len(),
            Err(e) => break e,
        }
    };
    assert!(matches!(err, Error::BadDataCrc { .. }));
}

#[test]
fn bad_signature_rejected() {
    let mut image = assemble(PAYLOAD, store_meta_body());
    image[0] = b'8';
    let mut r = SevenZReader::new();
    let res = drive_chunked(&mut r, &image, 64 * 1024, |_, _, _| true);
    assert!(matches!(res, Err(Error::BadMagic { .. })));
}
