//! End-to-end `.zip` scenarios.

mod common;

use arkpack::Timestamp;
use arkpack::zip::{
    ZipEntry, ZipFileOptions, ZipMethod, ZipReader, ZipReaderConfig, ZipWriter, ZipWriterConfig,
};
use arkpack::{ReadEvent, Warning, WriteEvent};
use common::{Sink, drive_chunked};

fn opts(name: &str, method: ZipMethod) -> ZipFileOptions {
    ZipFileOptions {
        name: name.into(),
        mtime: Timestamp::from_unix(1_600_000_000),
        attr_unix: 0o100644,
        uid: 1000,
        gid: 100,
        method,
        ..ZipFileOptions::default()
    }
}

fn dir_opts(name: &str) -> ZipFileOptions {
    ZipFileOptions {
        name: name.into(),
        mtime: Timestamp::from_unix(1_600_000_000),
        attr_unix: 0o040755,
        attr_win: 0x10,
        ..ZipFileOptions::default()
    }
}

fn write_zip(non_seekable: bool, entries: &[(ZipFileOptions, &[u8])]) -> Vec<u8> {
    let mut w = ZipWriter::new(ZipWriterConfig {
        non_seekable,
        timezone_offset: 0,
    });
    let mut sink = Sink::new();
    let mut out = Vec::new();

    for (o, data) in entries {
        w.add_file(o).unwrap();
        w.finish_file();
        let mut input: &[u8] = data;
        let mut guard = 0;
        loop {
            match w.process(&mut input, &mut out).unwrap() {
                WriteEvent::FileDone => break,
                WriteEvent::More => {}
                ev => {
                    sink.apply(ev, &out);
                }
            }
            guard += 1;
            assert!(guard < 100_000, "writer made no progress");
        }
    }

    w.finish();
    let mut input: &[u8] = &[];
    loop {
        match w.process(&mut input, &mut out).unwrap() {
            WriteEvent::Done => return sink.buf,
            ev => {
                sink.apply(ev, &out);
            }
        }
    }
}

fn enumerate(image: &[u8]) -> Vec<ZipEntry> {
    let mut r = ZipReader::new(image.len() as u64, ZipReaderConfig::default());
    let mut entries = Vec::new();
    drive_chunked(&mut r, image, 64 * 1024, |r, ev, _| {
        if ev == ReadEvent::FileHeader {
            entries.push(r.entry().clone());
        }
        true
    })
    .unwrap();
    entries
}

fn read_entry(image: &[u8], entry: &ZipEntry) -> (Vec<u8>, Vec<Warning>) {
    let mut r = ZipReader::new(image.len() as u64, ZipReaderConfig::default());
    r.read_file(entry.hdr_offset, entry.compressed_size);
    let mut data = Vec::new();
    let mut warnings = Vec::new();
    let mut done = false;
    drive_chunked(&mut r, image, 4096, |_, ev, out| match ev {
        ReadEvent::Data => {
            data.extend_from_slice(out);
            true
        }
        ReadEvent::Warning(w) => {
            warnings.push(w);
            true
        }
        ReadEvent::FileDone => {
            done = true;
            false
        }
        _ => true,
    })
    .unwrap();
    assert!(done);
    (data, warnings)
}

fn standard_entries() -> Vec<(ZipFileOptions, &'static [u8])> {
    vec![
        (
            opts("file-deflated", ZipMethod::Deflated),
            b"deflated payload, deflated payload, deflated payload".as_slice(),
        ),
        (opts("file-stored", ZipMethod::Stored), b"stored payload"),
        (opts("file-empty", ZipMethod::Stored), b""),
        (dir_opts("dir/"), b""),
    ]
}

fn check_archive(image: &[u8]) {
    let entries = enumerate(image);
    assert_eq!(entries.len(), 4);

    assert_eq!(entries[0].name, "file-deflated");
    assert_eq!(entries[0].method, ZipMethod::Deflated);
    assert_eq!(entries[1].name, "file-stored");
    assert_eq!(entries[1].method, ZipMethod::Stored);
    assert_eq!(entries[2].name, "file-empty");
    assert_eq!(entries[2].uncompressed_size, 0);
    assert_eq!(entries[3].name, "dir/");
    assert!(entries[3].is_dir());

    for e in &entries {
        assert_eq!(e.mtime.secs, 1_600_000_000);
        assert_eq!(e.uid, 1000);
        assert_eq!(e.gid, 100);
    }

    let (data, warnings) = read_entry(image, &entries[0]);
    assert_eq!(data, b"deflated payload, deflated payload, deflated payload");
    assert!(warnings.is_empty());

    let (data, warnings) = read_entry(image, &entries[1]);
    assert_eq!(data, b"stored payload");
    assert!(warnings.is_empty());

    let (data, warnings) = read_entry(image, &entries[2]);
    assert_eq!(data, b"");
    assert!(warnings.is_empty());
}

#[test]
fn seekable_archive_roundtrip() {
    let image = write_zip(false, &standard_entries());
    check_archive(&image);
}

#[test]
fn non_seekable_archive_roundtrip() {
    let image = write_zip(true, &standard_entries());
    // a non-seekable stream carries zip64 data descriptors
    assert!(
        image
            .windows(4)
            .any(|w| w == b"PK\x07\x08")
    );
    check_archive(&image);
}

#[test]
fn zstd_entry_roundtrip() {
    let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let image = write_zip(false, &[(opts("big.bin", ZipMethod::Zstandard), &payload)]);

    let entries = enumerate(&image);
    assert_eq!(entries[0].method, ZipMethod::Zstandard);
    assert_eq!(entries[0].uncompressed_size, payload.len() as u64);

    let (data, warnings) = read_entry(&image, &entries[0]);
    assert_eq!(data, payload);
    assert!(warnings.is_empty());
}

#[test]
fn corrupting_stored_payload_raises_crc_warning() {
    let mut image = write_zip(false, &[(opts("x", ZipMethod::Stored), b"stable payload")]);
    let pos = image
        .windows(14)
        .position(|w| w == b"stable payload")
        .unwrap();
    image[pos] ^= 0x01;

    let entries = enumerate(&image);
    let (_, warnings) = read_entry(&image, &entries[0]);
    assert!(matches!(
        warnings.as_slice(),
        [Warning::DataCrcMismatch { .. }]
    ));
}

#[test]
fn empty_name_rejected() {
    let mut w = ZipWriter::new(ZipWriterConfig::default());
    for name in ["/", "..", "."] {
        let err = w.add_file(&opts(name, ZipMethod::Stored)).unwrap_err();
        assert!(matches!(err, arkpack::Error::NameInvalid(_)), "{name}");
    }
}

#[test]
fn eocd_carries_zip64_sentinels() {
    let image = write_zip(false, &standard_entries());
    let eocd = image.len() - 22;
    assert_eq!(&image[eocd..eocd + 4], b"PK\x05\x06");
    // entry count, size and offset are deferred to the zip64 EOCD
    assert_eq!(&image[eocd + 10..eocd + 12], &[0xff, 0xff]);
    assert_eq!(&image[eocd + 12..eocd + 16], &[0xff; 4]);
    assert_eq!(&image[eocd + 16..eocd + 20], &[0xff; 4]);
}
