//! End-to-end `.gz` scenarios.

mod common;

use arkpack::gz::{GzReader, GzWriter, GzWriterConfig};
use arkpack::{ReadEvent, Warning, WriteEvent};
use common::drive_chunked;

fn write_member(name: &str, comment: &str, mtime: u32, payload: &[u8]) -> Vec<u8> {
    let mut w = GzWriter::new(&GzWriterConfig {
        name: name.as_bytes().to_vec(),
        comment: comment.as_bytes().to_vec(),
        mtime,
        ..GzWriterConfig::default()
    })
    .unwrap();
    w.finish();

    let mut image = Vec::new();
    let mut input = payload;
    let mut out = Vec::new();
    loop {
        match w.process(&mut input, &mut out).unwrap() {
            WriteEvent::Data => image.extend_from_slice(&out),
            WriteEvent::Done => return image,
            WriteEvent::More => panic!("writer wants more after finish"),
            ev => panic!("unexpected event {ev:?}"),
        }
    }
}

#[test]
fn two_concatenated_members_roundtrip() {
    let mut image = write_member("file-name", "comment", 1234, b"plain data");
    image.extend(write_member("file-name", "comment", 1234, b"plain data"));

    let mut infos = Vec::new();
    let mut decoded = Vec::new();
    let mut done = false;

    let mut r = GzReader::new(Some(image.len() as u64));
    drive_chunked(&mut r, &image, 7, |r, ev, out| {
        match ev {
            ReadEvent::Info => {
                let info = r.info();
                infos.push((
                    info.name.clone(),
                    info.comment.clone(),
                    info.mtime,
                ));
            }
            ReadEvent::Data => decoded.extend_from_slice(out),
            ReadEvent::Done => done = true,
            ReadEvent::Warning(w) => panic!("unexpected warning {w:?}"),
            _ => {}
        }
        true
    })
    .unwrap();

    assert!(done);
    assert_eq!(decoded, b"plain dataplain data");
    assert_eq!(infos.len(), 2);
    for (name, comment, mtime) in &infos {
        assert_eq!(name, b"file-name");
        assert_eq!(comment, b"comment");
        assert_eq!(*mtime, 1234);
    }
}

#[test]
fn size_hint_recovers_uncompressed_size() {
    let image = write_member("", "", 0, b"plain data");

    let mut r = GzReader::new(Some(image.len() as u64));
    let mut got_info = false;
    drive_chunked(&mut r, &image, 64 * 1024, |r, ev, _| {
        if ev == ReadEvent::Info {
            assert_eq!(r.info().uncompressed_size, 10);
            got_info = true;
        }
        true
    })
    .unwrap();
    assert!(got_info);
}

#[test]
fn corrupted_payload_surfaces_crc_warning() {
    let mut image = write_member("", "", 0, b"some longer payload for the gz crc check");
    // flip a bit inside the deflate stream
    let mid = image.len() / 2;
    image[mid] ^= 0x01;

    let mut r = GzReader::new(Some(image.len() as u64));
    let mut warned = false;
    // a bit flip may break the deflate stream itself instead of just the
    // CRC; both outcomes are corruption reports
    let res = drive_chunked(&mut r, &image, 4096, |_, ev, _| {
        if let ReadEvent::Warning(Warning::DataCrcMismatch { .. }) = ev {
            warned = true;
            return false;
        }
        true
    });
    assert!(warned || res.is_err());
}

#[test]
fn unknown_size_reader_with_finish() {
    let image = write_member("n", "", 9, b"payload without a size hint");

    let mut r = GzReader::new(None);
    let mut decoded = Vec::new();
    let mut pos = 0usize;
    let mut out = Vec::new();
    loop {
        let mut input = &image[pos..];
        let before = input.len();
        let ev = r.process(&mut input, &mut out).unwrap();
        pos += before - input.len();
        match ev {
            ReadEvent::Data => decoded.extend_from_slice(&out),
            ReadEvent::More => {
                assert_eq!(pos, image.len(), "reader starved");
                r.finish();
            }
            ReadEvent::Done => break,
            ReadEvent::Seek(_) => panic!("no seek expected without a hint"),
            _ => {}
        }
    }
    assert_eq!(decoded, b"payload without a size hint");
}
