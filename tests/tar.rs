//! End-to-end `.tar` scenarios.

mod common;

use arkpack::tar::{TarEntry, TarReader, TarWriter};
use arkpack::{ReadEvent, WriteEvent};
use common::drive_chunked;

fn entry(name: &str, mode: u32, size: u64) -> TarEntry {
    TarEntry {
        name: name.into(),
        mode,
        uid: 1000,
        gid: 100,
        mtime: 1_600_000_000,
        size,
        ..TarEntry::default()
    }
}

fn write_archive(files: &[(TarEntry, &[u8])]) -> Vec<u8> {
    let mut w = TarWriter::new();
    let mut image = Vec::new();
    let mut out = Vec::new();

    for (meta, data) in files {
        w.add_file(meta).unwrap();
        w.finish_file();
        let mut input: &[u8] = data;
        loop {
            match w.process(&mut input, &mut out).unwrap() {
                WriteEvent::Data => image.extend_from_slice(&out),
                WriteEvent::FileDone => break,
                WriteEvent::More => {}
                ev => panic!("unexpected event {ev:?}"),
            }
        }
    }

    w.finish();
    let mut input: &[u8] = &[];
    loop {
        match w.process(&mut input, &mut out).unwrap() {
            WriteEvent::Data => image.extend_from_slice(&out),
            WriteEvent::Done => return image,
            ev => panic!("unexpected event {ev:?}"),
        }
    }
}

#[test]
fn longlink_directory_and_padding_roundtrip() {
    let long_name = format!("{}/file-with-a-very-long-name", "d".repeat(173));
    assert_eq!(long_name.len(), 200);

    let files: Vec<(TarEntry, &[u8])> = vec![
        (entry("afile.txt", 0o100644, 10), b"data-afile".as_slice()),
        (entry(&long_name, 0o100644, 9), b"long-data".as_slice()),
        (entry("dir/", 0o040755, 0), b"".as_slice()),
        (entry("zfile.bin", 0o100600, 600), &[0xabu8; 600]),
    ];
    let image = write_archive(&files);

    // archive length is a whole number of records
    assert_eq!(image.len() % 512, 0);

    let mut seen: Vec<(String, u64, u32)> = Vec::new();
    let mut payloads: Vec<Vec<u8>> = Vec::new();
    let mut current = Vec::new();
    let mut r = TarReader::new();
    drive_chunked(&mut r, &image, 100, |r, ev, out| {
        match ev {
            ReadEvent::FileHeader => {
                let e = r.entry();
                seen.push((e.name.clone(), e.size, e.mode));
                current.clear();
            }
            ReadEvent::Data => current.extend_from_slice(out),
            ReadEvent::FileDone => payloads.push(std::mem::take(&mut current)),
            ReadEvent::Warning(w) => panic!("unexpected warning {w:?}"),
            _ => {}
        }
        true
    })
    .unwrap();

    assert_eq!(seen.len(), 4);
    assert_eq!(seen[0], ("afile.txt".into(), 10, 0o100644));
    assert_eq!(seen[1].0, long_name);
    assert_eq!(seen[1].1, 9);
    assert_eq!(seen[2], ("dir/".into(), 0, 0o040755));
    assert_eq!(seen[3], ("zfile.bin".into(), 600, 0o100600));

    assert_eq!(payloads[0], b"data-afile");
    assert_eq!(payloads[1], b"long-data");
    assert_eq!(payloads[2], b"");
    assert_eq!(payloads[3], vec![0xabu8; 600]);
}

#[test]
fn interrecord_padding_is_zero() {
    let image = write_archive(&[(entry("a", 0o100644, 3), b"abc")]);
    // header record + data record + two (of three) terminator records
    assert!(image.len() >= 4 * 512);
    assert!(image[512 + 3..1024].iter().all(|&b| b == 0));
}

#[test]
fn ownership_and_times_survive() {
    let mut meta = entry("owned.txt", 0o100640, 5);
    meta.user_name = "alice".into();
    meta.group_name = "users".into();
    let image = write_archive(&[(meta, b"hello")]);

    let mut r = TarReader::new();
    let mut checked = false;
    drive_chunked(&mut r, &image, 512, |r, ev, _| {
        if ev == ReadEvent::FileHeader {
            let e = r.entry();
            assert_eq!(e.uid, 1000);
            assert_eq!(e.gid, 100);
            assert_eq!(e.mtime, 1_600_000_000);
            assert_eq!(e.user_name, "alice");
            assert_eq!(e.group_name, "users");
            checked = true;
        }
        true
    })
    .unwrap();
    assert!(checked);
}

#[test]
fn symlink_entry_roundtrip() {
    let mut meta = entry("link", 0o120777, 0);
    meta.link_to = "target/file".into();
    let image = write_archive(&[(meta, b"")]);

    let mut r = TarReader::new();
    let mut checked = false;
    drive_chunked(&mut r, &image, 512, |r, ev, _| {
        if ev == ReadEvent::FileHeader {
            let e = r.entry();
            assert_eq!(e.entry_type, arkpack::tar::TarType::SymLink);
            assert_eq!(e.link_to, "target/file");
            checked = true;
        }
        true
    })
    .unwrap();
    assert!(checked);
}

#[test]
fn size_mismatch_is_fatal_for_writer() {
    let mut w = TarWriter::new();
    w.add_file(&entry("short.bin", 0o100644, 100)).unwrap();
    w.finish_file();

    let mut input: &[u8] = b"only a little";
    let mut out = Vec::new();
    let err = loop {
        match w.process(&mut input, &mut out) {
            Ok(_) => {}
            Err(e) => break e,
        }
    };
    assert!(matches!(err, arkpack::Error::BadStructure(_)));
}
