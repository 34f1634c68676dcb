//! End-to-end ISO-9660 scenarios.

mod common;

use arkpack::iso::{IsoEntry, IsoReader, IsoReaderOptions, IsoWriter, IsoWriterOptions};
use arkpack::{ReadEvent, WriteEvent};
use common::{Sink, drive_chunked};

fn file(name: &str, size: u64) -> IsoEntry {
    IsoEntry {
        name: name.into(),
        mtime: 1_600_000_000,
        attr: 0o100644,
        size,
        ..IsoEntry::default()
    }
}

fn dir(name: &str) -> IsoEntry {
    IsoEntry {
        name: name.into(),
        mtime: 1_600_000_000,
        attr: 0o040755,
        ..IsoEntry::default()
    }
}

/// Writes the standard four-entry image used by the scenarios.
fn write_image(options: IsoWriterOptions) -> Vec<u8> {
    let entries = [
        file("afile.txt", 10),
        dir("mydirectory"),
        file("zfilename.txt", 14),
        file("mydirectory/file3.txt", 10),
    ];
    let payloads: [&[u8]; 3] = [b"data-afile", b"data-zfilename", b"data-file3"];

    let mut w = IsoWriter::new(options);
    for e in &entries {
        w.add_file(e).unwrap();
    }

    let mut sink = Sink::new();
    let mut out = Vec::new();
    let mut payload_iter = payloads.iter();
    let mut current: &[u8] = &[];
    let mut pending: Option<&[u8]> = None;

    loop {
        let mut input = current;
        let ev = w.process(&mut input, &mut out).unwrap();
        current = input;
        match ev {
            WriteEvent::More => {
                if let Some(rest) = pending.take() {
                    current = rest;
                    continue;
                }
                match payload_iter.next() {
                    Some(&data) => {
                        w.next_file().unwrap();
                        pending = Some(data);
                    }
                    None => w.finish().unwrap(),
                }
            }
            WriteEvent::Done => return sink.buf,
            ev => {
                sink.apply(ev, &out);
            }
        }
    }
}

fn read_names(image: &[u8], options: IsoReaderOptions) -> (IsoReader, Vec<(String, u64)>) {
    let mut r = IsoReader::new(options);
    let mut names = Vec::new();
    drive_chunked(&mut r, image, 64 * 1024, |r, ev, _| {
        if ev == ReadEvent::FileHeader {
            let e = r.entry();
            names.push((e.name.clone(), e.size));
        }
        true
    })
    .unwrap();
    (r, names)
}

fn read_file_data(r: &mut IsoReader, image: &[u8], index: usize) -> Vec<u8> {
    r.read_file(index).unwrap();
    let mut data = Vec::new();
    let mut done = false;
    drive_chunked(r, image, 64 * 1024, |_, ev, out| match ev {
        ReadEvent::Data => {
            data.extend_from_slice(out);
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
    data
}

#[test]
fn roundtrip_without_joliet() {
    let image = write_image(IsoWriterOptions::default());
    assert_eq!(image.len() % 2048, 0);

    let (mut r, names) = read_names(
        &image,
        IsoReaderOptions {
            no_joliet: true,
            ..IsoReaderOptions::default()
        },
    );

    let expected = [
        ("afile.txt", 10u64),
        ("mydirectory", 0),
        ("zfilename.txt", 14),
        ("mydirectory/file3.txt", 10),
    ];
    assert_eq!(names.len(), 4);
    for (i, ((name, size), (want_name, want_size))) in names.iter().zip(expected).enumerate() {
        assert_eq!(name, want_name);
        if i != 1 {
            assert_eq!(*size, want_size);
        }
    }

    assert_eq!(read_file_data(&mut r, &image, 0), b"data-afile");
    assert_eq!(read_file_data(&mut r, &image, 2), b"data-zfilename");
    assert_eq!(read_file_data(&mut r, &image, 3), b"data-file3");
}

#[test]
fn rock_ridge_disabled_yields_iso_level_names() {
    let image = write_image(IsoWriterOptions::default());

    let (_, names) = read_names(
        &image,
        IsoReaderOptions {
            no_joliet: true,
            no_rock_ridge: true,
        },
    );

    let expected = ["AFILE.TXT", "MYDIRECT", "ZFILENAM.TXT", "MYDIRECT/FILE3.TXT"];
    assert_eq!(names.len(), 4);
    for ((name, _), want) in names.iter().zip(expected) {
        assert_eq!(name, want);
    }
}

#[test]
fn joliet_names_preferred_when_enabled() {
    let image = write_image(IsoWriterOptions::default());

    let (mut r, names) = read_names(&image, IsoReaderOptions::default());
    assert_eq!(names.len(), 4);
    assert_eq!(names[0].0, "afile.txt");
    assert_eq!(names[3].0, "mydirectory/file3.txt");

    assert_eq!(read_file_data(&mut r, &image, 0), b"data-afile");
    assert_eq!(read_file_data(&mut r, &image, 3), b"data-file3");
}

#[test]
fn no_joliet_image_reads_back() {
    let image = write_image(IsoWriterOptions {
        no_joliet: true,
        ..IsoWriterOptions::default()
    });

    let (mut r, names) = read_names(&image, IsoReaderOptions::default());
    assert_eq!(names.len(), 4);
    assert_eq!(names[0].0, "afile.txt");
    assert_eq!(read_file_data(&mut r, &image, 2), b"data-zfilename");
}

#[test]
fn out_of_order_directory_rejected() {
    let mut w = IsoWriter::new(IsoWriterOptions::default());
    let err = w.add_file(&file("missing/file.txt", 1)).unwrap_err();
    assert!(matches!(err, arkpack::Error::BadStructure(_)));
}
