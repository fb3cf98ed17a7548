use std::io::{Cursor, Write};
use std::path::PathBuf;

use flate2::write::GzEncoder;
use flate2::Compression;
use uuid::Uuid;

pub fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("patchops-{}-test-{}", tag, Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create temp directory");
    dir
}

/// Bytes that pass the PE header and minimum size checks. The body is
/// xorshift noise so archives built from it stay above the size floor.
pub fn fake_pe(tag: u8) -> Vec<u8> {
    let mut state = 0x9e37_79b9_7f4a_7c15u64 ^ u64::from(tag).wrapping_mul(0x100_0000_01b3);
    let mut bytes = b"MZ".to_vec();
    for _ in 0..8192 {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        bytes.push((state >> 24) as u8);
    }
    bytes
}

pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer
            .start_file(
                *name,
                zip::write::FileOptions::default()
                    .compression_method(zip::CompressionMethod::Stored),
            )
            .expect("start zip entry");
        writer.write_all(data).expect("write zip entry");
    }
    writer.finish().expect("finish zip").into_inner()
}

fn tar_into<W: Write>(writer: W, entries: &[(&str, &[u8])]) -> W {
    let mut builder = tar::Builder::new(writer);
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, name, *data)
            .expect("append tar entry");
    }
    builder.into_inner().expect("finish tar")
}

pub fn tar_gz_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    tar_into(GzEncoder::new(Vec::new(), Compression::default()), entries)
        .finish()
        .expect("finish gzip")
}

pub fn tar_xz_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    tar_into(xz2::write::XzEncoder::new(Vec::new(), 6), entries)
        .finish()
        .expect("finish xz")
}

pub fn tar_bz2_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    tar_into(
        bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default()),
        entries,
    )
    .finish()
    .expect("finish bzip2")
}
