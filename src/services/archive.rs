//! ZIP packaging of a folder for download.

use bytes::Bytes;
use std::io::{Cursor, Write};
use zip::{CompressionMethod, ZipWriter, result::ZipResult, write::SimpleFileOptions};

/// A folder packed into one archive, ready to send.
#[derive(Debug)]
pub struct FolderArchive {
    pub file_name: String,
    pub entries: usize,
    pub data: Bytes,
}

/// Pack `(path, payload)` pairs into a deflated ZIP, in the order given.
pub fn build_zip(entries: &[(String, Bytes)]) -> ZipResult<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (path, payload) in entries {
        writer.start_file(path.as_str(), options)?;
        writer.write_all(payload)?;
    }
    Ok(writer.finish()?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::ZipArchive;

    #[test]
    fn test_should_pack_entries_in_order() {
        let entries = vec![
            ("a.txt".to_string(), Bytes::from_static(b"alpha")),
            ("sub/b.txt".to_string(), Bytes::from_static(b"beta")),
        ];
        let data = build_zip(&entries).unwrap_or_else(|e| panic!("build_zip failed: {e}"));

        let mut archive =
            ZipArchive::new(Cursor::new(data)).unwrap_or_else(|e| panic!("open zip failed: {e}"));
        assert_eq!(archive.len(), 2);
        let mut content = String::new();
        archive
            .by_name("sub/b.txt")
            .unwrap_or_else(|e| panic!("missing entry: {e}"))
            .read_to_string(&mut content)
            .unwrap_or_else(|e| panic!("read entry failed: {e}"));
        assert_eq!(content, "beta");
        let first = archive
            .by_index(0)
            .unwrap_or_else(|e| panic!("missing entry: {e}"))
            .name()
            .to_string();
        assert_eq!(first, "a.txt");
    }
}
