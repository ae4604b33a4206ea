//! On-disk table-of-contents records.
//!
//! An archive is four regions in order:
//! - Header (0x30 bytes)
//! - File index (0x20 bytes x file_count; entry 0 is the filename blob)
//! - Chunk index (8 bytes x chunk_count, compressed archives only)
//! - Data region, starting 16-byte aligned at `data_offset`
//!
//! All integers are little-endian.

use std::io::{Read, Seek, SeekFrom, Write};

use binrw::{binrw, BinReaderExt, BinWriterExt, VecArgs};
use byteorder::{LittleEndian, WriteBytesExt};

use crate::error::{HgpakError, Result};

/// Archive format version this crate reads and writes.
pub const CURRENT_VERSION: u64 = 2;

/// Size of the fixed header block.
pub const HEADER_SIZE: u64 = 0x30;
/// Size of one file index entry.
pub const FILE_ENTRY_SIZE: u64 = 0x20;
/// Size of one chunk index entry.
pub const CHUNK_ENTRY_SIZE: u64 = 0x8;

/// The 0x30-byte archive header.
#[binrw]
#[brw(little, magic = b"HGPAK\0\0\0")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveHeader {
    pub version: u64,
    /// Number of file index entries, including the filename blob at index 0.
    pub file_count: u64,
    /// Number of logical decompressed chunks in the data region.
    pub chunk_count: u64,
    #[br(map = |v: u8| v != 0)]
    #[bw(map = |v: &bool| u8::from(*v))]
    #[brw(pad_after = 7)]
    pub is_compressed: bool,
    /// Absolute offset of the first chunk's data.
    pub data_offset: u64,
}

impl ArchiveHeader {
    /// Read and validate the header at the start of `reader`.
    pub fn read<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        reader.seek(SeekFrom::Start(0))?;
        let header: ArchiveHeader = reader.read_le()?;
        if header.version != CURRENT_VERSION {
            return Err(HgpakError::InvalidFormat(format!(
                "unsupported archive version {}",
                header.version
            )));
        }
        Ok(header)
    }

    /// Emit the full 0x30-byte block in one shot.
    pub fn write<W: Write + Seek>(&self, writer: &mut W) -> Result<()> {
        writer.write_le(self)?;
        Ok(())
    }
}

/// One 0x20-byte file index entry.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileEntry {
    /// MD5 digest of the stored (lowercased, forward-slash) path, raw bytes.
    pub name_hash: [u8; 16],
    /// Absolute offset of the file's data within the archive.
    pub start_offset: u64,
    /// Exact byte length of the file once decompressed.
    pub decompressed_size: u64,
}

/// Read exactly `count` file index entries.
pub fn read_file_index<R: Read + Seek>(reader: &mut R, count: u64) -> Result<Vec<FileEntry>> {
    let entries: Vec<FileEntry> =
        reader.read_le_args(VecArgs::builder().count(count as usize).finalize())?;
    Ok(entries)
}

/// Write file index entries in order.
pub fn write_file_index<W: Write + Seek>(writer: &mut W, entries: &[FileEntry]) -> Result<()> {
    for entry in entries {
        writer.write_le(entry)?;
    }
    Ok(())
}

/// Read the compressed-size vector of the chunk index.
pub fn read_chunk_index<R: Read + Seek>(reader: &mut R, chunk_count: u64) -> Result<Vec<u64>> {
    let sizes: Vec<u64> =
        reader.read_le_args(VecArgs::builder().count(chunk_count as usize).finalize())?;
    Ok(sizes)
}

/// Write the chunk index; used to backfill the reserved region after the
/// data has been compressed.
pub fn write_chunk_index<W: Write>(writer: &mut W, sizes: &[u64]) -> Result<()> {
    for &size in sizes {
        writer.write_u64::<LittleEndian>(size)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn header_roundtrip() {
        let header = ArchiveHeader {
            version: 2,
            file_count: 7,
            chunk_count: 3,
            is_compressed: true,
            data_offset: 0x110,
        };
        let mut buffer = Cursor::new(Vec::new());
        header.write(&mut buffer).unwrap();

        let bytes = buffer.get_ref().clone();
        assert_eq!(bytes.len() as u64, HEADER_SIZE);
        assert_eq!(&bytes[..5], b"HGPAK");
        assert_eq!(&bytes[5..8], &[0, 0, 0]);
        // The compressed flag's reserved bytes stay zero.
        assert_eq!(&bytes[0x21..0x28], &[0u8; 7]);

        buffer.set_position(0);
        let read_back = ArchiveHeader::read(&mut buffer).unwrap();
        assert_eq!(read_back, header);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buffer = Cursor::new(b"NOTPAK\0\0garbage bytes following the magic".to_vec());
        let err = ArchiveHeader::read(&mut buffer).unwrap_err();
        assert!(matches!(err, HgpakError::InvalidFormat(_)), "{err}");
    }

    #[test]
    fn rejects_unknown_version() {
        let header = ArchiveHeader {
            version: 3,
            file_count: 1,
            chunk_count: 0,
            is_compressed: false,
            data_offset: 0x50,
        };
        let mut buffer = Cursor::new(Vec::new());
        header.write(&mut buffer).unwrap();
        buffer.set_position(0);
        let err = ArchiveHeader::read(&mut buffer).unwrap_err();
        assert!(matches!(err, HgpakError::InvalidFormat(_)), "{err}");
    }

    #[test]
    fn rejects_truncated_header() {
        let mut buffer = Cursor::new(b"HGPAK\0\0\0\x02\0\0\0".to_vec());
        let err = ArchiveHeader::read(&mut buffer).unwrap_err();
        assert!(matches!(err, HgpakError::InvalidFormat(_)), "{err}");
    }

    #[test]
    fn file_index_roundtrip() {
        let entries = vec![
            FileEntry {
                name_hash: [0xAB; 16],
                start_offset: 0x110,
                decompressed_size: 0x2C,
            },
            FileEntry {
                name_hash: [0x01; 16],
                start_offset: 0x140,
                decompressed_size: 0x1234,
            },
        ];
        let mut buffer = Cursor::new(Vec::new());
        write_file_index(&mut buffer, &entries).unwrap();
        assert_eq!(buffer.get_ref().len() as u64, 2 * FILE_ENTRY_SIZE);

        buffer.set_position(0);
        assert_eq!(read_file_index(&mut buffer, 2).unwrap(), entries);
    }

    #[test]
    fn chunk_index_roundtrip() {
        let sizes = vec![0x10000u64, 0x8421, 0x1C];
        let mut buffer = Cursor::new(Vec::new());
        write_chunk_index(&mut buffer, &sizes).unwrap();
        assert_eq!(buffer.get_ref().len() as u64, 3 * CHUNK_ENTRY_SIZE);

        buffer.set_position(0);
        assert_eq!(read_chunk_index(&mut buffer, 3).unwrap(), sizes);
    }
}
