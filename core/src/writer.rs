//! Archive writing: the fixed-size staging buffer and the packer.
//!
//! Archives are written whole; the file set, sizes and hashes are known
//! before the first byte of data goes out, so the header and file index are
//! emitted in one shot and only the chunk index is backfilled.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};
use md5::{Digest, Md5};

use crate::codec::{Compressor, Platform};
use crate::error::{HgpakError, Result};
use crate::format::{
    self, ArchiveHeader, FileEntry, CHUNK_ENTRY_SIZE, CURRENT_VERSION, FILE_ENTRY_SIZE,
    HEADER_SIZE,
};
use crate::manifest;
use crate::utils::{bins, padding, roundup};

/// Zero block for inter-file padding; `padding()` never exceeds 0xF.
const PAD: [u8; 0x10] = [0; 0x10];

/// Accumulates the logical data stream into chunk-sized blocks and emits
/// one block per filled chunk.
struct ChunkStager<'a, W: Write> {
    out: &'a mut W,
    compressor: &'a Compressor,
    compress: bool,
    scratch: Vec<u8>,
    /// Bytes still needed to fill the scratch block.
    remaining: usize,
    /// Compressed size recorded for each emitted block.
    block_sizes: Vec<u64>,
}

impl<'a, W: Write> ChunkStager<'a, W> {
    fn new(out: &'a mut W, compressor: &'a Compressor, compress: bool) -> Self {
        let chunk_size = compressor.chunk_size();
        Self {
            out,
            compressor,
            compress,
            scratch: vec![0u8; chunk_size],
            remaining: chunk_size,
            block_sizes: Vec::new(),
        }
    }

    /// Append `data`, flushing whenever the scratch block fills. Callers
    /// never pass more than one chunk at a time, so at most one wrap
    /// happens per call.
    fn add_bytes(&mut self, data: &[u8]) -> Result<()> {
        let chunk_size = self.scratch.len();
        let take = data.len().min(self.remaining);
        let filled = chunk_size - self.remaining;
        self.scratch[filled..filled + take].copy_from_slice(&data[..take]);
        self.remaining -= take;
        if self.remaining == 0 {
            self.flush_block()?;
        }
        if take < data.len() {
            let rest = &data[take..];
            self.scratch[..rest.len()].copy_from_slice(rest);
            self.remaining -= rest.len();
        }
        Ok(())
    }

    fn add_padding(&mut self, count: u64) -> Result<()> {
        self.add_bytes(&PAD[..count as usize])
    }

    /// Emit the buffered tail block. A no-op when nothing is buffered, so a
    /// data region that is an exact chunk multiple emits exactly one block
    /// per chunk.
    fn finish(&mut self) -> Result<()> {
        if self.remaining < self.scratch.len() {
            self.flush_block()?;
        }
        Ok(())
    }

    fn flush_block(&mut self) -> Result<()> {
        let chunk_size = self.scratch.len();
        if self.compress {
            let compressed = self.compressor.compress(&self.scratch)?;
            if compressed.len() >= chunk_size {
                // Compression made it worse; store the block verbatim and
                // record the full chunk size so readers see a passthrough.
                self.out.write_all(&self.scratch)?;
                self.block_sizes.push(chunk_size as u64);
            } else {
                self.out.write_all(&compressed)?;
                let pad = padding(compressed.len() as u64);
                self.out.write_all(&PAD[..pad as usize])?;
                self.block_sizes.push(compressed.len() as u64);
            }
        } else {
            self.out.write_all(&self.scratch)?;
        }
        self.scratch.fill(0);
        self.remaining = chunk_size;
        Ok(())
    }
}

/// Everything needed to produce one archive.
#[derive(Debug, Clone)]
pub struct PackRequest {
    /// Stored paths (lowercased, forward slashes), in pack order.
    pub paths: Vec<String>,
    /// Directory the stored paths are resolved against.
    pub root: PathBuf,
    /// File name of the archive being produced; hashed into index entry 0.
    pub pak_name: String,
    /// Chunk-compress the data region.
    pub compress: bool,
}

/// Write a complete archive for `request` into `out`.
///
/// Fails with `Unsupported` before writing anything when compression is
/// requested for a codec whose compression path is not implemented
/// (currently Zstd, i.e. windows/linux archives).
///
/// Paths are hashed from their stored (lowercased) form; archives produced
/// by tools that stored mixed-case paths will not repack hash-identically.
pub fn pack_archive<W: Write + Seek>(
    request: &PackRequest,
    compressor: &Compressor,
    out: &mut W,
) -> Result<()> {
    if request.compress && !compressor.supports_compression() {
        return Err(HgpakError::Unsupported(
            "zstd compression is not implemented; windows/linux archives can only be read".into(),
        ));
    }
    let chunk_size = compressor.chunk_size() as u64;

    // The filename blob is the archive's first logical file.
    let blob = manifest::assemble_blob(&request.paths);
    let blob_len = blob.len() as u64;

    let mut sizes = Vec::with_capacity(request.paths.len());
    for path in &request.paths {
        sizes.push(fs::metadata(request.root.join(path))?.len());
    }

    // Logical offsets within the decompressed data region: the blob first,
    // then every file on a 16-byte boundary.
    let mut offsets = Vec::with_capacity(sizes.len());
    let mut total = roundup(blob_len);
    for &size in &sizes {
        offsets.push(total);
        total += roundup(size);
    }

    let chunk_count = bins(total, chunk_size);
    let file_count = sizes.len() as u64 + 1;

    let mut data_offset = HEADER_SIZE
        + FILE_ENTRY_SIZE * file_count
        + if request.compress {
            CHUNK_ENTRY_SIZE * chunk_count
        } else {
            0
        };
    let extra_padding = padding(data_offset);
    data_offset += extra_padding;

    debug!(
        "packing {}: {} files, {total:#x} logical bytes, {chunk_count} chunks, data at {data_offset:#x}",
        request.pak_name,
        sizes.len()
    );

    let header = ArchiveHeader {
        version: CURRENT_VERSION,
        file_count,
        chunk_count,
        is_compressed: request.compress,
        data_offset,
    };
    header.write(out)?;

    let mut entries = Vec::with_capacity(sizes.len() + 1);
    entries.push(FileEntry {
        name_hash: Md5::digest(request.pak_name.as_bytes()).into(),
        start_offset: data_offset,
        decompressed_size: blob_len,
    });
    for (i, path) in request.paths.iter().enumerate() {
        entries.push(FileEntry {
            name_hash: Md5::digest(path.as_bytes()).into(),
            start_offset: data_offset + offsets[i],
            decompressed_size: sizes[i],
        });
    }
    format::write_file_index(out, &entries)?;

    // Reserve the chunk index region; it is backfilled below once the
    // compressed sizes are known.
    let chunk_index_offset = out.stream_position()?;
    if request.compress {
        out.write_all(&vec![
            0u8;
            (CHUNK_ENTRY_SIZE * chunk_count + extra_padding) as usize
        ])?;
    }

    let block_sizes = {
        let mut stager = ChunkStager::new(out, compressor, request.compress);
        for piece in blob.chunks(compressor.chunk_size()) {
            stager.add_bytes(piece)?;
        }
        stager.add_padding(padding(blob_len))?;
        for path in &request.paths {
            stream_file(&request.root.join(path), &mut stager)?;
        }
        stager.finish()?;
        stager.block_sizes
    };

    if request.compress {
        if block_sizes.len() as u64 != chunk_count {
            return Err(HgpakError::InvalidFormat(format!(
                "wrote {} blocks for {chunk_count} chunks",
                block_sizes.len()
            )));
        }
        out.seek(SeekFrom::Start(chunk_index_offset))?;
        format::write_chunk_index(out, &block_sizes)?;
        out.seek(SeekFrom::End(0))?;
    }
    out.flush()?;
    info!(
        "Packed {} files into {}",
        request.paths.len(),
        request.pak_name
    );
    Ok(())
}

/// Feed one source file through the stager, followed by its 16-byte
/// padding.
fn stream_file<W: Write>(path: &Path, stager: &mut ChunkStager<'_, W>) -> Result<()> {
    let file = File::open(path)?;
    let chunk_size = stager.scratch.len();
    let mut reader = BufReader::with_capacity(chunk_size, file);
    let mut buf = vec![0u8; chunk_size];
    let mut total = 0u64;
    loop {
        let n = read_up_to(&mut reader, &mut buf)?;
        if n == 0 {
            break;
        }
        stager.add_bytes(&buf[..n])?;
        total += n as u64;
    }
    stager.add_padding(padding(total))
}

/// Fill `buf` as far as the stream allows; a short count means end of file.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Pack `request` into the file at `output`.
pub fn pack_to_file(request: &PackRequest, platform: Platform, output: &Path) -> Result<()> {
    let compressor = Compressor::new(platform);
    let mut writer = BufWriter::new(File::create(output)?);
    pack_archive(request, &compressor, &mut writer)?;
    writer.flush()?;
    Ok(())
}

/// Rebuild an archive from a manifest written during unpack.
///
/// The archive `<manifest name minus ".manifest">` is recreated next to the
/// manifest from the files extracted beside it, in manifest order. A
/// manifest preserving the original order reproduces the original bytes.
/// Returns the path of the written archive.
pub fn repack_manifest(
    manifest_path: &Path,
    platform: Platform,
    compress: bool,
) -> Result<PathBuf> {
    let paths = manifest::parse_manifest(manifest_path)?;
    let file_name = manifest_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let pak_name = file_name
        .strip_suffix(manifest::MANIFEST_SUFFIX)
        .ok_or_else(|| {
            HgpakError::Unsupported(format!(
                "manifest file {file_name:?} does not end in {}",
                manifest::MANIFEST_SUFFIX
            ))
        })?;
    let root = manifest_path.parent().unwrap_or(Path::new(".")).to_path_buf();
    let output = root.join(pak_name);
    let request = PackRequest {
        paths,
        root,
        pak_name: pak_name.to_string(),
        compress,
    };
    pack_to_file(&request, platform, &output)?;
    Ok(output)
}
