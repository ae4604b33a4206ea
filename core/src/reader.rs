//! Archive reading: TOC parsing, chunk-granular decompression with a
//! bounded cache, and selective extraction.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use glob::Pattern;
use log::{debug, info, warn};
use lru::LruCache;

use crate::codec::{Compressor, Platform};
use crate::error::{HgpakError, Result};
use crate::format::{
    self, ArchiveHeader, FileEntry, CHUNK_ENTRY_SIZE, FILE_ENTRY_SIZE, HEADER_SIZE,
};
use crate::manifest;
use crate::utils::{bins, req_chunk_bytes, roundup};

/// Number of decompressed chunks kept per reader.
const CHUNK_CACHE_SIZE: usize = 256;

/// A packed file within an archive.
///
/// For compressed archives `offset` is relative to the start of the data
/// region; for uncompressed archives it is the absolute archive offset.
#[derive(Debug, Clone)]
pub struct PackedFile {
    /// Stored path (lowercased, forward slashes).
    pub path: String,
    pub offset: u64,
    pub size: u64,
    pub name_hash: [u8; 16],
}

impl PackedFile {
    /// The `(start, end)` indices of the chunks containing this file.
    ///
    /// A file beginning exactly on a chunk boundary starts in
    /// `offset / chunk_size`, not the chunk before it.
    pub fn containing_chunks(&self, chunk_size: u64) -> (u64, u64) {
        let start = if self.offset % chunk_size == 0 {
            self.offset / chunk_size
        } else {
            bins(self.offset, chunk_size) - 1
        };
        let end = bins(self.offset + self.size, chunk_size) - 1;
        (start, end)
    }

    /// Offset of the file's first byte within its start chunk.
    pub fn first_chunk_offset(&self, chunk_size: u64) -> u64 {
        self.offset % chunk_size
    }

    /// Offset one past the file's last byte within its end chunk; 0 means
    /// the file runs to the end of that chunk.
    pub fn last_chunk_offset_end(&self, chunk_size: u64) -> u64 {
        (self.offset + self.size) % chunk_size
    }
}

/// Selects files out of an archive.
///
/// A pattern containing `*` is a glob over the stored names (`*` crosses
/// directory separators); anything else must equal a stored name. Matching
/// is case-insensitive. Patterns combine by union, keeping the order in
/// which matches are first seen.
#[derive(Debug, Clone, Default)]
pub enum Filter {
    /// Select every file.
    #[default]
    All,
    Patterns(Vec<String>),
}

impl Filter {
    pub fn pattern(pattern: impl Into<String>) -> Self {
        Filter::Patterns(vec![pattern.into()])
    }

    pub fn patterns<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Filter::Patterns(patterns.into_iter().map(Into::into).collect())
    }

    /// Apply the filter to the stored name list, in deterministic order.
    /// Literal patterns are kept even when absent from `names`: the lookup
    /// failure is reported per-file at extraction time.
    pub fn select(&self, names: &[String]) -> Result<Vec<String>> {
        let patterns = match self {
            Filter::All => {
                return Ok(names.iter().filter(|n| !n.is_empty()).cloned().collect());
            }
            Filter::Patterns(patterns) => patterns,
        };
        let mut selected: Vec<String> = Vec::new();
        for raw in patterns {
            let pattern = raw.to_lowercase();
            if pattern.contains('*') {
                let matcher = Pattern::new(&pattern).map_err(|e| {
                    HgpakError::Unsupported(format!("invalid filter pattern {raw:?}: {e}"))
                })?;
                for name in names {
                    if !name.is_empty()
                        && matcher.matches(name)
                        && !selected.iter().any(|s| s == name)
                    {
                        selected.push(name.clone());
                    }
                }
            } else if !selected.contains(&pattern) {
                selected.push(pattern);
            }
        }
        Ok(selected)
    }
}

impl From<&str> for Filter {
    fn from(pattern: &str) -> Self {
        Filter::pattern(pattern)
    }
}

impl From<Vec<String>> for Filter {
    fn from(patterns: Vec<String>) -> Self {
        Filter::Patterns(patterns)
    }
}

/// Options for [`HgpakReader::unpack`].
#[derive(Debug, Clone, Default)]
pub struct UnpackOptions {
    /// Uppercase extracted directory components and file names (the
    /// destination root keeps its casing).
    pub upper: bool,
    /// Per-file extraction cap; `Some(0)` writes empty files.
    pub max_bytes: Option<u64>,
    /// Write a `<pak name>.manifest` sidecar listing the stored paths in
    /// order, for byte-identical repacking.
    pub write_manifest: bool,
}

/// Summary of one packed file, as produced by [`HgpakReader::list`].
#[derive(Debug, Clone)]
pub struct ListEntry {
    pub path: String,
    pub size: u64,
    pub chunks: u64,
}

/// A parsed archive, owning its file handle and chunk cache.
///
/// The handle is held from `open` until the reader is dropped. Readers are
/// single-threaded; two readers over the same archive file are independent.
#[derive(Debug)]
pub struct HgpakReader {
    file: File,
    path: PathBuf,
    compressor: Compressor,
    header: ArchiveHeader,
    file_index: Vec<FileEntry>,
    chunk_sizes: Vec<u64>,
    chunk_offsets: Vec<u64>,
    filenames: Vec<String>,
    files: HashMap<String, PackedFile>,
    cache: LruCache<u64, Vec<u8>>,
}

impl HgpakReader {
    /// Open `path` and parse its TOC. No partial state escapes on failure.
    pub fn open(path: impl AsRef<Path>, platform: Platform) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let file_len = file.seek(SeekFrom::End(0))?;
        let compressor = Compressor::new(platform);

        let header = ArchiveHeader::read(&mut file)?;
        debug!("{}: {:?}", path.display(), header);

        let toc_len = header
            .file_count
            .checked_mul(FILE_ENTRY_SIZE)
            .and_then(|n| n.checked_add(HEADER_SIZE))
            .and_then(|n| {
                if header.is_compressed {
                    n.checked_add(header.chunk_count.checked_mul(CHUNK_ENTRY_SIZE)?)
                } else {
                    Some(n)
                }
            });
        match toc_len {
            Some(len) if header.file_count > 0 && len <= file_len && header.data_offset <= file_len => {}
            _ => {
                return Err(HgpakError::InvalidFormat(
                    "truncated table of contents".into(),
                ))
            }
        }

        let file_index = format::read_file_index(&mut file, header.file_count)?;
        let blob_size = file_index[0].decompressed_size;
        let chunk_size = compressor.chunk_size() as u64;

        let mut chunk_sizes = Vec::new();
        let mut chunk_offsets = Vec::new();
        if header.is_compressed {
            chunk_sizes = format::read_chunk_index(&mut file, header.chunk_count)?;

            // Chunk i sits at data_offset plus the 16-byte aligned
            // footprints of chunks 0..i.
            let mut offset = header.data_offset;
            for &size in &chunk_sizes {
                chunk_offsets.push(offset);
                offset += req_chunk_bytes(size);
            }
            debug!(
                "{}: {} chunks, data region {:#x}..{:#x}",
                path.display(),
                chunk_sizes.len(),
                header.data_offset,
                offset
            );

            // Tightened from the legacy tool, which only logged the
            // disagreement: the chunk count must match the file index.
            if let Some(last) = file_index.iter().max_by_key(|e| e.start_offset) {
                let rebased = last
                    .start_offset
                    .checked_sub(header.data_offset)
                    .ok_or_else(|| {
                        HgpakError::InvalidFormat(
                            "file index offset precedes the data region".into(),
                        )
                    })?;
                let expected = bins(rebased + roundup(last.decompressed_size), chunk_size);
                if expected != header.chunk_count {
                    return Err(HgpakError::InvalidFormat(format!(
                        "chunk count mismatch: header says {}, file index implies {expected}",
                        header.chunk_count
                    )));
                }
            }
        }

        let mut reader = Self {
            file,
            path,
            compressor,
            header,
            file_index,
            chunk_sizes,
            chunk_offsets,
            filenames: Vec::new(),
            files: HashMap::new(),
            cache: LruCache::new(NonZeroUsize::new(CHUNK_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN)),
        };

        let blob = if reader.header.is_compressed {
            reader.read_blob_compressed(blob_size)?
        } else {
            reader.file.seek(SeekFrom::Start(reader.header.data_offset))?;
            let mut blob = vec![0u8; blob_size as usize];
            reader.file.read_exact(&mut blob)?;
            blob
        };
        reader.filenames = manifest::parse_blob(&blob)?;

        if reader.filenames.len() as u64 != reader.header.file_count - 1 {
            return Err(HgpakError::InvalidFormat(format!(
                "filename count mismatch: {} names for {} index entries",
                reader.filenames.len(),
                reader.header.file_count
            )));
        }

        // Build the per-file map; compressed offsets are rebased onto the
        // data region origin.
        for (i, name) in reader.filenames.iter().enumerate() {
            if name.is_empty() {
                continue;
            }
            let finf = &reader.file_index[i + 1];
            let offset = if reader.header.is_compressed {
                finf.start_offset
                    .checked_sub(reader.header.data_offset)
                    .ok_or_else(|| {
                        HgpakError::InvalidFormat(format!(
                            "file {name:?} starts before the data region"
                        ))
                    })?
            } else {
                finf.start_offset
            };
            reader.files.insert(
                name.clone(),
                PackedFile {
                    path: name.clone(),
                    offset,
                    size: finf.decompressed_size,
                    name_hash: finf.name_hash,
                },
            );
        }

        info!(
            "{}: {} files, {} chunks, compressed: {}",
            reader.path.display(),
            reader.filenames.len(),
            reader.header.chunk_count,
            reader.header.is_compressed
        );
        Ok(reader)
    }

    /// Stored file names, in index order.
    pub fn filenames(&self) -> &[String] {
        &self.filenames
    }

    pub fn header(&self) -> &ArchiveHeader {
        &self.header
    }

    /// Compressed size of every chunk, in order. Empty for uncompressed
    /// archives.
    pub fn chunk_sizes(&self) -> &[u64] {
        &self.chunk_sizes
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn packed_file(&self, path: &str) -> Option<&PackedFile> {
        self.files.get(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Per-file summaries in stored order.
    pub fn list(&self) -> Vec<ListEntry> {
        let chunk_size = self.compressor.chunk_size() as u64;
        self.filenames
            .iter()
            .filter_map(|name| self.files.get(name))
            .map(|pf| {
                let chunks = if pf.size == 0 {
                    0
                } else if self.header.is_compressed {
                    let (start, end) = pf.containing_chunks(chunk_size);
                    end - start + 1
                } else {
                    bins(pf.size, chunk_size)
                };
                ListEntry {
                    path: pf.path.clone(),
                    size: pf.size,
                    chunks,
                }
            })
            .collect()
    }

    /// Recover the filename blob by decompressing its leading chunks.
    fn read_blob_compressed(&mut self, blob_size: u64) -> Result<Vec<u8>> {
        let chunk_size = self.compressor.chunk_size() as u64;
        let needed = bins(blob_size, chunk_size);
        let mut blob = Vec::with_capacity(roundup(blob_size) as usize);
        for idx in 0..needed {
            blob.extend_from_slice(self.chunk(idx)?);
        }
        if (blob.len() as u64) < blob_size {
            return Err(HgpakError::InvalidFormat(
                "filename blob shorter than its index entry".into(),
            ));
        }
        blob.truncate(blob_size as usize);
        Ok(blob)
    }

    /// Decompressed bytes of chunk `idx`, memoized in the LRU cache.
    fn chunk(&mut self, idx: u64) -> Result<&[u8]> {
        if idx >= self.header.chunk_count {
            return Err(HgpakError::InvalidFormat(format!(
                "chunk index {idx} out of range"
            )));
        }
        if !self.cache.contains(&idx) {
            let offset = self.chunk_offsets[idx as usize];
            let size = self.chunk_sizes[idx as usize] as usize;
            self.file.seek(SeekFrom::Start(offset))?;
            let mut payload = vec![0u8; size];
            self.file.read_exact(&mut payload)?;
            let data = self.compressor.decompress(&payload)?;
            self.cache.put(idx, data);
        }
        Ok(self.cache.get(&idx).map(Vec::as_slice).unwrap_or(&[]))
    }

    /// Lazily extract the selected files as `(path, bytes)` pairs.
    ///
    /// Files producing no bytes are skipped. A literal filter naming a path
    /// that is not in the archive yields a `NotFound` error for that file
    /// without stopping the remaining extraction. Dropping the iterator
    /// cancels the rest.
    pub fn extract(&mut self, filter: &Filter, max_bytes: Option<u64>) -> Result<Extract<'_>> {
        let selected = filter.select(&self.filenames)?;
        Ok(Extract {
            reader: self,
            selected: selected.into_iter(),
            max_bytes,
        })
    }

    /// Stream one file's bytes into `out`, truncated to `max_bytes` when
    /// given. Returns the number of bytes written.
    pub fn extract_to<W: Write>(
        &mut self,
        path: &str,
        out: &mut W,
        max_bytes: Option<u64>,
    ) -> Result<u64> {
        let pf = self
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| HgpakError::NotFound(path.to_string()))?;
        if matches!(max_bytes, Some(0)) || pf.size == 0 {
            return Ok(0);
        }
        if self.header.is_compressed {
            self.extract_compressed(&pf, out, max_bytes)
        } else {
            self.extract_uncompressed(&pf, out, max_bytes)
        }
    }

    fn extract_compressed<W: Write>(
        &mut self,
        pf: &PackedFile,
        out: &mut W,
        max_bytes: Option<u64>,
    ) -> Result<u64> {
        let chunk_size = self.compressor.chunk_size() as u64;
        let (start, end) = pf.containing_chunks(chunk_size);
        let first_off = pf.first_chunk_offset(chunk_size) as usize;
        let last_off = pf.last_chunk_offset_end(chunk_size) as usize;
        let limit = max_bytes.unwrap_or(u64::MAX).min(pf.size);

        let mut written = 0u64;
        for idx in start..=end {
            let data = self.chunk(idx)?;
            let lo = if idx == start {
                first_off.min(data.len())
            } else {
                0
            };
            // last_off == 0 means the file runs to the end of the chunk.
            let hi = if idx == end && last_off != 0 {
                last_off.min(data.len())
            } else {
                data.len()
            };
            let mut piece = &data[lo..hi];
            let remaining = limit - written;
            if piece.len() as u64 > remaining {
                piece = &piece[..remaining as usize];
            }
            out.write_all(piece)?;
            written += piece.len() as u64;
            if written == limit {
                break;
            }
        }
        if written < limit {
            warn!(
                "{}: extracted {written} of {limit} bytes for {}",
                self.path.display(),
                pf.path
            );
        }
        Ok(written)
    }

    fn extract_uncompressed<W: Write>(
        &mut self,
        pf: &PackedFile,
        out: &mut W,
        max_bytes: Option<u64>,
    ) -> Result<u64> {
        let chunk_size = self.compressor.chunk_size() as u64;
        let limit = max_bytes.unwrap_or(u64::MAX).min(pf.size);
        self.file.seek(SeekFrom::Start(pf.offset))?;

        let mut buf = vec![0u8; chunk_size as usize];
        let mut remaining = limit;
        while remaining > 0 {
            let n = remaining.min(chunk_size) as usize;
            self.file.read_exact(&mut buf[..n])?;
            out.write_all(&buf[..n])?;
            remaining -= n as u64;
        }
        Ok(limit)
    }

    /// Unpack the selected files below `dest`. Returns how many files were
    /// written. Files missing from the archive are reported and skipped.
    pub fn unpack(
        &mut self,
        dest: impl AsRef<Path>,
        filter: &Filter,
        options: &UnpackOptions,
    ) -> Result<usize> {
        let dest = dest.as_ref();
        let selected = filter.select(&self.filenames)?;
        std::fs::create_dir_all(dest)?;
        let mut count = 0;
        for path in &selected {
            if !self.files.contains_key(path) {
                warn!("{}: no such file in archive, skipping", path);
                continue;
            }
            let (dir, name) = match path.rsplit_once('/') {
                Some((dir, name)) => (dir, name),
                None => ("", path.as_str()),
            };
            let mut target = dest.to_path_buf();
            if !dir.is_empty() {
                if options.upper {
                    target.push(dir.to_uppercase());
                } else {
                    target.push(dir);
                }
                std::fs::create_dir_all(&target)?;
            }
            if options.upper {
                target.push(name.to_uppercase());
            } else {
                target.push(name);
            }
            let mut writer = BufWriter::new(File::create(&target)?);
            self.extract_to(path, &mut writer, options.max_bytes)?;
            writer.flush()?;
            count += 1;
        }
        if options.write_manifest {
            self.write_manifest(dest)?;
        }
        info!("Unpacked {count} files from {}", self.path.display());
        Ok(count)
    }

    /// Write this archive's manifest sidecar into `dest` and return its
    /// path.
    pub fn write_manifest(&self, dest: &Path) -> Result<PathBuf> {
        let pak_name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("archive.pak");
        let manifest_path = dest.join(format!("{pak_name}{}", manifest::MANIFEST_SUFFIX));
        let names: Vec<String> = self
            .filenames
            .iter()
            .filter(|n| !n.is_empty())
            .cloned()
            .collect();
        manifest::write_manifest(&manifest_path, &names)?;
        Ok(manifest_path)
    }
}

/// Iterator returned by [`HgpakReader::extract`].
pub struct Extract<'a> {
    reader: &'a mut HgpakReader,
    selected: std::vec::IntoIter<String>,
    max_bytes: Option<u64>,
}

impl Iterator for Extract<'_> {
    type Item = Result<(String, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let path = self.selected.next()?;
            let mut data = Vec::new();
            match self.reader.extract_to(&path, &mut data, self.max_bytes) {
                Ok(0) => continue,
                Ok(_) => return Some(Ok((path, data))),
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHUNK: u64 = 0x20000;

    fn packed(offset: u64, size: u64) -> PackedFile {
        PackedFile {
            path: "test.bin".into(),
            offset,
            size,
            name_hash: [0; 16],
        }
    }

    #[test]
    fn chunk_mapping_within_one_chunk() {
        let pf = packed(0x10, 0x20);
        assert_eq!(pf.containing_chunks(CHUNK), (0, 0));
        assert_eq!(pf.first_chunk_offset(CHUNK), 0x10);
        assert_eq!(pf.last_chunk_offset_end(CHUNK), 0x30);
    }

    #[test]
    fn chunk_mapping_on_boundary() {
        // A file starting exactly on a chunk boundary must start in that
        // chunk, not the one before it.
        let pf = packed(CHUNK, 0x100);
        assert_eq!(pf.containing_chunks(CHUNK), (1, 1));
        assert_eq!(pf.first_chunk_offset(CHUNK), 0);

        let pf = packed(0, 0x100);
        assert_eq!(pf.containing_chunks(CHUNK), (0, 0));
    }

    #[test]
    fn chunk_mapping_ending_on_boundary() {
        // Ending exactly on a boundary: last_chunk_offset_end is 0, meaning
        // "to the end of the chunk".
        let pf = packed(CHUNK - 0x100, 0x100);
        assert_eq!(pf.containing_chunks(CHUNK), (0, 0));
        assert_eq!(pf.last_chunk_offset_end(CHUNK), 0);
    }

    #[test]
    fn chunk_mapping_spanning_chunks() {
        let pf = packed(CHUNK - 0x10, CHUNK + 0x20);
        let (start, end) = pf.containing_chunks(CHUNK);
        assert_eq!((start, end), (0, 2));
        assert!(start <= end);
        assert!(pf.first_chunk_offset(CHUNK) < CHUNK);
        assert_eq!(pf.last_chunk_offset_end(CHUNK), 0x10);
    }

    fn names() -> Vec<String> {
        vec![
            "models/planets/sky/rainbowplane.geometry.mbin".to_string(),
            "models/planets/sky/rainbowplane.scene.mbin".to_string(),
            "models/planets/sky/skycube.texture.dds".to_string(),
            "textures/ui/icon.dds".to_string(),
        ]
    }

    #[test]
    fn filter_all() {
        let selected = Filter::All.select(&names()).unwrap();
        assert_eq!(selected.len(), 4);
        assert_eq!(selected, names());
    }

    #[test]
    fn filter_glob_crosses_separators() {
        let selected = Filter::pattern("*rainbowplane*").select(&names()).unwrap();
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn filter_is_case_insensitive() {
        let selected = Filter::pattern("*RAINBOWPLANE*").select(&names()).unwrap();
        assert_eq!(selected.len(), 2);

        let selected = Filter::pattern("TEXTURES/UI/ICON.DDS").select(&names()).unwrap();
        assert_eq!(selected, vec!["textures/ui/icon.dds"]);
    }

    #[test]
    fn filter_union_preserves_order() {
        let filter = Filter::patterns(["*skycube*", "*rainbowplane*"]);
        let selected = filter.select(&names()).unwrap();
        assert_eq!(selected.len(), 3);
        assert_eq!(selected[0], "models/planets/sky/skycube.texture.dds");

        // Overlapping patterns do not duplicate entries.
        let filter = Filter::patterns(["*rainbowplane*", "*.mbin"]);
        assert_eq!(filter.select(&names()).unwrap().len(), 2);
    }

    #[test]
    fn filter_keeps_missing_literals() {
        let selected = Filter::pattern("no/such/file.mbin").select(&names()).unwrap();
        assert_eq!(selected, vec!["no/such/file.mbin"]);
    }
}
