//! Line-oriented path lists. The `.manifest` sidecar written during unpack
//! and the filename blob stored as the archive's first logical file share
//! the same format: one path per line, terminated by CRLF.

use std::fs;
use std::path::Path;

use crate::error::Result;

/// Suffix of the manifest sidecar written next to extracted files.
pub const MANIFEST_SUFFIX: &str = ".manifest";

/// Normalize a path for storage: forward slashes, lowercase.
pub fn normalise_path(path: &str) -> String {
    path.replace('\\', "/").to_lowercase()
}

/// Assemble the filename blob: every path terminated by CRLF.
pub fn assemble_blob(paths: &[String]) -> Vec<u8> {
    let mut blob = Vec::new();
    for path in paths {
        blob.extend_from_slice(path.as_bytes());
        blob.extend_from_slice(b"\r\n");
    }
    blob
}

/// Split a filename blob back into its entries.
///
/// Trailing CR/LF bytes are stripped before splitting, so the terminator of
/// the final path does not produce a phantom entry. Interior empty entries
/// are kept: they still occupy a file index slot.
pub fn parse_blob(data: &[u8]) -> Result<Vec<String>> {
    let mut end = data.len();
    while end > 0 && (data[end - 1] == b'\r' || data[end - 1] == b'\n') {
        end -= 1;
    }
    if end == 0 {
        return Ok(Vec::new());
    }
    let text = String::from_utf8(data[..end].to_vec())?;
    Ok(text.split("\r\n").map(str::to_owned).collect())
}

/// Read a manifest file: blank lines are skipped and every entry is
/// normalized, so hand-edited manifests with native separators still work.
pub fn parse_manifest(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)?;
    Ok(text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(normalise_path)
        .collect())
}

/// Write a manifest listing `paths` in order.
pub fn write_manifest(path: &Path, paths: &[String]) -> Result<()> {
    fs::write(path, assemble_blob(paths))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalises_separators_and_case() {
        assert_eq!(normalise_path("test\\Path.MBIN"), "test/path.mbin");
        assert_eq!(normalise_path("models/planets/sky.mbin"), "models/planets/sky.mbin");
    }

    #[test]
    fn blob_roundtrip() {
        let paths = vec![
            "models/planets/sky/skysphere.geometry.mbin.macos".to_string(),
            "textures/ui/icon.dds".to_string(),
        ];
        let blob = assemble_blob(&paths);
        assert!(blob.ends_with(b"\r\n"));
        assert_eq!(parse_blob(&blob).unwrap(), paths);
    }

    #[test]
    fn empty_blob() {
        assert!(parse_blob(b"").unwrap().is_empty());
        assert!(parse_blob(b"\r\n").unwrap().is_empty());
    }

    #[test]
    fn parse_manifest_accepts_either_separator() {
        let dir = tempfile::tempdir().unwrap();
        let fpath = dir.path().join("test.manifest");

        fs::write(&fpath, "test/path.mbin\r\n").unwrap();
        assert_eq!(parse_manifest(&fpath).unwrap(), vec!["test/path.mbin"]);

        fs::write(&fpath, "test/path.mbin\r\ntest/path2.mbin\r\n").unwrap();
        assert_eq!(
            parse_manifest(&fpath).unwrap(),
            vec!["test/path.mbin", "test/path2.mbin"]
        );

        fs::write(&fpath, "test\\path.mbin\r\ntest\\path2.mbin\r\n").unwrap();
        assert_eq!(
            parse_manifest(&fpath).unwrap(),
            vec!["test/path.mbin", "test/path2.mbin"]
        );

        fs::write(&fpath, "test/path.mbin\r\n\r\ntest\\path2.mbin\r\n").unwrap();
        assert_eq!(
            parse_manifest(&fpath).unwrap(),
            vec!["test/path.mbin", "test/path2.mbin"]
        );
    }
}
