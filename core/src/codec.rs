//! Platform selection and the chunked compression adapter.

use std::fmt;
use std::str::FromStr;

use crate::error::{HgpakError, Result};
use crate::oodle::OodleLibrary;

/// The platform an archive targets. Decides the codec and the decompressed
/// chunk size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Linux,
    Mac,
    Switch,
}

impl Platform {
    pub fn codec(self) -> Codec {
        match self {
            Platform::Windows | Platform::Linux => Codec::Zstd,
            Platform::Mac => Codec::Lz4,
            Platform::Switch => Codec::Oodle,
        }
    }

    /// The platform matching the host OS.
    pub fn native() -> Self {
        if cfg!(target_os = "macos") {
            Platform::Mac
        } else if cfg!(target_os = "linux") {
            Platform::Linux
        } else {
            Platform::Windows
        }
    }
}

impl FromStr for Platform {
    type Err = HgpakError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "windows" | "win" => Ok(Platform::Windows),
            "linux" => Ok(Platform::Linux),
            "mac" | "macos" | "darwin" => Ok(Platform::Mac),
            "switch" => Ok(Platform::Switch),
            _ => Err(HgpakError::Unsupported(format!("unknown platform: {s}"))),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Platform::Windows => "windows",
            Platform::Linux => "linux",
            Platform::Mac => "mac",
            Platform::Switch => "switch",
        };
        f.write_str(name)
    }
}

/// The compression codec used for an archive's data region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Zstd,
    Lz4,
    Oodle,
}

/// Uniform compress/decompress interface over the supported codecs.
///
/// The decompressed chunk size is part of the adapter instance, never
/// process-wide state: 64 KiB for Zstd, 128 KiB for LZ4 and Oodle.
#[derive(Debug, Clone)]
pub struct Compressor {
    codec: Codec,
    chunk_size: usize,
}

impl Compressor {
    pub fn new(platform: Platform) -> Self {
        let codec = platform.codec();
        let chunk_size = match codec {
            Codec::Zstd => 0x10000,
            Codec::Lz4 | Codec::Oodle => 0x20000,
        };
        Self { codec, chunk_size }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Size every chunk decompresses to. The final chunk of an archive may
    /// decompress to less.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Whether the compression path is implemented for this codec.
    /// Zstd archives can only be read.
    pub fn supports_compression(&self) -> bool {
        !matches!(self.codec, Codec::Zstd)
    }

    /// Compress one chunk-sized block. The caller is responsible for the
    /// passthrough rule when the result is not smaller than the chunk size.
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self.codec {
            Codec::Zstd => Err(HgpakError::Unsupported(
                "zstd recompression is not implemented; zstd archives can only be read".into(),
            )),
            Codec::Lz4 => Ok(lz4_flex::block::compress(data)),
            Codec::Oodle => OodleLibrary::get()?.compress(data),
        }
    }

    /// Decompress one chunk payload.
    ///
    /// A payload of exactly `chunk_size` bytes that fails to decode is an
    /// uncompressed passthrough block and is returned verbatim. A failing
    /// payload starting with `8C 0A` under a non-Oodle codec is a Switch
    /// archive being read with the wrong platform.
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let decoded = match self.codec {
            Codec::Zstd => zstd::bulk::decompress(data, self.chunk_size)
                .map_err(|e| HgpakError::Codec(e.to_string())),
            Codec::Lz4 => lz4_flex::block::decompress(data, self.chunk_size)
                .map_err(|e| HgpakError::Codec(e.to_string())),
            Codec::Oodle => OodleLibrary::get()?.decompress(data, self.chunk_size),
        };
        match decoded {
            Ok(out) => Ok(out),
            Err(err) => {
                if data.len() == self.chunk_size {
                    // The block was stored without compression.
                    Ok(data.to_vec())
                } else if self.codec != Codec::Oodle && data.starts_with(&[0x8C, 0x0A]) {
                    Err(HgpakError::CodecMismatch)
                } else {
                    Err(err)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_codec_mapping() {
        assert_eq!(Platform::Windows.codec(), Codec::Zstd);
        assert_eq!(Platform::Linux.codec(), Codec::Zstd);
        assert_eq!(Platform::Mac.codec(), Codec::Lz4);
        assert_eq!(Platform::Switch.codec(), Codec::Oodle);
    }

    #[test]
    fn chunk_sizes() {
        assert_eq!(Compressor::new(Platform::Windows).chunk_size(), 0x10000);
        assert_eq!(Compressor::new(Platform::Linux).chunk_size(), 0x10000);
        assert_eq!(Compressor::new(Platform::Mac).chunk_size(), 0x20000);
        assert_eq!(Compressor::new(Platform::Switch).chunk_size(), 0x20000);
    }

    #[test]
    fn platform_from_str() {
        assert_eq!("MAC".parse::<Platform>().unwrap(), Platform::Mac);
        assert_eq!("windows".parse::<Platform>().unwrap(), Platform::Windows);
        assert!("psp".parse::<Platform>().is_err());
    }

    #[test]
    fn lz4_roundtrip() {
        let comp = Compressor::new(Platform::Mac);
        let mut block = vec![0u8; comp.chunk_size()];
        for (i, b) in block.iter_mut().enumerate() {
            *b = (i % 0x40) as u8;
        }
        let compressed = comp.compress(&block).unwrap();
        assert!(compressed.len() < comp.chunk_size());
        assert_eq!(comp.decompress(&compressed).unwrap(), block);
    }

    #[test]
    fn lz4_passthrough() {
        let comp = Compressor::new(Platform::Mac);
        // A chunk-sized payload that is not valid LZ4 comes back verbatim.
        let block = vec![0xFFu8; comp.chunk_size()];
        assert_eq!(comp.decompress(&block).unwrap(), block);
    }

    #[test]
    fn zstd_compression_unsupported() {
        let comp = Compressor::new(Platform::Windows);
        let err = comp.compress(&[0u8; 0x10]).unwrap_err();
        assert!(matches!(err, HgpakError::Unsupported(_)));
    }

    #[test]
    fn switch_payload_diagnostic() {
        let comp = Compressor::new(Platform::Mac);
        // Short payload with the Oodle signature: not a passthrough candidate.
        let err = comp.decompress(&[0x8C, 0x0A, 0x00, 0x01]).unwrap_err();
        assert!(matches!(err, HgpakError::CodecMismatch));
    }
}
