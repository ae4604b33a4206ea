use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HgpakError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid HGPAK archive: {0}")]
    InvalidFormat(String),

    #[error("File not found in archive: {0}")]
    NotFound(String),

    #[error("Chunk decompression failed: {0}")]
    Codec(String),

    #[error("Chunk payload looks like Oodle data; reopen the archive with the switch platform")]
    CodecMismatch,

    #[error("Oodle library unavailable: {0}")]
    Library(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl From<binrw::Error> for HgpakError {
    fn from(err: binrw::Error) -> Self {
        match err {
            binrw::Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                HgpakError::InvalidFormat("unexpected end of file while reading the TOC".into())
            }
            binrw::Error::Io(e) => HgpakError::Io(e),
            other => HgpakError::InvalidFormat(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, HgpakError>;
