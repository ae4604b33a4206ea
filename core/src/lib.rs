pub mod codec;
pub mod error;
pub mod format;
pub mod manifest;
mod oodle;
pub mod reader;
pub mod utils;
pub mod writer;

pub use codec::{Codec, Compressor, Platform};
pub use error::{HgpakError, Result};
pub use reader::{Extract, Filter, HgpakReader, ListEntry, PackedFile, UnpackOptions};
pub use writer::{pack_archive, pack_to_file, repack_manifest, PackRequest};
