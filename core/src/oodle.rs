//! Loader for the Oodle LZ native library used by Switch archives.
//!
//! The library is external and only needed for the switch platform, so it
//! is loaded lazily on first use and shared process-wide. A missing or
//! unloadable library is a `Library` error, distinct from codec failures.

use std::env;
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::OnceLock;

use libloading::Library;
use log::info;

use crate::error::{HgpakError, Result};

/// OodleLZ compressor selector used by HGPAK archives.
const OODLE_COMPRESSOR: i32 = 9;
/// OodleLZ compression level used by HGPAK archives.
const OODLE_LEVEL: i32 = 6;

#[cfg(target_os = "windows")]
const LIB_NAME: &str = "oo2core_9_win64.dll";
#[cfg(target_os = "macos")]
const LIB_NAME: &str = "liboo2coremac64.2.9.dylib";
#[cfg(all(unix, not(target_os = "macos")))]
const LIB_NAME: &str = "liboo2corelinux64.so.9";

type CompressFn = unsafe extern "C" fn(
    compressor: i32,
    raw_buf: *const u8,
    raw_len: isize,
    comp_buf: *mut u8,
    level: i32,
    options: *const c_void,
    dictionary_base: *const c_void,
    lrm: *const c_void,
    scratch_mem: *mut c_void,
    scratch_size: isize,
) -> isize;

type DecompressFn = unsafe extern "C" fn(
    comp_buf: *const u8,
    comp_buf_size: isize,
    raw_buf: *mut u8,
    raw_len: isize,
    fuzz_safe: i32,
    check_crc: i32,
    verbosity: i32,
    dec_buf_base: *mut c_void,
    dec_buf_size: isize,
    callback: *const c_void,
    callback_user_data: *mut c_void,
    decoder_memory: *mut c_void,
    decoder_memory_size: isize,
    thread_phase: i32,
) -> isize;

static OODLE: OnceLock<std::result::Result<OodleLibrary, String>> = OnceLock::new();

pub struct OodleLibrary {
    // Keeps the shared object mapped for the lifetime of the process; the
    // extracted function pointers below stay valid as long as it lives.
    _lib: Library,
    compress_fn: CompressFn,
    decompress_fn: DecompressFn,
}

impl OodleLibrary {
    /// The shared process-wide instance, loaded on first use.
    pub fn get() -> Result<&'static OodleLibrary> {
        let loaded = OODLE.get_or_init(|| Self::load().map_err(|e| e.to_string()));
        loaded
            .as_ref()
            .map_err(|msg| HgpakError::Library(msg.clone()))
    }

    /// `lib/<LIB_NAME>` next to the executable, overridable with the
    /// `HGPAK_OODLE` environment variable.
    fn library_path() -> PathBuf {
        if let Ok(path) = env::var("HGPAK_OODLE") {
            return PathBuf::from(path);
        }
        let exe_dir = env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        exe_dir.join("lib").join(LIB_NAME)
    }

    fn load() -> Result<Self> {
        let path = Self::library_path();
        if !path.exists() {
            return Err(HgpakError::Library(format!(
                "Oodle library not found at {}",
                path.display()
            )));
        }
        let lib = unsafe { Library::new(&path) }.map_err(|e| {
            HgpakError::Library(format!("failed to load {}: {e}", path.display()))
        })?;
        let compress_fn = unsafe {
            *lib.get::<CompressFn>(b"OodleLZ_Compress\0")
                .map_err(|e| HgpakError::Library(e.to_string()))?
        };
        let decompress_fn = unsafe {
            *lib.get::<DecompressFn>(b"OodleLZ_Decompress\0")
                .map_err(|e| HgpakError::Library(e.to_string()))?
        };
        info!("Loaded Oodle library from {}", path.display());
        Ok(Self {
            _lib: lib,
            compress_fn,
            decompress_fn,
        })
    }

    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        // Headroom for incompressible input; the writer stores such blocks
        // verbatim anyway once the result reaches the chunk size.
        let mut out = vec![0u8; data.len() + 0x1000];
        let written = unsafe {
            (self.compress_fn)(
                OODLE_COMPRESSOR,
                data.as_ptr(),
                data.len() as isize,
                out.as_mut_ptr(),
                OODLE_LEVEL,
                ptr::null(),
                ptr::null(),
                ptr::null(),
                ptr::null_mut(),
                0,
            )
        };
        if written <= 0 {
            return Err(HgpakError::Codec(format!(
                "OodleLZ_Compress failed on {} bytes (ret = {written})",
                data.len()
            )));
        }
        out.truncate(written as usize);
        Ok(out)
    }

    pub fn decompress(&self, data: &[u8], expected_size: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; expected_size];
        let written = unsafe {
            (self.decompress_fn)(
                data.as_ptr(),
                data.len() as isize,
                out.as_mut_ptr(),
                expected_size as isize,
                0,
                0,
                0,
                ptr::null_mut(),
                0,
                ptr::null(),
                ptr::null_mut(),
                ptr::null_mut(),
                0,
                3,
            )
        };
        if written <= 0 {
            return Err(HgpakError::Codec(format!(
                "OodleLZ_Decompress failed (ret = {written}, expected {expected_size:#x})"
            )));
        }
        out.truncate(written as usize);
        Ok(out)
    }
}
