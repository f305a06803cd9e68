//! Storage errors.

use std::path::PathBuf;

use thiserror::Error;

use tessera_core::CoreError;

/// Errors while reading or writing bitmap storage.
#[derive(Debug, Error)]
pub enum ImageIoError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Not a bitmap: signature {found:?}, expected \"BM\"")]
    NotBitmap { found: [u8; 2] },

    #[error("Unsupported encoding: {bits_per_pixel} bits per pixel (only 24-bit is supported)")]
    UnsupportedEncoding { bits_per_pixel: u16 },

    #[error("Unsupported compression method {compression} (only uncompressed bitmaps are read)")]
    UnsupportedCompression { compression: u32 },

    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    #[error("Truncated pixel data: expected {expected} bytes, found {actual}")]
    Truncated { expected: u64, actual: u64 },

    #[error("Rows {start}..{end} are outside an image of height {height}")]
    RowRange {
        start: usize,
        end: usize,
        height: usize,
    },

    #[error("Row block has width {actual}, image width is {expected}")]
    WidthMismatch { expected: usize, actual: usize },

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ImageIoError {
    pub(crate) fn open(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Open {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }
}
