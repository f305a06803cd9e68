//! # Tessera I/O
//!
//! Pixel storage for the Tessera workspace. This crate provides:
//!
//! - **Bitmap codec** ([`bmp`]) — 24-bit uncompressed bitmap headers and
//!   whole-image read/write.
//! - **Row layout** ([`layout`]) — Offset arithmetic for bottom-up, 4-byte
//!   padded rows, and the row-block codec shared by both I/O patterns.
//! - **Chunked I/O** ([`chunk`]) — Read or write an arbitrary logical row
//!   range directly in a file, for workers that never see the whole image.

pub mod bmp;
pub mod chunk;
pub mod error;
pub mod layout;

pub use bmp::{read_image, write_image, BmpHeader, HEADER_SIZE};
pub use chunk::{create_image_file, read_header, read_rows, write_rows};
pub use error::ImageIoError;
pub use layout::{row_stride, PixelLayout};
