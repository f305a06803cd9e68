//! 24-bit uncompressed bitmap header and whole-image codec.
//!
//! Only the fields needed to locate the pixels are interpreted: the `BM`
//! signature, the pixel-data offset (byte 10), width (byte 18), height
//! (byte 22) and bits per pixel (byte 28). All integers are little-endian.
//! Heights must be positive; top-down bitmaps are rejected.

use std::fs;
use std::path::Path;

use log::debug;
use ndarray::Array2;
use tessera_core::{CoreError, Image};

use crate::error::ImageIoError;
use crate::layout::PixelLayout;

/// Size of the file header plus the 40-byte info header.
pub const HEADER_SIZE: usize = 54;

const INFO_HEADER_SIZE: u32 = 40;
const BITS_PER_PIXEL: u16 = 24;

/// The decoded fields of a bitmap header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BmpHeader {
    pub width: usize,
    pub height: usize,
    /// Byte offset of the first stored pixel row.
    pub data_offset: u64,
}

fn le_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn le_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn le_i32(bytes: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

impl BmpHeader {
    /// A header for a freshly written image with pixels right after the
    /// 54 header bytes.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data_offset: HEADER_SIZE as u64,
        }
    }

    pub fn layout(&self) -> PixelLayout {
        PixelLayout::new(self.width, self.height, self.data_offset)
    }

    /// Parse the first [`HEADER_SIZE`] bytes of a file.
    pub fn parse(bytes: &[u8]) -> Result<Self, ImageIoError> {
        if bytes.len() < HEADER_SIZE {
            return Err(ImageIoError::MalformedHeader(format!(
                "header is {} bytes, expected at least {HEADER_SIZE}",
                bytes.len()
            )));
        }
        if &bytes[0..2] != b"BM" {
            return Err(ImageIoError::NotBitmap {
                found: [bytes[0], bytes[1]],
            });
        }

        let bits_per_pixel = le_u16(bytes, 28);
        if bits_per_pixel != BITS_PER_PIXEL {
            return Err(ImageIoError::UnsupportedEncoding { bits_per_pixel });
        }
        let compression = le_u32(bytes, 30);
        if compression != 0 {
            return Err(ImageIoError::UnsupportedCompression { compression });
        }

        let width = le_i32(bytes, 18);
        let height = le_i32(bytes, 22);
        if width <= 0 || height <= 0 {
            return Err(ImageIoError::MalformedHeader(format!(
                "dimensions must be positive, got {width}x{height}"
            )));
        }

        let data_offset = u64::from(le_u32(bytes, 10));
        if data_offset < HEADER_SIZE as u64 {
            return Err(ImageIoError::MalformedHeader(format!(
                "pixel data offset {data_offset} overlaps the header"
            )));
        }

        Ok(Self {
            width: width as usize,
            height: height as usize,
            data_offset,
        })
    }

    /// Encode as a 54-byte header. The written data offset is always 54.
    pub fn encode(&self) -> Result<[u8; HEADER_SIZE], ImageIoError> {
        let layout = PixelLayout::new(self.width, self.height, HEADER_SIZE as u64);
        let too_large = || {
            ImageIoError::MalformedHeader(format!(
                "{}x{} does not fit a bitmap header",
                self.width, self.height
            ))
        };
        let width = i32::try_from(self.width).map_err(|_| too_large())?;
        let height = i32::try_from(self.height).map_err(|_| too_large())?;
        let file_size = u32::try_from(layout.file_len()).map_err(|_| too_large())?;
        if width == 0 || height == 0 {
            return Err(ImageIoError::MalformedHeader(format!(
                "dimensions must be positive, got {width}x{height}"
            )));
        }

        let mut header = [0u8; HEADER_SIZE];
        header[0..2].copy_from_slice(b"BM");
        header[2..6].copy_from_slice(&file_size.to_le_bytes());
        header[10..14].copy_from_slice(&(HEADER_SIZE as u32).to_le_bytes());
        header[14..18].copy_from_slice(&INFO_HEADER_SIZE.to_le_bytes());
        header[18..22].copy_from_slice(&width.to_le_bytes());
        header[22..26].copy_from_slice(&height.to_le_bytes());
        header[26..28].copy_from_slice(&1u16.to_le_bytes());
        header[28..30].copy_from_slice(&BITS_PER_PIXEL.to_le_bytes());
        Ok(header)
    }
}

/// Decode a complete bitmap held in memory.
pub fn decode_image(bytes: &[u8]) -> Result<Image, ImageIoError> {
    let header = BmpHeader::parse(bytes)?;
    let layout = header.layout();
    let start = header.data_offset as usize;
    if (bytes.len() as u64) < layout.file_len() {
        return Err(ImageIoError::Truncated {
            expected: layout.pixel_bytes(),
            actual: bytes.len().saturating_sub(start) as u64,
        });
    }
    let pixels = layout.decode_rows(&bytes[start..], header.height)?;
    let cells = pixels.len();
    Array2::from_shape_vec((header.height, header.width), pixels).map_err(|_| {
        CoreError::ShapeMismatch {
            expected: header.height * header.width,
            actual: cells,
        }
        .into()
    })
}

/// Encode an image as a complete bitmap.
pub fn encode_image(image: &Image) -> Result<Vec<u8>, ImageIoError> {
    let (height, width) = image.dim();
    let header = BmpHeader::new(width, height);
    let mut bytes = Vec::with_capacity(header.layout().file_len() as usize);
    bytes.extend_from_slice(&header.encode()?);
    bytes.extend(header.layout().encode_rows(image.view())?);
    Ok(bytes)
}

/// Read a whole bitmap from disk.
pub fn read_image(path: impl AsRef<Path>) -> Result<Image, ImageIoError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| ImageIoError::read(path, e))?;
    let image = decode_image(&bytes)?;
    debug!(
        "Read {}x{} bitmap from {}",
        image.ncols(),
        image.nrows(),
        path.display()
    );
    Ok(image)
}

/// Write a whole bitmap to disk, replacing any existing file.
pub fn write_image(path: impl AsRef<Path>, image: &Image) -> Result<(), ImageIoError> {
    let path = path.as_ref();
    let bytes = encode_image(image)?;
    fs::write(path, bytes).map_err(|e| ImageIoError::write(path, e))?;
    debug!(
        "Wrote {}x{} bitmap to {}",
        image.ncols(),
        image.nrows(),
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::Pixel;

    fn sample() -> Image {
        Array2::from_shape_fn((3, 5), |(y, x)| Pixel::new(y as u8 * 40, x as u8 * 30, 200))
    }

    #[test]
    fn test_header_fields() {
        let header = BmpHeader::new(5, 3).encode().unwrap();
        assert_eq!(&header[0..2], b"BM");
        assert_eq!(le_u32(&header, 2), 54 + 3 * 16);
        assert_eq!(le_u32(&header, 10), 54);
        assert_eq!(le_i32(&header, 18), 5);
        assert_eq!(le_i32(&header, 22), 3);
        assert_eq!(le_u16(&header, 28), 24);
        assert_eq!(BmpHeader::parse(&header).unwrap(), BmpHeader::new(5, 3));
    }

    #[test]
    fn test_in_memory_codec() {
        let image = sample();
        let bytes = encode_image(&image).unwrap();
        assert_eq!(bytes.len(), 54 + 3 * 16);
        // First stored pixel is the bottom-left one, in BGR order.
        assert_eq!(&bytes[54..57], &[200, 0, 80]);
        assert_eq!(decode_image(&bytes).unwrap(), image);
    }

    #[test]
    fn test_rejects_bad_headers() {
        let good = BmpHeader::new(4, 4).encode().unwrap();

        let mut bad = good;
        bad[0] = b'P';
        assert!(matches!(BmpHeader::parse(&bad), Err(ImageIoError::NotBitmap { .. })));

        let mut bad = good;
        bad[28] = 32;
        assert!(matches!(
            BmpHeader::parse(&bad),
            Err(ImageIoError::UnsupportedEncoding { bits_per_pixel: 32 })
        ));

        // BI_RLE8
        let mut bad = good;
        bad[30..34].copy_from_slice(&1u32.to_le_bytes());
        assert!(matches!(
            BmpHeader::parse(&bad),
            Err(ImageIoError::UnsupportedCompression { compression: 1 })
        ));

        let mut bad = good;
        bad[22..26].copy_from_slice(&(-4i32).to_le_bytes());
        assert!(matches!(BmpHeader::parse(&bad), Err(ImageIoError::MalformedHeader(_))));

        assert!(matches!(BmpHeader::parse(&good[..40]), Err(ImageIoError::MalformedHeader(_))));
    }

    #[test]
    fn test_truncated_pixels() {
        let bytes = encode_image(&sample()).unwrap();
        assert!(matches!(
            decode_image(&bytes[..bytes.len() - 1]),
            Err(ImageIoError::Truncated { .. })
        ));
    }
}
