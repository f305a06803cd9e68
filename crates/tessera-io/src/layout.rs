//! Row-layout arithmetic for bottom-up bitmaps.
//!
//! A 24-bit bitmap stores its rows bottom-up: the first row after the header
//! is the visual bottom of the image. Every row is `width * 3` bytes of BGR
//! triples, padded with zeros to a multiple of four.
//!
//! Logical row `R` (0 = visual top) lives at physical row `H - 1 - R`, at
//! byte offset `data_offset + (H - 1 - R) * stride`. A contiguous logical
//! range `[start, start + n)` is therefore one contiguous byte range that
//! begins at the physical row of its *last* logical row and holds the rows in
//! reverse logical order.

use ndarray::ArrayView2;
use tessera_core::Pixel;

use crate::error::ImageIoError;

/// Padded byte length of one stored row.
pub fn row_stride(width: usize) -> usize {
    (width * 3 + 3) & !3
}

/// Where the rows of one bitmap live in its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelLayout {
    pub width: usize,
    pub height: usize,
    pub stride: usize,
    pub data_offset: u64,
}

impl PixelLayout {
    pub fn new(width: usize, height: usize, data_offset: u64) -> Self {
        Self {
            width,
            height,
            stride: row_stride(width),
            data_offset,
        }
    }

    /// Physical (file-order) index of logical row `row`.
    pub fn physical_row(&self, row: usize) -> usize {
        self.height - 1 - row
    }

    /// Byte offset of logical row `row`.
    pub fn row_offset(&self, row: usize) -> u64 {
        self.data_offset + (self.physical_row(row) * self.stride) as u64
    }

    /// Bytes of pixel data, padding included.
    pub fn pixel_bytes(&self) -> u64 {
        (self.height * self.stride) as u64
    }

    /// Total file length.
    pub fn file_len(&self) -> u64 {
        self.data_offset + self.pixel_bytes()
    }

    /// Reject ranges that are empty or reach past the last row.
    pub fn check_range(&self, start: usize, count: usize) -> Result<(), ImageIoError> {
        if count == 0 || start + count > self.height {
            return Err(ImageIoError::RowRange {
                start,
                end: start + count,
                height: self.height,
            });
        }
        Ok(())
    }

    /// Byte span `(offset, len)` covering logical rows `[start, start + count)`.
    pub fn range_span(&self, start: usize, count: usize) -> Result<(u64, usize), ImageIoError> {
        self.check_range(start, count)?;
        Ok((self.row_offset(start + count - 1), count * self.stride))
    }

    /// Encode a block of logical rows into file order.
    pub fn encode_rows(&self, rows: ArrayView2<'_, Pixel>) -> Result<Vec<u8>, ImageIoError> {
        let (count, width) = rows.dim();
        if width != self.width {
            return Err(ImageIoError::WidthMismatch {
                expected: self.width,
                actual: width,
            });
        }
        let mut bytes = vec![0u8; count * self.stride];
        for (i, dst) in bytes.chunks_exact_mut(self.stride).enumerate() {
            let row = rows.row(count - 1 - i);
            for (px, bgr) in row.iter().zip(dst.chunks_exact_mut(3)) {
                bgr[0] = px.b;
                bgr[1] = px.g;
                bgr[2] = px.r;
            }
        }
        Ok(bytes)
    }

    /// Decode `bytes` holding `count` rows in file order into logical
    /// row-major pixels.
    pub fn decode_rows(&self, bytes: &[u8], count: usize) -> Result<Vec<Pixel>, ImageIoError> {
        let needed = count * self.stride;
        if bytes.len() < needed {
            return Err(ImageIoError::Truncated {
                expected: needed as u64,
                actual: bytes.len() as u64,
            });
        }
        let mut pixels = vec![Pixel::default(); count * self.width];
        if self.width == 0 {
            return Ok(pixels);
        }
        for (i, src) in bytes[..needed].chunks_exact(self.stride).enumerate() {
            let logical = count - 1 - i;
            let dst = &mut pixels[logical * self.width..(logical + 1) * self.width];
            for (px, bgr) in dst.iter_mut().zip(src.chunks_exact(3)) {
                *px = Pixel::new(bgr[2], bgr[1], bgr[0]);
            }
        }
        Ok(pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_stride_padding() {
        assert_eq!(row_stride(1), 4);
        assert_eq!(row_stride(4), 12);
        assert_eq!(row_stride(5), 16);
        assert_eq!(row_stride(6), 20);
        assert_eq!(row_stride(7), 24);
    }

    #[test]
    fn test_offsets_are_bottom_up() {
        let layout = PixelLayout::new(5, 4, 54);
        assert_eq!(layout.stride, 16);
        assert_eq!(layout.physical_row(0), 3);
        assert_eq!(layout.row_offset(3), 54);
        assert_eq!(layout.row_offset(0), 54 + 3 * 16);
        assert_eq!(layout.file_len(), 54 + 64);
    }

    #[test]
    fn test_range_starts_at_last_logical_row() {
        let layout = PixelLayout::new(5, 10, 54);
        assert_eq!(layout.range_span(2, 3).unwrap(), (54 + 5 * 16, 48));
        assert_eq!(layout.range_span(0, 10).unwrap(), (54, 160));
        assert!(matches!(
            layout.range_span(8, 3),
            Err(ImageIoError::RowRange { start: 8, end: 11, height: 10 })
        ));
        assert!(layout.range_span(4, 0).is_err());
    }

    #[test]
    fn test_rows_reverse_and_swap_channels() {
        let layout = PixelLayout::new(2, 2, 54);
        let rows = array![
            [Pixel::new(1, 2, 3), Pixel::new(4, 5, 6)],
            [Pixel::new(7, 8, 9), Pixel::new(10, 11, 12)]
        ];
        let bytes = layout.encode_rows(rows.view()).unwrap();
        // Bottom row first, BGR, two padding bytes per row.
        assert_eq!(bytes, vec![9, 8, 7, 12, 11, 10, 0, 0, 3, 2, 1, 6, 5, 4, 0, 0]);
        let back = layout.decode_rows(&bytes, 2).unwrap();
        assert_eq!(back, rows.iter().copied().collect::<Vec<_>>());
    }

    #[test]
    fn test_width_and_length_checks() {
        let layout = PixelLayout::new(3, 2, 54);
        let narrow = array![[Pixel::grey(1), Pixel::grey(2)]];
        assert!(matches!(
            layout.encode_rows(narrow.view()),
            Err(ImageIoError::WidthMismatch { expected: 3, actual: 2 })
        ));
        assert!(matches!(
            layout.decode_rows(&[0; 20], 2),
            Err(ImageIoError::Truncated { expected: 24, actual: 20 })
        ));
    }
}
