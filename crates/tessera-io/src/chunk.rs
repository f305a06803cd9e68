//! Direct chunked row I/O.
//!
//! Each worker opens the file independently and touches only the byte range
//! of its own rows, so no rank ever holds the whole image. Writers never
//! overlap because partitions are disjoint; the file must already have its
//! header and final length, see [`create_image_file`].

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::debug;
use ndarray::{Array2, ArrayView2};
use tessera_core::{CoreError, Image, Pixel};

use crate::bmp::{BmpHeader, HEADER_SIZE};
use crate::error::ImageIoError;

fn open_read(path: &Path) -> Result<File, ImageIoError> {
    File::open(path).map_err(|e| ImageIoError::open(path, e))
}

fn read_header_from(file: &mut File, path: &Path) -> Result<BmpHeader, ImageIoError> {
    let mut bytes = [0u8; HEADER_SIZE];
    file.read_exact(&mut bytes)
        .map_err(|e| ImageIoError::read(path, e))?;
    BmpHeader::parse(&bytes)
}

/// Read and validate only the header of a bitmap file.
pub fn read_header(path: impl AsRef<Path>) -> Result<BmpHeader, ImageIoError> {
    let path = path.as_ref();
    let mut file = open_read(path)?;
    read_header_from(&mut file, path)
}

/// Read logical rows `[start, start + count)` of a bitmap file.
///
/// Returns the file header and a `(count, width)` block with row 0 being
/// logical row `start`.
pub fn read_rows(
    path: impl AsRef<Path>,
    start: usize,
    count: usize,
) -> Result<(BmpHeader, Image), ImageIoError> {
    let path = path.as_ref();
    let mut file = open_read(path)?;
    let header = read_header_from(&mut file, path)?;
    let layout = header.layout();
    let (offset, len) = layout.range_span(start, count)?;

    let file_len = file
        .metadata()
        .map_err(|e| ImageIoError::read(path, e))?
        .len();
    if file_len < layout.file_len() {
        return Err(ImageIoError::Truncated {
            expected: layout.pixel_bytes(),
            actual: file_len.saturating_sub(layout.data_offset),
        });
    }

    let mut bytes = vec![0u8; len];
    file.seek(SeekFrom::Start(offset))
        .and_then(|_| file.read_exact(&mut bytes))
        .map_err(|e| ImageIoError::read(path, e))?;

    let pixels = layout.decode_rows(&bytes, count)?;
    let block = Array2::from_shape_vec((count, header.width), pixels).map_err(|_| {
        ImageIoError::from(CoreError::ShapeMismatch {
            expected: count * header.width,
            actual: len / 3,
        })
    })?;
    debug!(
        "Read rows {start}..{} ({len} bytes at offset {offset}) from {}",
        start + count,
        path.display()
    );
    Ok((header, block))
}

/// Create (or truncate) a bitmap file with a header and zeroed pixel data
/// of the final size.
pub fn create_image_file(
    path: impl AsRef<Path>,
    width: usize,
    height: usize,
) -> Result<BmpHeader, ImageIoError> {
    let path = path.as_ref();
    let header = BmpHeader::new(width, height);
    let bytes = header.encode()?;

    let mut file = File::create(path).map_err(|e| ImageIoError::open(path, e))?;
    file.write_all(&bytes)
        .and_then(|_| file.set_len(header.layout().file_len()))
        .and_then(|_| file.flush())
        .map_err(|e| ImageIoError::write(path, e))?;
    debug!(
        "Created {width}x{height} bitmap {} ({} bytes)",
        path.display(),
        header.layout().file_len()
    );
    Ok(header)
}

/// Write a block of logical rows starting at `start` into an existing file
/// whose header matches `header`.
pub fn write_rows(
    path: impl AsRef<Path>,
    header: &BmpHeader,
    start: usize,
    rows: ArrayView2<'_, Pixel>,
) -> Result<(), ImageIoError> {
    let path = path.as_ref();
    let layout = header.layout();
    let count = rows.nrows();
    let (offset, len) = layout.range_span(start, count)?;
    let bytes = layout.encode_rows(rows)?;

    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| ImageIoError::open(path, e))?;
    file.seek(SeekFrom::Start(offset))
        .and_then(|_| file.write_all(&bytes))
        .and_then(|_| file.flush())
        .map_err(|e| ImageIoError::write(path, e))?;
    debug!(
        "Wrote rows {start}..{} ({len} bytes at offset {offset}) to {}",
        start + count,
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bmp::{read_image, write_image};
    use ndarray::s;

    fn sample(height: usize, width: usize) -> Image {
        Array2::from_shape_fn((height, width), |(y, x)| {
            Pixel::new((y * 10 + x) as u8, (y * 3) as u8, (x * 7) as u8)
        })
    }

    #[test]
    fn test_read_rows_first_middle_last() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.bmp");
        let image = sample(7, 5);
        write_image(&path, &image).unwrap();

        for (start, count) in [(0, 2), (3, 3), (6, 1), (0, 7)] {
            let (header, block) = read_rows(&path, start, count).unwrap();
            assert_eq!((header.width, header.height), (5, 7));
            assert_eq!(block, image.slice(s![start..start + count, ..]));
        }
        assert!(matches!(
            read_rows(&path, 5, 3),
            Err(ImageIoError::RowRange { start: 5, end: 8, height: 7 })
        ));
    }

    #[test]
    fn test_disjoint_row_writes_assemble_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bmp");
        let image = sample(9, 6);
        let header = create_image_file(&path, 6, 9).unwrap();

        // Out of order on purpose.
        for (start, count) in [(6, 3), (0, 4), (4, 2)] {
            write_rows(&path, &header, start, image.slice(s![start..start + count, ..])).unwrap();
        }
        assert_eq!(read_image(&path).unwrap(), image);
    }

    #[test]
    fn test_missing_file_names_path() {
        let err = read_header("/nonexistent/tessera/missing.bmp").unwrap_err();
        assert!(err.to_string().contains("missing.bmp"));
    }

    #[test]
    fn test_truncated_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.bmp");
        let bytes = crate::bmp::encode_image(&sample(4, 4)).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 8]).unwrap();
        assert!(matches!(read_rows(&path, 0, 1), Err(ImageIoError::Truncated { .. })));
    }
}
