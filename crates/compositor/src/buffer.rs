//! Producer buffers and the repacking that turns them into tight texel rows.
//!
//! Producers hand over planes with arbitrary row padding and, for chroma,
//! interleaved samples. Everything here is validated before a single byte is
//! indexed so a malformed buffer costs one dropped frame instead of an
//! out-of-bounds read.

use std::borrow::Cow;

use crate::config::SourceConfig;
use crate::error::BufferError;
use crate::types::{ChromaSubsampling, PixelLayout, Size, SourceRole};

/// Bytes per texel of packed sources.
pub const PACKED_CHANNELS: usize = 4;

/// One producer-delivered image plane.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    row_stride: usize,
    pixel_stride: usize,
    data: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, row_stride: usize, pixel_stride: usize, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            row_stride,
            pixel_stride,
            data,
        }
    }

    /// Buffer without padding: `pixel_stride == channels`.
    pub fn tight(width: u32, height: u32, channels: usize, data: Vec<u8>) -> Self {
        Self::new(width, height, width as usize * channels, channels, data)
    }

    /// Tight buffer with every texel set to `texel`.
    pub fn filled(width: u32, height: u32, texel: &[u8]) -> Self {
        let data = texel.repeat(width as usize * height as usize);
        Self::tight(width, height, texel.len(), data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn row_stride(&self) -> usize {
        self.row_stride
    }

    pub fn pixel_stride(&self) -> usize {
        self.pixel_stride
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_tight(&self, channels: usize) -> bool {
        self.pixel_stride == channels && self.row_stride == self.width as usize * channels
    }

    /// Checks that every texel of a `channels`-wide plane lies inside the data.
    ///
    /// The final row may omit its trailing padding, as many producers do.
    pub fn validate(&self, channels: usize) -> Result<(), BufferError> {
        if self.size().is_empty() {
            return Err(BufferError::ZeroDimension(self.size()));
        }
        if self.pixel_stride < channels {
            return Err(BufferError::PixelStrideTooSmall {
                pixel_stride: self.pixel_stride,
                channels,
            });
        }
        let width = self.width as usize;
        let min_row = width
            .checked_mul(self.pixel_stride)
            .ok_or(BufferError::Truncated {
                required: usize::MAX,
                actual: self.data.len(),
            })?;
        if self.row_stride < min_row {
            return Err(BufferError::RowStrideTooSmall {
                row_stride: self.row_stride,
                width: self.width,
                pixel_stride: self.pixel_stride,
            });
        }
        let required = (self.height as usize - 1)
            .checked_mul(self.row_stride)
            .and_then(|rows| rows.checked_add((width - 1) * self.pixel_stride + channels))
            .unwrap_or(usize::MAX);
        if self.data.len() < required {
            return Err(BufferError::Truncated {
                required,
                actual: self.data.len(),
            });
        }
        Ok(())
    }

    /// Tight `width * height * channels` bytes, borrowed when no repacking is needed.
    pub fn tight_bytes(&self, channels: usize) -> Result<Cow<'_, [u8]>, BufferError> {
        self.validate(channels)?;
        if self.is_tight(channels) {
            let len = self.size().area() * channels;
            return Ok(Cow::Borrowed(&self.data[..len]));
        }
        Ok(Cow::Owned(repack_unchecked(self, channels)))
    }
}

/// Strips row padding and pixel gaps, producing `width * height * channels` bytes.
pub fn repack(buffer: &PixelBuffer, channels: usize) -> Result<Vec<u8>, BufferError> {
    buffer.validate(channels)?;
    Ok(repack_unchecked(buffer, channels))
}

fn repack_unchecked(buffer: &PixelBuffer, channels: usize) -> Vec<u8> {
    let width = buffer.width as usize;
    let row_bytes = width * channels;
    let mut packed = Vec::with_capacity(row_bytes * buffer.height as usize);
    for row in buffer.data.chunks(buffer.row_stride).take(buffer.height as usize) {
        if buffer.pixel_stride == channels {
            packed.extend_from_slice(&row[..row_bytes]);
        } else {
            for x in 0..width {
                let start = x * buffer.pixel_stride;
                packed.extend_from_slice(&row[start..start + channels]);
            }
        }
    }
    packed
}

/// Y, U and V planes of one planar frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlanarFrame {
    pub y: PixelBuffer,
    pub u: PixelBuffer,
    pub v: PixelBuffer,
}

impl PlanarFrame {
    pub fn new(y: PixelBuffer, u: PixelBuffer, v: PixelBuffer) -> Self {
        Self { y, u, v }
    }

    /// Solid-colour frame, handy for test patterns.
    pub fn filled(luma: Size, subsampling: ChromaSubsampling, y: u8, u: u8, v: u8) -> Self {
        let chroma = subsampling.chroma_size(luma);
        Self {
            y: PixelBuffer::filled(luma.width, luma.height, &[y]),
            u: PixelBuffer::filled(chroma.width, chroma.height, &[u]),
            v: PixelBuffer::filled(chroma.width, chroma.height, &[v]),
        }
    }

    pub fn planes(&self) -> [(&'static str, &PixelBuffer); 3] {
        [("luma", &self.y), ("chroma-u", &self.u), ("chroma-v", &self.v)]
    }

    pub fn validate(&self, luma: Size, subsampling: ChromaSubsampling) -> Result<(), BufferError> {
        let chroma = subsampling.chroma_size(luma);
        for (plane, buffer) in self.planes() {
            let expected = if plane == "luma" { luma } else { chroma };
            if buffer.size() != expected {
                return Err(BufferError::DimensionMismatch {
                    plane,
                    expected,
                    actual: buffer.size(),
                });
            }
            buffer.validate(1)?;
        }
        Ok(())
    }
}

/// A frame as handed to an input endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceFrame {
    Packed(PixelBuffer),
    Planar(PlanarFrame),
}

impl SourceFrame {
    pub fn layout_name(&self) -> &'static str {
        match self {
            SourceFrame::Packed(_) => "packed",
            SourceFrame::Planar(_) => "planar",
        }
    }

    /// Rejects frames whose layout or geometry differs from what the source declared.
    pub fn validate_for(&self, role: SourceRole, source: &SourceConfig) -> Result<(), BufferError> {
        match (self, source.format) {
            (SourceFrame::Packed(buffer), PixelLayout::Packed { .. }) => {
                if buffer.size() != source.size {
                    return Err(BufferError::DimensionMismatch {
                        plane: "packed",
                        expected: source.size,
                        actual: buffer.size(),
                    });
                }
                buffer.validate(PACKED_CHANNELS)
            }
            (SourceFrame::Planar(frame), PixelLayout::Planar { subsampling }) => {
                frame.validate(source.size, subsampling)
            }
            (frame, expected) => Err(BufferError::LayoutMismatch {
                role,
                expected: expected.name(),
                actual: frame.layout_name(),
            }),
        }
    }
}

impl From<PixelBuffer> for SourceFrame {
    fn from(value: PixelBuffer) -> Self {
        SourceFrame::Packed(value)
    }
}

impl From<PlanarFrame> for SourceFrame {
    fn from(value: PlanarFrame) -> Self {
        SourceFrame::Planar(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn padded(width: u32, height: u32, channels: usize, padding: usize) -> PixelBuffer {
        let row_stride = width as usize * channels + padding;
        let mut data = vec![0xEE; row_stride * height as usize];
        for y in 0..height as usize {
            for x in 0..width as usize * channels {
                data[y * row_stride + x] = (y * 31 + x) as u8;
            }
        }
        PixelBuffer::new(width, height, row_stride, channels, data)
    }

    #[test]
    fn repack_strips_padding_for_any_amount() {
        for padding in [0, 1, 3, 16, 64] {
            let buffer = padded(7, 5, 4, padding);
            let packed = repack(&buffer, 4).expect("repack");
            assert_eq!(packed.len(), 7 * 5 * 4);
            for y in 0..5usize {
                let row = &packed[y * 28..(y + 1) * 28];
                let expected: Vec<u8> = (0..28).map(|x| (y * 31 + x) as u8).collect();
                assert_eq!(row, expected.as_slice(), "padding {padding}, row {y}");
            }
        }
    }

    #[test]
    fn tight_buffer_is_borrowed() {
        let buffer = PixelBuffer::filled(4, 2, &[1, 2, 3, 4]);
        let bytes = buffer.tight_bytes(4).expect("tight bytes");
        assert!(matches!(bytes, Cow::Borrowed(_)));
        assert_eq!(bytes.len(), 32);

        let padded = padded(4, 2, 4, 8);
        assert!(matches!(padded.tight_bytes(4).expect("repack"), Cow::Owned(_)));
    }

    #[test]
    fn interleaved_chroma_is_gathered() {
        // Two rows of UVUV... with a pixel stride of two; the U plane reads even bytes.
        let data = vec![10, 90, 11, 91, 12, 92, 0, 20, 80, 21, 81, 22, 82, 0];
        let plane = PixelBuffer::new(3, 2, 7, 2, data);
        assert_eq!(repack(&plane, 1).expect("repack"), vec![10, 11, 12, 20, 21, 22]);
    }

    #[test]
    fn last_row_may_skip_padding() {
        let mut buffer = padded(3, 2, 1, 5);
        buffer.data.truncate(8 + 3);
        assert!(buffer.validate(1).is_ok());
        buffer.data.pop();
        assert_eq!(
            buffer.validate(1),
            Err(BufferError::Truncated {
                required: 11,
                actual: 10
            })
        );
    }

    #[test]
    fn rejects_malformed_strides() {
        let narrow = PixelBuffer::new(4, 4, 8, 4, vec![0; 64]);
        assert!(matches!(
            narrow.validate(4),
            Err(BufferError::RowStrideTooSmall { .. })
        ));

        let thin = PixelBuffer::new(4, 4, 16, 2, vec![0; 64]);
        assert!(matches!(
            thin.validate(4),
            Err(BufferError::PixelStrideTooSmall { .. })
        ));

        let empty = PixelBuffer::tight(0, 4, 4, Vec::new());
        assert!(matches!(empty.validate(4), Err(BufferError::ZeroDimension(_))));
    }

    #[test]
    fn planar_frame_checks_chroma_geometry() {
        let luma = Size::new(640, 480);
        let frame = PlanarFrame::filled(luma, ChromaSubsampling::Yuv420, 128, 128, 128);
        assert!(frame.validate(luma, ChromaSubsampling::Yuv420).is_ok());
        assert!(matches!(
            frame.validate(luma, ChromaSubsampling::Yuv444),
            Err(BufferError::DimensionMismatch {
                plane: "chroma-u",
                ..
            })
        ));
    }

    #[test]
    fn source_frame_layout_must_match() {
        let source = SourceConfig::planar(Size::new(4, 4), ChromaSubsampling::Yuv420);
        let frame = SourceFrame::from(PixelBuffer::filled(4, 4, &[0, 0, 0, 255]));
        assert_eq!(
            frame.validate_for(SourceRole::Secondary, &source),
            Err(BufferError::LayoutMismatch {
                role: SourceRole::Secondary,
                expected: "planar",
                actual: "packed"
            })
        );
    }
}
