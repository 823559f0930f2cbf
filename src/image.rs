//! Picture assembly: placing decoded blocks into a full-resolution YCbCr canvas and converting
//! the result to RGB.

use crate::{
    color,
    error::{Error, ErrorKind, Result},
};

/// Neutral value of all three channels before any block is placed. Cb/Cr stay at this value for
/// pictures without chroma components.
const BLANK: [u8; 3] = [0, 128, 128];

/// A decoded RGB picture, 3 bytes per pixel, rows tightly packed.
#[derive(Clone, PartialEq, Eq)]
pub struct Image {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Image {
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per row.
    #[inline]
    pub fn stride(&self) -> usize {
        self.width as usize * 3
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 3;
        Some([self.data[i], self.data[i + 1], self.data[i + 2]])
    }
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Packed `Y Cb Cr` samples at full picture resolution.
pub struct Canvas {
    width: usize,
    height: usize,
    samples: Vec<u8>,
}

impl Canvas {
    pub fn new(width: u16, height: u16) -> Result<Self> {
        let (width, height) = (usize::from(width), usize::from(height));
        let len = width * height * 3;
        let mut samples = Vec::new();
        samples.try_reserve_exact(len).map_err(|_| {
            Error::from((
                ErrorKind::AllocationFailed,
                format!("cannot allocate {width}x{height} picture"),
            ))
        })?;
        for _ in 0..width * height {
            samples.extend_from_slice(&BLANK);
        }
        Ok(Self {
            width,
            height,
            samples,
        })
    }

    /// Writes an 8×8 block of `channel` samples.
    ///
    /// `(col, row)` is the block's position in the component's own block grid. Each sample is
    /// replicated over a `replicate.0 × replicate.1` neighborhood of picture pixels, which
    /// upsamples subsampled chroma to full resolution. Pixels outside the picture are dropped.
    pub fn place_block(
        &mut self,
        channel: usize,
        col: usize,
        row: usize,
        replicate: (usize, usize),
        block: &[u8; 64],
    ) {
        let (rx, ry) = replicate;
        let x0 = col * 8 * rx;
        let y0 = row * 8 * ry;
        if x0 >= self.width || y0 >= self.height {
            return;
        }

        for (by, line) in block.chunks_exact(8).enumerate() {
            for dy in 0..ry {
                let y = y0 + by * ry + dy;
                if y >= self.height {
                    return;
                }
                let row_start = y * self.width;
                for (bx, &sample) in line.iter().enumerate() {
                    for dx in 0..rx {
                        let x = x0 + bx * rx + dx;
                        if x >= self.width {
                            break;
                        }
                        self.samples[(row_start + x) * 3 + channel] = sample;
                    }
                }
            }
        }
    }

    /// Color-converts the canvas.
    pub fn into_rgb(mut self) -> Image {
        color::convert_in_place(&mut self.samples);
        Image {
            width: self.width as u32,
            height: self.height as u32,
            data: self.samples,
        }
    }
}
