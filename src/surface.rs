//! Render-target surfaces and the presentation interface.

use crate::image::Image;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceStatus {
    /// Idle; any decoded picture is complete.
    Ready,
    /// The current render target of an open picture.
    Rendering,
}

pub(crate) struct Surface {
    pub width: u32,
    pub height: u32,
    pub status: SurfaceStatus,
    /// The last picture decoded into this surface.
    pub image: Option<Image>,
}

impl Surface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            status: SurfaceStatus::Ready,
            image: None,
        }
    }

    pub fn frame(&self) -> Option<Frame<'_>> {
        let image = self.image.as_ref()?;
        Some(Frame {
            data: image.data(),
            width: image.width(),
            height: image.height(),
            stride: image.stride(),
        })
    }
}

/// Borrowed view of a decoded RGB picture: 3 bytes per pixel, `stride` bytes per row.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub stride: usize,
}

impl<'a> Frame<'a> {
    /// Returns row `y`, without any stride padding.
    pub fn row(&self, y: u32) -> Option<&'a [u8]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.stride;
        self.data.get(start..start + self.width as usize * 3)
    }
}

/// Receives finished pictures, typically to put them on screen.
pub trait Present {
    fn present(&mut self, frame: Frame<'_>);
}
