//! YCbCr → RGB conversion (JFIF, full range).

/// Converts one pixel.
///
/// Results are rounded to the nearest integer and clamped to `0..=255`.
#[inline]
pub fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> [u8; 3] {
    let y = f32::from(y);
    let cb = f32::from(cb) - 128.0;
    let cr = f32::from(cr) - 128.0;

    let r = y + 1.402 * cr;
    let g = y - 0.3441 * cb - 0.71414 * cr;
    let b = y + 1.772 * cb;
    [clamp(r), clamp(g), clamp(b)]
}

#[inline]
fn clamp(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Converts packed `Y Cb Cr` triples to `R G B` in place.
pub fn convert_in_place(pixels: &mut [u8]) {
    for px in pixels.chunks_exact_mut(3) {
        let rgb = ycbcr_to_rgb(px[0], px[1], px[2]);
        px.copy_from_slice(&rgb);
    }
}
