//! Dequantization and the inverse DCT of 8×8 blocks.
//!
//! Coefficients are indexed `v * 8 + u` (row `v`, column `u`) and the quantization table uses the
//! same indexing. There is no zig-zag reordering: coefficient `i` of the entropy-coded block is
//! stored at index `i`.

use std::f32::consts::PI;

/// Multiplies every coefficient with the matching quantization table entry.
pub fn dequantize(coeffs: &mut [i32; 64], table: &[u8; 64]) {
    for (c, &q) in coeffs.iter_mut().zip(table) {
        *c = c.saturating_mul(i32::from(q));
    }
}

/// Inverse DCT with precomputed basis functions.
///
/// Each output sample is
///
/// ```text
/// f(x,y) = round( Σu Σv C(u) C(v) F(u,v) cos((2x+1)uπ/16) cos((2y+1)vπ/16) ) + 128
/// ```
///
/// clamped to `0..=255`, with `C(0) = 1/2` and `C(k) = √(1/8)` otherwise.
pub struct Idct {
    /// `basis[x][u] = C(u) * cos((2x+1)uπ/16)`
    basis: [[f32; 8]; 8],
}

impl Idct {
    pub fn new() -> Self {
        let mut basis = [[0.0; 8]; 8];
        for (x, row) in basis.iter_mut().enumerate() {
            for (u, b) in row.iter_mut().enumerate() {
                let scale = if u == 0 { 0.5 } else { (0.125f32).sqrt() };
                *b = scale * ((2 * x + 1) as f32 * u as f32 * PI / 16.0).cos();
            }
        }
        Self { basis }
    }

    pub fn transform(&self, coeffs: &[i32; 64]) -> [u8; 64] {
        // Rows first: tmp[v][x] = Σu F(u,v) basis[x][u]
        let mut tmp = [[0.0f32; 8]; 8];
        for (v, out) in tmp.iter_mut().enumerate() {
            let row = &coeffs[v * 8..][..8];
            if row.iter().all(|&c| c == 0) {
                continue;
            }
            for (x, t) in out.iter_mut().enumerate() {
                *t = row
                    .iter()
                    .zip(&self.basis[x])
                    .map(|(&c, &b)| c as f32 * b)
                    .sum();
            }
        }

        let mut pixels = [0u8; 64];
        for y in 0..8 {
            for x in 0..8 {
                let sum: f32 = (0..8).map(|v| tmp[v][x] * self.basis[y][v]).sum();
                pixels[y * 8 + x] = (sum.round() as i32).saturating_add(128).clamp(0, 255) as u8;
            }
        }
        pixels
    }
}

impl Default for Idct {
    fn default() -> Self {
        Self::new()
    }
}
