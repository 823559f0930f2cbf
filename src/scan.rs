//! Entropy decoding of baseline scan data.
//!
//! A slice is a run of MCUs in one scan. Each MCU is decoded block by block: the DC difference and
//! the AC run/size symbols are read through the component's Huffman trees, the resulting
//! coefficients are dequantized and inverse-transformed, and the 8×8 pixel block is placed into
//! the picture canvas.
//!
//! Running out of data (or hitting an undecodable code) in the middle of a slice is not an error.
//! The slice stops there with a warning, and whatever was decoded so far stays in the canvas.

use core::fmt;

use crate::{
    bits::BitReader,
    error::{Error, ErrorKind, Result},
    huffman::{DecodeError, HuffmanTables, HuffmanTree},
    idct::{self, Idct},
    image::Canvas,
    params::{IqMatrixBuffer, PictureParameterBuffer, SliceParameterBuffer},
};

/// Largest number of components a decodable picture can have (Y, Cb, Cr).
pub const MAX_DECODED_COMPONENTS: usize = 3;

/// AC symbol ending a block early.
const EOB: u8 = 0x00;
/// AC symbol for a run of 16 zero coefficients.
const ZRL: u8 = 0xF0;

/// Position and sampling of one picture component.
#[derive(Debug, Clone)]
pub struct FrameComponent {
    pub id: u8,
    /// Output channel (0 = Y, 1 = Cb, 2 = Cr).
    pub channel: usize,
    pub h: usize,
    pub v: usize,
    /// How many picture pixels one sample covers horizontally and vertically.
    pub replicate: (usize, usize),
    /// Size of the component's block grid (used by non-interleaved slices).
    pub blocks_x: usize,
    pub blocks_y: usize,
    pub qtable: [u8; 64],
}

/// MCU geometry of a picture.
#[derive(Debug, Clone)]
pub struct FrameLayout {
    pub width: u16,
    pub height: u16,
    pub mcus_x: usize,
    pub mcus_y: usize,
    pub components: Vec<FrameComponent>,
}

impl FrameLayout {
    pub fn new(pic: &PictureParameterBuffer, iq: &IqMatrixBuffer) -> Result<Self> {
        let (width, height) = (pic.picture_width, pic.picture_height);
        if width == 0 || height == 0 {
            return Err(Error::from((
                ErrorKind::InvalidParameter,
                format!("picture size {width}x{height} is empty"),
            )));
        }

        let comps = pic.components();
        if comps.is_empty() || comps.len() > MAX_DECODED_COMPONENTS {
            return Err(Error::from((
                ErrorKind::Unsupported,
                format!("pictures with {} components are not supported", comps.len()),
            )));
        }
        for c in comps {
            if !(1..=4).contains(&c.h_sampling_factor) || !(1..=4).contains(&c.v_sampling_factor)
            {
                return Err(Error::from((
                    ErrorKind::MalformedBitstream,
                    format!(
                        "component {} has invalid sampling factors {}x{}",
                        c.component_id, c.h_sampling_factor, c.v_sampling_factor
                    ),
                )));
            }
        }

        let hmax = comps.iter().map(|c| usize::from(c.h_sampling_factor)).max().unwrap_or(1);
        let vmax = comps.iter().map(|c| usize::from(c.v_sampling_factor)).max().unwrap_or(1);

        let (w, h) = (usize::from(width), usize::from(height));
        let mut components = Vec::with_capacity(comps.len());
        for (channel, c) in comps.iter().enumerate() {
            let (ch, cv) = (usize::from(c.h_sampling_factor), usize::from(c.v_sampling_factor));
            if hmax % ch != 0 || vmax % cv != 0 {
                return Err(Error::from((
                    ErrorKind::MalformedBitstream,
                    format!(
                        "sampling factors {ch}x{cv} of component {} do not divide {hmax}x{vmax}",
                        c.component_id
                    ),
                )));
            }

            let sel = usize::from(c.quantiser_table_selector);
            if sel >= iq.load_quantiser_table.len() || iq.load_quantiser_table[sel] == 0 {
                return Err(Error::from((
                    ErrorKind::MissingBuffer,
                    format!("quantization table {sel} is not loaded"),
                )));
            }

            let comp_w = (w * ch).div_ceil(hmax);
            let comp_h = (h * cv).div_ceil(vmax);
            components.push(FrameComponent {
                id: c.component_id,
                channel,
                h: ch,
                v: cv,
                replicate: (hmax / ch, vmax / cv),
                blocks_x: comp_w.div_ceil(8),
                blocks_y: comp_h.div_ceil(8),
                qtable: iq.quantiser_table[sel],
            });
        }

        Ok(Self {
            width,
            height,
            mcus_x: w.div_ceil(8 * hmax),
            mcus_y: h.div_ceil(8 * vmax),
            components,
        })
    }
}

/// Why a block could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockError {
    Huffman(DecodeError),
    /// Out of data while reading magnitude bits.
    Exhausted,
    /// A magnitude category too large for 8-bit baseline data.
    Magnitude(u8),
    /// A zero run moved past the last coefficient.
    RunOverflow,
}

impl From<DecodeError> for BlockError {
    fn from(e: DecodeError) -> Self {
        Self::Huffman(e)
    }
}

impl fmt::Display for BlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockError::Huffman(DecodeError::Exhausted) | BlockError::Exhausted => {
                f.write_str("slice data exhausted")
            }
            BlockError::Huffman(DecodeError::InvalidCode) => f.write_str("invalid Huffman code"),
            BlockError::Magnitude(s) => write!(f, "magnitude category {s} out of range"),
            BlockError::RunOverflow => f.write_str("coefficient run past position 63"),
        }
    }
}

/// Reads `s` magnitude bits and sign-extends them.
fn receive_extend(bits: &mut BitReader<'_>, s: u8) -> Result<i32, BlockError> {
    let raw = bits.read_bits(u32::from(s)).ok_or(BlockError::Exhausted)?;
    let v = i32::from(raw);
    if v < 1 << (s - 1) {
        Ok(v - (1 << s) + 1)
    } else {
        Ok(v)
    }
}

/// Decodes the 64 coefficients of one block. `pred` is the component's DC predictor.
fn decode_block(
    bits: &mut BitReader<'_>,
    dc: &HuffmanTree,
    ac: &HuffmanTree,
    pred: &mut i32,
    coeffs: &mut [i32; 64],
) -> Result<(), BlockError> {
    *coeffs = [0; 64];

    let s = dc.decode(bits)?;
    if s > 11 {
        return Err(BlockError::Magnitude(s));
    }
    if s > 0 {
        *pred = pred.wrapping_add(receive_extend(bits, s)?);
    }
    coeffs[0] = *pred;

    let mut k = 1;
    while k < 64 {
        let rs = ac.decode(bits)?;
        match rs {
            EOB => break,
            ZRL => {
                k += 16;
                continue;
            }
            _ => {}
        }
        let (run, size) = (usize::from(rs >> 4), rs & 0x0F);
        if size == 0 || size > 10 {
            return Err(BlockError::Magnitude(size));
        }
        k += run;
        if k > 63 {
            return Err(BlockError::RunOverflow);
        }
        coeffs[k] = receive_extend(bits, size)?;
        k += 1;
    }
    Ok(())
}

/// How far a slice got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceOutcome {
    /// Number of MCUs fully decoded.
    pub mcus_decoded: u32,
    /// Number of bytes of slice data read.
    pub bytes_consumed: usize,
}

struct ScanComponent<'a> {
    frame: &'a FrameComponent,
    dc: &'a HuffmanTree,
    ac: &'a HuffmanTree,
    pred: i32,
}

/// Decodes one slice of scan data into `canvas`.
///
/// Fails only if the slice parameters themselves are unusable (unknown components, tables that
/// were not loaded). Truncated or corrupt data ends the slice early; see [`SliceOutcome`].
pub fn decode_slice(
    layout: &FrameLayout,
    tables: &HuffmanTables,
    idct: &Idct,
    slice: &SliceParameterBuffer,
    data: &[u8],
    canvas: &mut Canvas,
) -> Result<SliceOutcome> {
    let mut comps = Vec::with_capacity(slice.components().len());
    for sc in slice.components() {
        let frame = layout
            .components
            .iter()
            .find(|c| c.id == sc.component_selector)
            .ok_or_else(|| {
                Error::from((
                    ErrorKind::MalformedBitstream,
                    format!("slice references unknown component {}", sc.component_selector),
                ))
            })?;
        comps.push(ScanComponent {
            frame,
            dc: tables.dc(sc.dc_table_selector)?,
            ac: tables.ac(sc.ac_table_selector)?,
            pred: 0,
        });
    }

    let interleaved = comps.len() > 1;
    let (per_row, rows) = match &*comps {
        [] => {
            return Err(Error::from((
                ErrorKind::MalformedBitstream,
                "slice has no components",
            )))
        }
        [single] => (single.frame.blocks_x, single.frame.blocks_y),
        _ => (layout.mcus_x, layout.mcus_y),
    };
    let total = per_row * rows;
    let start = slice.slice_vertical_position as usize * per_row
        + slice.slice_horizontal_position as usize;
    let num_mcus = slice.num_mcus as usize;
    let restart_interval = usize::from(slice.restart_interval);

    let mut bits = BitReader::new(data);
    let mut coeffs = [0; 64];
    for n in 0..num_mcus {
        if restart_interval > 0 && n > 0 && n % restart_interval == 0 {
            if bits.restart().is_none() {
                log::warn!("expected restart marker before MCU {}", start + n);
            }
            for comp in &mut comps {
                comp.pred = 0;
            }
        }

        let mcu = start + n;
        if mcu >= total {
            log::warn!(
                "slice of {num_mcus} MCUs starting at {start} extends past the last MCU ({total})"
            );
            return Ok(SliceOutcome {
                mcus_decoded: n as u32,
                bytes_consumed: bits.bytes_consumed(),
            });
        }
        let (mx, my) = (mcu % per_row, mcu / per_row);

        for comp in &mut comps {
            let frame = comp.frame;
            let (bw, bh) = if interleaved { (frame.h, frame.v) } else { (1, 1) };
            for by in 0..bh {
                for bx in 0..bw {
                    if let Err(e) =
                        decode_block(&mut bits, comp.dc, comp.ac, &mut comp.pred, &mut coeffs)
                    {
                        log::warn!(
                            "{e} after {n} of {num_mcus} MCUs ({} bytes read)",
                            bits.bytes_consumed()
                        );
                        return Ok(SliceOutcome {
                            mcus_decoded: n as u32,
                            bytes_consumed: bits.bytes_consumed(),
                        });
                    }
                    idct::dequantize(&mut coeffs, &frame.qtable);
                    let pixels = idct.transform(&coeffs);
                    let (col, row) = if interleaved {
                        (mx * frame.h + bx, my * frame.v + by)
                    } else {
                        (mx, my)
                    };
                    canvas.place_block(frame.channel, col, row, frame.replicate, &pixels);
                }
            }
        }
    }

    if let Some(marker) = bits.marker() {
        log::trace!("slice data ends at marker ff {marker:02x}");
    }
    Ok(SliceOutcome {
        mcus_decoded: slice.num_mcus,
        bytes_consumed: bits.bytes_consumed(),
    })
}
