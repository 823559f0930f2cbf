//! The picture decode pipeline run at `end_picture`.

use crate::{
    error::{Error, ErrorKind, Result},
    huffman::HuffmanTables,
    idct::Idct,
    image::{Canvas, Image},
    params::{HuffmanTableBuffer, IqMatrixBuffer, PictureParameterBuffer, SliceParameterBuffer},
    scan::{self, FrameLayout},
    session::DecodeState,
    store::StoreRef,
};

/// Statistics of one decoded picture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeSummary {
    /// Number of slices decoded (one per slice parameter element).
    pub slices: u32,
    /// MCUs the slice parameters declared.
    pub mcus_declared: u64,
    /// MCUs actually decoded.
    pub mcus_decoded: u64,
    /// Slices that ended before their declared MCU count.
    pub truncated_slices: u32,
}

impl DecodeSummary {
    /// Whether every slice decoded all of its declared MCUs.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.truncated_slices == 0
    }
}

fn required<'a>(slot: &'a Option<StoreRef>, what: &str) -> Result<&'a StoreRef> {
    slot.as_ref().ok_or_else(|| {
        Error::from((
            ErrorKind::MissingBuffer,
            format!("no {what} buffer was attached"),
        ))
    })
}

/// Decodes the picture described by the buffers accumulated in `state`.
///
/// Slice parameter buffer `i` describes slices into slice data buffer `i`. Each element of a slice
/// parameter buffer is one slice.
pub fn decode_picture(state: &DecodeState) -> Result<(Image, DecodeSummary)> {
    let pic: PictureParameterBuffer = required(&state.pic_param, "picture parameter")?.element(0)?;
    let iq: IqMatrixBuffer = required(&state.iq_matrix, "IQ matrix")?.element(0)?;
    let huffman: HuffmanTableBuffer = required(&state.huffman_table, "Huffman table")?.element(0)?;

    let layout = FrameLayout::new(&pic, &iq)?;
    let tables = HuffmanTables::from_buffer(&huffman)?;

    if state.slice_params.is_empty() {
        return Err(Error::from((
            ErrorKind::MissingBuffer,
            "no slice parameter buffer was attached",
        )));
    }
    if state.slice_params.len() != state.slice_data.len() {
        log::warn!(
            "{} slice parameter buffers, but {} slice data buffers; ignoring the unpaired ones",
            state.slice_params.len(),
            state.slice_data.len(),
        );
    }

    if state.bit_plane.is_some() {
        log::debug!("ignoring bit-plane buffer (not used by JPEG)");
    }

    let idct = Idct::new();
    let mut canvas = Canvas::new(layout.width, layout.height)?;
    let mut summary = DecodeSummary::default();
    for (i, params) in state.slice_params.iter().enumerate() {
        let Some(data) = state.slice_data.get(i) else {
            break;
        };
        for slice in params.elements::<SliceParameterBuffer>()? {
            let window = slice_window(data.data(), &slice);
            let outcome = scan::decode_slice(&layout, &tables, &idct, &slice, window, &mut canvas)?;
            log::trace!(
                "slice {}: {} MCUs from {} of {} bytes",
                summary.slices,
                outcome.mcus_decoded,
                outcome.bytes_consumed,
                window.len(),
            );

            summary.slices += 1;
            summary.mcus_declared += u64::from(slice.num_mcus);
            summary.mcus_decoded += u64::from(outcome.mcus_decoded);
            if outcome.mcus_decoded < slice.num_mcus {
                log::warn!(
                    "slice {} decoded {} of {} MCUs",
                    summary.slices - 1,
                    outcome.mcus_decoded,
                    slice.num_mcus,
                );
                summary.truncated_slices += 1;
            }
        }
    }

    log::debug!(
        "decoded {}x{} picture: {summary:?}",
        layout.width,
        layout.height
    );
    Ok((canvas.into_rgb(), summary))
}

/// The bytes of `data` a slice covers, clipped to the buffer.
fn slice_window<'a>(data: &'a [u8], slice: &SliceParameterBuffer) -> &'a [u8] {
    let offset = slice.slice_data_offset as usize;
    let size = slice.slice_data_size as usize;
    let start = offset.min(data.len());
    let end = offset.saturating_add(size).min(data.len());
    if end - start < size {
        log::warn!(
            "slice of {size} bytes at offset {offset} exceeds the {}-byte slice data buffer",
            data.len()
        );
    }
    &data[start..end]
}
