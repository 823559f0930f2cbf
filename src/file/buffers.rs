use bytemuck::Zeroable;

use crate::{
    error::{Error, ErrorKind, Result},
    params::{
        HuffmanTableBuffer, IqMatrixBuffer, PictureComponent, PictureParameterBuffer,
        SliceComponent, SliceParameterBuffer, MAX_COMPONENTS,
    },
};

use super::{JpegParser, SegmentKind, SofMarker};

/// The parameter buffers and scan data describing one baseline JPEG file.
///
/// Every scan becomes one slice covering all of its MCUs. The scans' entropy-coded data is stored
/// back to back in `slice_data`, and each slice records its own offset and size.
#[derive(Debug, Clone)]
pub struct PictureBuffers {
    pub picture: PictureParameterBuffer,
    pub iq_matrix: IqMatrixBuffer,
    pub huffman_table: HuffmanTableBuffer,
    pub slices: Vec<SliceParameterBuffer>,
    pub slice_data: Vec<u8>,
}

impl PictureBuffers {
    pub fn from_jpeg(jpeg: &[u8]) -> Result<Self> {
        macro_rules! bail {
            ($kind:ident, $($args:tt)*) => {
                return Err(Error::from((ErrorKind::$kind, format!($($args)*))))
            };
        }

        let mut picture: Option<PictureParameterBuffer> = None;
        let mut iq_matrix = IqMatrixBuffer::zeroed();
        let mut huffman_table = HuffmanTableBuffer::zeroed();
        let mut restart_interval = 0;
        let mut slices = Vec::new();
        let mut slice_data = Vec::new();

        let mut parser = JpegParser::new(jpeg)?;
        while let Some(segment) = parser.next_segment()? {
            match segment.kind() {
                Some(SegmentKind::Sof(sof)) => {
                    if sof.sof() != SofMarker::SOF0 {
                        bail!(Unsupported, "not a baseline JPEG ({:?})", sof.sof());
                    }
                    if sof.P() != 8 {
                        bail!(Unsupported, "sample precision of {} bits is not supported", sof.P());
                    }
                    if picture.is_some() {
                        bail!(MalformedBitstream, "encountered multiple SOF markers");
                    }
                    if sof.components().is_empty() || sof.components().len() > MAX_COMPONENTS {
                        bail!(
                            Unsupported,
                            "frame with {} components not supported",
                            sof.components().len()
                        );
                    }

                    let mut pic = PictureParameterBuffer::zeroed();
                    pic.picture_width = sof.X();
                    pic.picture_height = sof.Y();
                    pic.num_components = sof.components().len() as u8;
                    for (dest, c) in pic.components.iter_mut().zip(sof.components()) {
                        if c.Tqi() > 3 {
                            bail!(
                                MalformedBitstream,
                                "component {} selects quantization table {} (only 0-3 are valid)",
                                c.Ci(),
                                c.Tqi()
                            );
                        }
                        *dest = PictureComponent {
                            component_id: c.Ci(),
                            h_sampling_factor: c.Hi(),
                            v_sampling_factor: c.Vi(),
                            quantiser_table_selector: c.Tqi(),
                        };
                    }
                    log::trace!("frame: {sof:?}");
                    picture = Some(pic);
                }
                Some(SegmentKind::Dqt(dqt)) => {
                    for table in dqt.tables() {
                        if table.Pq() != 0 {
                            bail!(Unsupported, "16-bit quantization tables are not supported");
                        }
                        let slot = usize::from(table.Tq());
                        if slot > 3 {
                            bail!(
                                MalformedBitstream,
                                "invalid quantization table destination Tq={slot} (0-3 are allowed)"
                            );
                        }
                        // All slices of a picture share one IQ matrix buffer.
                        if !slices.is_empty()
                            && iq_matrix.load_quantiser_table[slot] != 0
                            && iq_matrix.quantiser_table[slot] != *table.Qk()
                        {
                            bail!(
                                Unsupported,
                                "quantization table {slot} redefined between scans"
                            );
                        }
                        iq_matrix.quantiser_table[slot] = *table.Qk();
                        iq_matrix.load_quantiser_table[slot] = 1;
                    }
                }
                Some(SegmentKind::Dht(dht)) => {
                    for table in dht.tables() {
                        let slot = usize::from(table.Th());
                        if slot > 1 {
                            bail!(
                                Unsupported,
                                "DHT Th={slot}, only 0 and 1 are allowed for baseline JPEGs"
                            );
                        }
                        let scanned = !slices.is_empty();
                        let dest = &mut huffman_table.huffman_table[slot];
                        let values = table.Vij();
                        match table.Tc() {
                            0 => {
                                if values.len() > dest.dc_values.len() {
                                    bail!(MalformedBitstream, "DC table with {} values", values.len());
                                }
                                let loaded = dest.num_dc_codes.iter().any(|&n| n != 0);
                                if scanned
                                    && loaded
                                    && (dest.num_dc_codes != *table.Li()
                                        || dest.dc_values[..values.len()] != *values)
                                {
                                    bail!(Unsupported, "DC table {slot} redefined between scans");
                                }
                                dest.num_dc_codes = *table.Li();
                                dest.dc_values = [0; 12];
                                dest.dc_values[..values.len()].copy_from_slice(values);
                            }
                            1 => {
                                if values.len() > dest.ac_values.len() {
                                    bail!(MalformedBitstream, "AC table with {} values", values.len());
                                }
                                let loaded = dest.num_ac_codes.iter().any(|&n| n != 0);
                                if scanned
                                    && loaded
                                    && (dest.num_ac_codes != *table.Li()
                                        || dest.ac_values[..values.len()] != *values)
                                {
                                    bail!(Unsupported, "AC table {slot} redefined between scans");
                                }
                                dest.num_ac_codes = *table.Li();
                                dest.ac_values = [0; 162];
                                dest.ac_values[..values.len()].copy_from_slice(values);
                            }
                            tc => bail!(
                                MalformedBitstream,
                                "invalid table class Tc={tc} (only 0 and 1 are valid)"
                            ),
                        }
                        huffman_table.load_huffman_table[slot] = 1;
                    }
                }
                Some(SegmentKind::Dri(dri)) => restart_interval = dri.Ri(),
                Some(SegmentKind::Sos(sos)) => {
                    if sos.Ss() != 0 || sos.Se() != 63 || sos.Ah() != 0 || sos.Al() != 0 {
                        bail!(Unsupported, "non-baseline scan header");
                    }
                    let Some(pic) = &picture else {
                        bail!(MalformedBitstream, "SOS not preceded by SOF header");
                    };

                    let mut slice = SliceParameterBuffer::zeroed();
                    if sos.components().is_empty() || sos.components().len() > MAX_COMPONENTS {
                        bail!(
                            MalformedBitstream,
                            "scan with {} components",
                            sos.components().len()
                        );
                    }
                    for (dest, c) in slice.components.iter_mut().zip(sos.components()) {
                        if !pic.components().iter().any(|p| p.component_id == c.Csj()) {
                            bail!(MalformedBitstream, "scan references unknown component {}", c.Csj());
                        }
                        *dest = SliceComponent {
                            component_selector: c.Csj(),
                            dc_table_selector: c.Tdj(),
                            ac_table_selector: c.Taj(),
                            _pad: 0,
                        };
                    }
                    slice.num_components = sos.components().len() as u8;
                    slice.num_mcus = scan_mcus(pic, &slice);
                    slice.restart_interval = restart_interval;
                    let (Ok(offset), Ok(size)) = (
                        u32::try_from(slice_data.len()),
                        u32::try_from(sos.data().len()),
                    ) else {
                        bail!(Unsupported, "scan data exceeds 4 GiB");
                    };
                    slice.slice_data_offset = offset;
                    slice.slice_data_size = size;
                    log::trace!("scan {}: {sos:?}", slices.len());
                    slice_data.extend_from_slice(sos.data());
                    slices.push(slice);
                }
                None => {}
            }
        }

        let Some(picture) = picture else {
            bail!(MalformedBitstream, "missing SOF segment");
        };
        if slices.is_empty() {
            bail!(MalformedBitstream, "missing SOS segment");
        }

        Ok(Self {
            picture,
            iq_matrix,
            huffman_table,
            slices,
            slice_data,
        })
    }
}

/// Number of MCUs in a scan over the whole picture.
fn scan_mcus(pic: &PictureParameterBuffer, slice: &SliceParameterBuffer) -> u32 {
    let comps = pic.components();
    let hmax = comps.iter().map(|c| u32::from(c.h_sampling_factor)).max().unwrap_or(1).max(1);
    let vmax = comps.iter().map(|c| u32::from(c.v_sampling_factor)).max().unwrap_or(1).max(1);
    let (w, h) = (u32::from(pic.picture_width), u32::from(pic.picture_height));

    match slice.components() {
        [single] => {
            // Non-interleaved: one block per MCU over the component's own grid.
            let Some(c) = comps.iter().find(|c| c.component_id == single.component_selector) else {
                return 0;
            };
            let cw = (w * u32::from(c.h_sampling_factor)).div_ceil(hmax);
            let ch = (h * u32::from(c.v_sampling_factor)).div_ceil(vmax);
            cw.div_ceil(8) * ch.div_ceil(8)
        }
        _ => w.div_ceil(8 * hmax) * h.div_ceil(8 * vmax),
    }
}
