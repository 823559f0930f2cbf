//! Fixed-layout JPEG baseline parameter buffers.
//!
//! Clients fill these C-layout structs and submit their raw bytes as picture-parameter,
//! quantization-matrix, Huffman-table and slice-parameter buffers.

use bytemuck::{Pod, Zeroable};

/// Maximum number of components described by a picture or slice.
pub const MAX_COMPONENTS: usize = 4;

#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct PictureComponent {
    pub component_id: u8,
    pub h_sampling_factor: u8,
    pub v_sampling_factor: u8,
    /// 0-3, indexing into [`IqMatrixBuffer::quantiser_table`].
    pub quantiser_table_selector: u8,
}

#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct PictureParameterBuffer {
    pub picture_width: u16,
    pub picture_height: u16,
    pub components: [PictureComponent; MAX_COMPONENTS],
    pub num_components: u8,
    pub _pad: [u8; 3],
}

impl PictureParameterBuffer {
    /// The components actually in use.
    pub fn components(&self) -> &[PictureComponent] {
        let n = usize::from(self.num_components).min(MAX_COMPONENTS);
        &self.components[..n]
    }
}

#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct IqMatrixBuffer {
    /// Nonzero for every entry of `quantiser_table` that holds a table.
    pub load_quantiser_table: [u8; 4],
    pub quantiser_table: [[u8; 64]; 4],
}

#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct HuffmanTable {
    pub num_dc_codes: [u8; 16],
    pub dc_values: [u8; 12],
    pub num_ac_codes: [u8; 16],
    pub ac_values: [u8; 162],
    pub _pad: [u8; 2],
}

/// Huffman tables for luma (index 0) and chroma (index 1).
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct HuffmanTableBuffer {
    pub load_huffman_table: [u8; 2],
    pub huffman_table: [HuffmanTable; 2],
}

#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct SliceComponent {
    /// Matches a [`PictureComponent::component_id`].
    pub component_selector: u8,
    /// 0-1, indexing into [`HuffmanTableBuffer::huffman_table`].
    pub dc_table_selector: u8,
    /// 0-1, indexing into [`HuffmanTableBuffer::huffman_table`].
    pub ac_table_selector: u8,
    pub _pad: u8,
}

#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct SliceParameterBuffer {
    /// Number of bytes of entropy-coded data in the slice data buffer.
    pub slice_data_size: u32,
    /// Offset of the first byte of this slice inside the slice data buffer.
    pub slice_data_offset: u32,
    pub slice_data_flag: u32,
    /// Column of the first MCU of this slice, in MCUs.
    pub slice_horizontal_position: u32,
    /// Row of the first MCU of this slice, in MCUs.
    pub slice_vertical_position: u32,
    pub components: [SliceComponent; MAX_COMPONENTS],
    pub num_components: u8,
    pub _pad: u8,
    /// Ri – number of MCUs per restart interval, 0 if restart markers are not used.
    pub restart_interval: u16,
    pub num_mcus: u32,
}

impl SliceParameterBuffer {
    pub fn components(&self) -> &[SliceComponent] {
        let n = usize::from(self.num_components).min(MAX_COMPONENTS);
        &self.components[..n]
    }
}
