//! Per-context accumulation of picture buffers.
//!
//! Between `begin_picture` and `end_picture`, every attached buffer's store is referenced from a
//! named slot (picture parameters, tables, ...) or appended to one of the slice lists. The
//! session keeps those references until the slot is overwritten, the lists are reset by the next
//! picture, or the context is destroyed.

use crate::{
    caps::BufferType,
    error::{Error, ErrorKind, Result},
    store::{self, StoreRef},
};

/// Slice lists grow by this many entries at a time.
pub const SLICE_CHUNK: usize = 10;

/// An ordered list of store references that grows in fixed chunks.
pub struct StoreList {
    /// `entries.len()` is the capacity; only `..len` is in use.
    entries: Vec<Option<StoreRef>>,
    len: usize,
}

impl StoreList {
    fn new() -> Self {
        Self {
            entries: vec![None; SLICE_CHUNK],
            len: 0,
        }
    }

    pub fn push(&mut self, store: &StoreRef) {
        if self.len == self.capacity() {
            let capacity = self.capacity() + SLICE_CHUNK;
            log::trace!("growing slice list to {capacity} entries");
            self.entries.resize(capacity, None);
        }
        store::reference(&mut self.entries[self.len], store);
        self.len += 1;
    }

    /// Releases every entry and sets the length to zero, keeping the capacity.
    pub fn clear(&mut self) {
        for entry in &mut self.entries[..self.len] {
            store::release(entry);
        }
        self.len = 0;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, index: usize) -> Option<&StoreRef> {
        self.entries[..self.len].get(index)?.as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StoreRef> + '_ {
        self.entries[..self.len].iter().flatten()
    }
}

impl Drop for StoreList {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Inputs of one decoded picture.
pub struct DecodeState {
    pub pic_param: Option<StoreRef>,
    pub iq_matrix: Option<StoreRef>,
    pub huffman_table: Option<StoreRef>,
    pub bit_plane: Option<StoreRef>,
    pub slice_params: StoreList,
    pub slice_data: StoreList,
}

impl DecodeState {
    fn new() -> Self {
        Self {
            pic_param: None,
            iq_matrix: None,
            huffman_table: None,
            bit_plane: None,
            slice_params: StoreList::new(),
            slice_data: StoreList::new(),
        }
    }

    fn attach(&mut self, kind: BufferType, store: &StoreRef) -> Result<()> {
        match kind {
            BufferType::PictureParameter => store::reference(&mut self.pic_param, store),
            BufferType::IqMatrix => store::reference(&mut self.iq_matrix, store),
            BufferType::HuffmanTable => store::reference(&mut self.huffman_table, store),
            BufferType::BitPlane => store::reference(&mut self.bit_plane, store),
            BufferType::SliceParameter => self.slice_params.push(store),
            BufferType::SliceData => self.slice_data.push(store),
            _ => return Err(unsupported(kind, "decode")),
        }
        Ok(())
    }
}

/// Parameters aggregated by an encoding context.
pub struct EncodeState {
    pub seq_param: Option<StoreRef>,
    pub pic_param: Option<StoreRef>,
    pub pic_control: Option<StoreRef>,
    pub iq_matrix: Option<StoreRef>,
    pub q_matrix: Option<StoreRef>,
    pub slice_params: StoreList,
}

impl EncodeState {
    fn new() -> Self {
        Self {
            seq_param: None,
            pic_param: None,
            pic_control: None,
            iq_matrix: None,
            q_matrix: None,
            slice_params: StoreList::new(),
        }
    }

    fn attach(&mut self, kind: BufferType, store: &StoreRef) -> Result<()> {
        match kind {
            BufferType::EncSequenceParameter => store::reference(&mut self.seq_param, store),
            BufferType::EncPictureParameter => store::reference(&mut self.pic_param, store),
            BufferType::PictureParameter => store::reference(&mut self.pic_control, store),
            BufferType::IqMatrix => store::reference(&mut self.iq_matrix, store),
            BufferType::QMatrix => store::reference(&mut self.q_matrix, store),
            BufferType::SliceParameter | BufferType::EncSliceParameter => {
                self.slice_params.push(store)
            }
            _ => return Err(unsupported(kind, "encode")),
        }
        Ok(())
    }
}

fn unsupported(kind: BufferType, direction: &str) -> Error {
    Error::from((
        ErrorKind::Unsupported,
        format!("{kind:?} buffers cannot be attached to {direction} contexts"),
    ))
}

impl EncodeState {
    /// Number of parameter buffers currently referenced.
    pub fn num_attached(&self) -> usize {
        [
            &self.seq_param,
            &self.pic_param,
            &self.pic_control,
            &self.iq_matrix,
            &self.q_matrix,
        ]
        .iter()
        .filter(|slot| slot.is_some())
        .count()
            + self.slice_params.len()
    }
}

/// Codec state of a context; the direction is fixed when the context is created.
pub enum CodecState {
    Decode(DecodeState),
    Encode(EncodeState),
}

impl CodecState {
    pub fn decode() -> Self {
        Self::Decode(DecodeState::new())
    }

    pub fn encode() -> Self {
        Self::Encode(EncodeState::new())
    }

    /// Takes a reference to `store` according to its content type.
    ///
    /// Unsupported types leave the state untouched.
    pub fn attach(&mut self, kind: BufferType, store: &StoreRef) -> Result<()> {
        match self {
            CodecState::Decode(state) => state.attach(kind, store),
            CodecState::Encode(state) => state.attach(kind, store),
        }
    }

    /// Prepares for a new picture: the slice lists of the previous picture are emptied.
    pub fn reset_slices(&mut self) {
        match self {
            CodecState::Decode(state) => {
                state.slice_params.clear();
                state.slice_data.clear();
            }
            CodecState::Encode(state) => state.slice_params.clear(),
        }
    }
}
