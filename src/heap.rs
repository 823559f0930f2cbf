//! Typed handle tables.
//!
//! Every object the driver hands out (configs, surfaces, contexts, buffers) lives in a
//! [`SlotHeap`]. The client only ever sees a 32-bit handle: the upper 8 bits carry a per-type tag
//! and the lower 24 bits index a slot. A handle of one type never resolves in the heap of another,
//! even if it is forged from a raw integer.
//!
//! Freed slots go on a LIFO free list, so the most recently freed slot is the next one to be
//! handed out again.

use std::{fmt, marker::PhantomData};

use crate::error::{Error, ErrorKind, Result};

const TAG_MASK: u32 = 0xFF00_0000;
const INDEX_MASK: u32 = 0x00FF_FFFF;

/// Slots reserved at once whenever a heap runs out of free slots.
const HEAP_INCREMENT: usize = 16;

/// Largest number of slots a single heap can address.
pub const MAX_SLOTS: u32 = INDEX_MASK + 1;

/// A handle type stored in a [`SlotHeap`].
pub trait ObjectId: Copy {
    /// Tag occupying the upper byte of every handle of this type.
    const OFFSET: u32;
    const NAME: &'static str;

    fn from_raw(raw: u32) -> Self;
    fn raw(self) -> u32;
}

macro_rules! object_ids {
    ( $( $(#[$attr:meta])* $name:ident = $offset:literal, $what:literal; )+ ) => {
        $(
            $(#[$attr])*
            #[derive(Clone, Copy, PartialEq, Eq, Hash)]
            pub struct $name(u32);

            impl $name {
                /// Reinterprets a raw handle value. Lookups reject values with the wrong tag.
                #[inline]
                pub fn from_raw(raw: u32) -> Self {
                    Self(raw)
                }

                #[inline]
                pub fn raw(self) -> u32 {
                    self.0
                }
            }

            impl ObjectId for $name {
                const OFFSET: u32 = $offset;
                const NAME: &'static str = $what;

                fn from_raw(raw: u32) -> Self {
                    Self(raw)
                }

                fn raw(self) -> u32 {
                    self.0
                }
            }

            impl fmt::Debug for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}({:08x})", stringify!($name), self.0)
                }
            }
        )+
    };
}

object_ids! {
    /// Handle of a decoder/encoder configuration.
    ConfigId = 0x0100_0000, "config";
    /// Handle of a codec context.
    ContextId = 0x0200_0000, "context";
    /// Handle of a render-target surface.
    SurfaceId = 0x0400_0000, "surface";
    /// Handle of a client buffer.
    BufferId = 0x0800_0000, "buffer";
}

enum Slot<T> {
    Free { next: Option<u32> },
    Live(T),
}

pub struct SlotHeap<I, T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    live: usize,
    limit: u32,
    _id: PhantomData<I>,
}

impl<I: ObjectId, T> SlotHeap<I, T> {
    /// Creates an empty heap that will never hold more than `limit` live objects.
    pub fn new(limit: u32) -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            live: 0,
            limit: limit.min(MAX_SLOTS),
            _id: PhantomData,
        }
    }

    /// Stores `value` in a free slot and returns its handle.
    pub fn allocate(&mut self, value: T) -> Result<I> {
        let index = match self.free_head {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                let Slot::Free { next } = *slot else {
                    unreachable!("live slot {index} on the free list");
                };
                self.free_head = next;
                *slot = Slot::Live(value);
                index
            }
            None => {
                if self.slots.len() >= self.limit as usize {
                    return Err(Error::from((
                        ErrorKind::AllocationFailed,
                        format!("{} heap is full ({} objects)", I::NAME, self.limit),
                    )));
                }
                if self.slots.len() == self.slots.capacity() {
                    self.slots
                        .try_reserve(HEAP_INCREMENT)
                        .map_err(|_| Error::from(ErrorKind::AllocationFailed))?;
                }
                self.slots.push(Slot::Live(value));
                (self.slots.len() - 1) as u32
            }
        };

        self.live += 1;
        Ok(I::from_raw(I::OFFSET | index))
    }

    fn index(&self, id: I) -> Option<usize> {
        let raw = id.raw();
        if raw & TAG_MASK != I::OFFSET {
            return None;
        }
        let index = (raw & INDEX_MASK) as usize;
        (index < self.slots.len()).then_some(index)
    }

    pub fn lookup(&self, id: I) -> Option<&T> {
        match &self.slots[self.index(id)?] {
            Slot::Live(value) => Some(value),
            Slot::Free { .. } => None,
        }
    }

    pub fn lookup_mut(&mut self, id: I) -> Option<&mut T> {
        let index = self.index(id)?;
        match &mut self.slots[index] {
            Slot::Live(value) => Some(value),
            Slot::Free { .. } => None,
        }
    }

    /// Like [`SlotHeap::lookup`], but turns a missing object into an
    /// [`ErrorKind::InvalidHandle`] error.
    pub fn get(&self, id: I) -> Result<&T> {
        self.lookup(id)
            .ok_or_else(|| Error::invalid_handle(I::NAME, id.raw()))
    }

    pub fn get_mut(&mut self, id: I) -> Result<&mut T> {
        self.lookup_mut(id)
            .ok_or_else(|| Error::invalid_handle(I::NAME, id.raw()))
    }

    /// Removes the object behind `id` and puts its slot on the free list.
    ///
    /// Returns `None` if `id` does not refer to a live object (including a second `free` of the
    /// same handle).
    pub fn free(&mut self, id: I) -> Option<T> {
        let index = self.index(id)?;
        let slot = &mut self.slots[index];
        if let Slot::Free { .. } = slot {
            return None;
        }
        let Slot::Live(value) = std::mem::replace(
            slot,
            Slot::Free {
                next: self.free_head,
            },
        ) else {
            unreachable!()
        };
        self.free_head = Some(index as u32);
        self.live -= 1;
        Some(value)
    }

    /// Number of live objects.
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Iterates over all live objects in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (I, &T)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Live(value) => Some((I::from_raw(I::OFFSET | index as u32), value)),
                Slot::Free { .. } => None,
            })
    }

    /// Returns the handles of all live objects, in slot order.
    ///
    /// This is a snapshot, so the heap may be modified while walking it.
    pub fn ids(&self) -> Vec<I> {
        self.iter().map(|(id, _)| id).collect()
    }
}
