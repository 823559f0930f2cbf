//! Reference-counted buffer data.
//!
//! A client buffer owns its bytes through a [`StoreRef`]. Attaching the buffer to a decode
//! session takes another reference, after which the client handle is destroyed while the data
//! lives on inside the session until the last reference is released.

use std::rc::Rc;

use bytemuck::AnyBitPattern;

use crate::error::{Error, ErrorKind, Result};

pub type StoreRef = Rc<BufferStore>;

/// Raw bytes of a client buffer, shared by every session slot that references it.
pub struct BufferStore {
    data: Vec<u8>,
    element_size: usize,
    num_elements: usize,
}

impl BufferStore {
    /// Allocates a store of `element_size * num_elements` bytes.
    ///
    /// The bytes are copied from `data` if given (which must be at least that long), and zeroed
    /// otherwise. The returned reference is the only one.
    pub fn create(element_size: usize, num_elements: usize, data: Option<&[u8]>) -> Result<StoreRef> {
        let len = element_size.checked_mul(num_elements).ok_or_else(|| {
            Error::from((
                ErrorKind::AllocationFailed,
                format!("buffer of {num_elements}x{element_size} bytes overflows"),
            ))
        })?;

        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|_| Error::from(ErrorKind::AllocationFailed))?;
        match data {
            Some(data) => {
                let Some(src) = data.get(..len) else {
                    return Err(Error::from((
                        ErrorKind::InvalidParameter,
                        format!("{} bytes of buffer data given, {len} needed", data.len()),
                    )));
                };
                bytes.extend_from_slice(src);
            }
            None => bytes.resize(len, 0),
        }

        Ok(Rc::new(Self {
            data: bytes,
            element_size,
            num_elements,
        }))
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    #[inline]
    pub fn element_size(&self) -> usize {
        self.element_size
    }

    /// Number of valid elements (may be lowered after creation).
    #[inline]
    pub fn num_elements(&self) -> usize {
        self.num_elements
    }

    pub(crate) fn set_num_elements(&mut self, num_elements: usize) {
        self.num_elements = num_elements;
    }

    /// Reads element `index` as a `T`, which must be exactly `element_size` bytes or smaller.
    pub fn element<T: AnyBitPattern>(&self, index: usize) -> Result<T> {
        let size = std::mem::size_of::<T>();
        if index >= self.num_elements || size > self.element_size {
            return Err(Error::from((
                ErrorKind::InvalidParameter,
                format!(
                    "cannot read {}-byte element {index} from buffer of {}x{} bytes",
                    size, self.num_elements, self.element_size,
                ),
            )));
        }
        let start = index * self.element_size;
        Ok(bytemuck::pod_read_unaligned(&self.data[start..start + size]))
    }

    /// Reads every valid element as a `T`.
    pub fn elements<T: AnyBitPattern>(&self) -> Result<Vec<T>> {
        (0..self.num_elements).map(|i| self.element(i)).collect()
    }
}

impl Drop for BufferStore {
    fn drop(&mut self) {
        log::trace!("releasing buffer store ({} bytes)", self.data.len());
    }
}

/// Makes `slot` refer to `store`.
///
/// Whatever `slot` referred to before is released first, so a slot can be overwritten without
/// clearing it.
pub fn reference(slot: &mut Option<StoreRef>, store: &StoreRef) {
    release(slot);
    *slot = Some(Rc::clone(store));
}

/// Drops the reference held by `slot`, destroying the store if it was the last one.
///
/// Releasing an empty slot does nothing.
pub fn release(slot: &mut Option<StoreRef>) {
    drop(slot.take());
}

#[cfg(test)]
mod tests {
    use std::rc::Weak;

    use super::*;

    #[test]
    fn create_copies_or_zeroes() {
        let store = BufferStore::create(2, 3, Some(&[1, 2, 3, 4, 5, 6, 7])).unwrap();
        assert_eq!(store.data(), &[1, 2, 3, 4, 5, 6]);
        assert_eq!(Rc::strong_count(&store), 1);

        let store = BufferStore::create(4, 2, None).unwrap();
        assert_eq!(store.data(), &[0; 8]);

        let err = BufferStore::create(4, 2, Some(&[0; 7])).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn reference_releases_previous_occupant() {
        let a = BufferStore::create(1, 1, None).unwrap();
        let b = BufferStore::create(1, 1, None).unwrap();

        let mut slot = None;
        reference(&mut slot, &a);
        assert_eq!(Rc::strong_count(&a), 2);

        reference(&mut slot, &b);
        assert_eq!(Rc::strong_count(&a), 1);
        assert_eq!(Rc::strong_count(&b), 2);

        // Re-referencing the occupant keeps the count stable.
        reference(&mut slot, &b);
        assert_eq!(Rc::strong_count(&b), 2);

        release(&mut slot);
        assert!(slot.is_none());
        assert_eq!(Rc::strong_count(&b), 1);
        release(&mut slot);
        assert_eq!(Rc::strong_count(&b), 1);
    }

    #[test]
    fn random_reference_release_sequences() {
        let mut rng = fastrand::Rng::with_seed(0x5eed);
        for _ in 0..50 {
            let store = BufferStore::create(1, 16, None).unwrap();
            let weak: Weak<BufferStore> = Rc::downgrade(&store);
            let mut slots: Vec<Option<StoreRef>> = vec![None; 8];
            for _ in 0..64 {
                let slot = &mut slots[rng.usize(..8)];
                if rng.bool() {
                    reference(slot, &store);
                } else {
                    release(slot);
                }
                let held = slots.iter().filter(|s| s.is_some()).count();
                assert_eq!(Rc::strong_count(&store), held + 1);
            }

            // The client reference goes away; the data must survive exactly as long as some slot
            // still holds it.
            drop(store);
            for i in 0..slots.len() {
                let remaining = slots.iter().filter(|s| s.is_some()).count();
                assert_eq!(weak.upgrade().is_some(), remaining > 0);
                release(&mut slots[i]);
            }
            assert!(weak.upgrade().is_none());
        }
    }

    #[test]
    fn typed_elements() {
        let store = BufferStore::create(4, 2, Some(&[1, 0, 0, 0, 2, 0, 0, 0])).unwrap();
        let values: Vec<[u8; 4]> = store.elements().unwrap();
        assert_eq!(values, [[1, 0, 0, 0], [2, 0, 0, 0]]);
        assert!(store.element::<[u8; 4]>(2).is_err());
        assert!(store.element::<[u8; 8]>(0).is_err());
    }
}
