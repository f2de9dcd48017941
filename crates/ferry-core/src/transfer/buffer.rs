//! Move-only byte buffers and the placeholders that point at them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::FerryError;

/// A byte buffer with exactly one owner.
///
/// Not `Clone`. Handing it to another execution context moves the allocation;
/// a buffer detached through [`TransferBuffer::detach`] stays behind as an
/// empty shell whose reads fail with [`FerryError::UseAfterTransfer`].
#[derive(Debug)]
pub struct TransferBuffer {
    bytes: Option<Vec<u8>>,
}

impl TransferBuffer {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes: Some(bytes) }
    }

    pub fn is_detached(&self) -> bool {
        self.bytes.is_none()
    }

    /// Byte length; a detached buffer reports 0.
    pub fn len(&self) -> usize {
        self.bytes.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> Result<&[u8], FerryError> {
        self.bytes.as_deref().ok_or(FerryError::UseAfterTransfer)
    }

    pub fn as_bytes_mut(&mut self) -> Result<&mut [u8], FerryError> {
        self.bytes.as_deref_mut().ok_or(FerryError::UseAfterTransfer)
    }

    /// Move the allocation out, leaving `self` detached.
    pub fn detach(&mut self) -> Result<TransferBuffer, FerryError> {
        self.bytes
            .take()
            .map(TransferBuffer::new)
            .ok_or(FerryError::UseAfterTransfer)
    }

    pub fn into_vec(self) -> Result<Vec<u8>, FerryError> {
        self.bytes.ok_or(FerryError::UseAfterTransfer)
    }
}

impl From<Vec<u8>> for TransferBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

/// Placeholder for a transferred buffer inside a logical value.
///
/// Serializes as `{"$buffer": <index>}` so the receiver can rebind it to the
/// relocated bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferRef {
    #[serde(rename = "$buffer")]
    index: usize,
}

impl BufferRef {
    pub(crate) const KEY: &'static str = "$buffer";

    pub(crate) fn new(index: usize) -> Self {
        Self { index }
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Display for BufferRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer#{}", self.index)
    }
}

/// Buffers received on the other side of the boundary, one slot per
/// [`BufferRef`]. Each slot can be taken exactly once.
#[derive(Debug, Default)]
pub struct BufferSet {
    slots: Vec<Option<Vec<u8>>>,
}

impl BufferSet {
    pub(crate) fn from_buffers(buffers: Vec<TransferBuffer>) -> Result<Self, FerryError> {
        let slots = buffers
            .into_iter()
            .map(|b| b.into_vec().map(Some))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { slots })
    }

    /// Take ownership of the bytes behind `r`.
    pub fn take(&mut self, r: BufferRef) -> Result<Vec<u8>, FerryError> {
        self.slot_mut(r)?.take().ok_or(FerryError::UseAfterTransfer)
    }

    pub fn get(&self, r: BufferRef) -> Result<&[u8], FerryError> {
        self.slots
            .get(r.index)
            .ok_or_else(|| out_of_range(r, self.slots.len()))?
            .as_deref()
            .ok_or(FerryError::UseAfterTransfer)
    }

    /// Number of slots, taken or not.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of slots not yet taken.
    pub fn remaining(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    fn slot_mut(&mut self, r: BufferRef) -> Result<&mut Option<Vec<u8>>, FerryError> {
        let len = self.slots.len();
        self.slots.get_mut(r.index).ok_or_else(|| out_of_range(r, len))
    }
}

fn out_of_range(r: BufferRef, len: usize) -> FerryError {
    FerryError::InvalidTransfer(format!("{r} out of range ({len} buffers transferred)"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detach_moves_allocation_and_invalidates_source() {
        let mut original = TransferBuffer::new(vec![1, 2, 3, 4]);
        let ptr = original.as_bytes().unwrap().as_ptr();

        let moved = original.detach().unwrap();

        assert!(original.is_detached());
        assert_eq!(original.len(), 0);
        assert!(matches!(original.as_bytes(), Err(FerryError::UseAfterTransfer)));
        assert!(matches!(original.detach(), Err(FerryError::UseAfterTransfer)));
        assert_eq!(moved.as_bytes().unwrap().as_ptr(), ptr);
    }

    #[test]
    fn buffer_ref_serializes_as_marker_object() {
        let v = serde_json::to_value(BufferRef::new(2)).unwrap();
        assert_eq!(v, serde_json::json!({ "$buffer": 2 }));
    }

    #[test]
    fn buffer_set_slots_are_taken_once() {
        let mut set = BufferSet::from_buffers(vec![vec![9u8].into()]).unwrap();
        let r = BufferRef::new(0);

        assert_eq!(set.get(r).unwrap(), &[9]);
        assert_eq!(set.take(r).unwrap(), vec![9]);
        assert_eq!(set.remaining(), 0);
        assert!(matches!(set.take(r), Err(FerryError::UseAfterTransfer)));
        assert!(matches!(
            set.take(BufferRef::new(5)),
            Err(FerryError::InvalidTransfer(_))
        ));
    }
}
