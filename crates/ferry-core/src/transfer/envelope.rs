//! Envelope - logical value + 所有権ごと移動するバッファ
//!
//! 値の部分は JSON に deep copy され、バッファは移動（コピーなし）されます。
//! `pack` 時に次を検証します:
//! - 値の中の全 `BufferRef` が添付バッファを指していること
//! - 同じバッファを二重に参照していないこと（aliasing 禁止）
//! - 添付バッファが全て値から到達可能であること

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::buffer::{BufferRef, BufferSet, TransferBuffer};
use crate::domain::FerryError;

/// Buffers a sender is handing over, in attach order.
#[derive(Debug, Default)]
pub struct TransferList {
    buffers: Vec<TransferBuffer>,
}

impl TransferList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `buffer` and return the placeholder to embed in the value.
    pub fn attach(&mut self, buffer: impl Into<TransferBuffer>) -> BufferRef {
        self.buffers.push(buffer.into());
        BufferRef::new(self.buffers.len() - 1)
    }

    /// Detach a buffer the caller keeps a handle to; the handle becomes unusable.
    pub fn attach_from(&mut self, buffer: &mut TransferBuffer) -> Result<BufferRef, FerryError> {
        let moved = buffer.detach()?;
        Ok(self.attach(moved))
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

/// A logical value paired with the buffers it references.
#[derive(Debug)]
pub struct Envelope {
    value: Value,
    buffers: Vec<TransferBuffer>,
}

impl Envelope {
    pub fn pack<T: Serialize + ?Sized>(value: &T, transfer: TransferList) -> Result<Self, FerryError> {
        let value = serde_json::to_value(value)?;
        Self::from_parts(value, transfer.buffers)
    }

    /// Envelope without buffers.
    pub fn plain<T: Serialize + ?Sized>(value: &T) -> Result<Self, FerryError> {
        Self::pack(value, TransferList::new())
    }

    pub fn from_parts(value: Value, buffers: Vec<TransferBuffer>) -> Result<Self, FerryError> {
        if let Some(i) = buffers.iter().position(TransferBuffer::is_detached) {
            return Err(FerryError::InvalidTransfer(format!(
                "buffer#{i} was already transferred"
            )));
        }
        validate_refs(&value, buffers.len())?;
        Ok(Self { value, buffers })
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn into_parts(self) -> (Value, Vec<TransferBuffer>) {
        (self.value, self.buffers)
    }

    /// Rebuild the typed value and hand out the relocated buffers.
    pub fn unpack<T: DeserializeOwned>(self) -> Result<(T, BufferSet), FerryError> {
        let value = serde_json::from_value(self.value)?;
        let buffers = BufferSet::from_buffers(self.buffers)?;
        Ok((value, buffers))
    }
}

fn validate_refs(value: &Value, attached: usize) -> Result<(), FerryError> {
    let mut refs = Vec::new();
    collect_refs(value, &mut refs);

    let mut seen = vec![false; attached];
    for index in refs {
        let Some(slot) = seen.get_mut(index) else {
            return Err(FerryError::InvalidTransfer(format!(
                "buffer#{index} referenced but only {attached} attached"
            )));
        };
        if *slot {
            return Err(FerryError::InvalidTransfer(format!(
                "buffer#{index} referenced more than once"
            )));
        }
        *slot = true;
    }

    if let Some(index) = seen.iter().position(|s| !s) {
        return Err(FerryError::InvalidTransfer(format!(
            "buffer#{index} is not reachable from the value"
        )));
    }
    Ok(())
}

fn collect_refs(value: &Value, out: &mut Vec<usize>) {
    match value {
        Value::Object(map) => {
            if map.len() == 1
                && let Some(index) = map.get(BufferRef::KEY).and_then(Value::as_u64)
            {
                out.push(index as usize);
                return;
            }
            for v in map.values() {
                collect_refs(v, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_refs(v, out);
            }
        }
        _ => {}
    }
}
