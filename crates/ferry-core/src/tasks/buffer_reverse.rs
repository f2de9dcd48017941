//! Byte-wise reversal of a transferred buffer.
//!
//! The payload is treated as an opaque byte sequence; multi-byte encodings
//! are not preserved.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{RequestId, TaskFailure};
use crate::transfer::{BufferRef, TransferList};
use crate::typed::{Handler, Reply, Task, TaskInput};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferReverse {
    #[serde(default)]
    pub description: String,
    pub data: BufferRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferReverseOutput {
    pub request_id: RequestId,
    pub original_description: String,
    pub data: BufferRef,
    pub timestamp: DateTime<Utc>,
}

impl Task for BufferReverse {
    const NAME: &'static str = "ferry.buffer.reverse.v1";
    type Output = BufferReverseOutput;
}

pub struct BufferReverseHandler;

#[async_trait]
impl Handler<BufferReverse> for BufferReverseHandler {
    async fn handle(
        &self,
        mut input: TaskInput<BufferReverse>,
    ) -> Result<Reply<BufferReverseOutput>, TaskFailure> {
        let mut bytes = input.buffers.take(input.task.data)?;
        bytes.reverse();

        let mut transfer = TransferList::new();
        let data = transfer.attach(bytes);
        Ok(Reply::with_transfer(
            BufferReverseOutput {
                request_id: input.request_id,
                original_description: input.task.description,
                data,
                timestamp: Utc::now(),
            },
            transfer,
        ))
    }
}
