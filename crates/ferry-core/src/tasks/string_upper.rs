//! StringUpper - メッセージを大文字化して処理時刻を付ける
//!
//! バッファを使わない、いちばん単純な task body。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{RequestId, TaskFailure};
use crate::typed::{Handler, Reply, Task, TaskInput};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StringUpper {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StringUpperOutput {
    pub original: String,
    pub transformed: String,
    pub request_id: RequestId,
    pub timestamp: DateTime<Utc>,
}

impl Task for StringUpper {
    const NAME: &'static str = "ferry.string.upper.v1";
    type Output = StringUpperOutput;
}

pub struct StringUpperHandler;

#[async_trait]
impl Handler<StringUpper> for StringUpperHandler {
    async fn handle(
        &self,
        input: TaskInput<StringUpper>,
    ) -> Result<Reply<StringUpperOutput>, TaskFailure> {
        let transformed = input.task.message.to_uppercase();
        Ok(Reply::new(StringUpperOutput {
            original: input.task.message,
            transformed,
            request_id: input.request_id,
            timestamp: Utc::now(),
        }))
    }
}
