//! Task - task 名とワイヤ上の request / response header
//!
//! header は camelCase の JSON として Frame に載ります。
//! バッファは header に含めず、index だけを持ちます。

use serde::{Deserialize, Serialize};
use std::fmt;

use super::capsule::ErrorCapsule;
use super::ids::{RequestId, WorkerId};

/// Name a task body is registered under (e.g. `ferry.buffer.reverse.v1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskName(String);

impl TaskName {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Header of a task request as it crosses the execution-context boundary.
///
/// The buffers named by `transfer_buffer_indices` are not part of the header;
/// they travel beside it in the same [`Frame`](crate::transfer::Frame).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    pub id: RequestId,
    pub task_name: TaskName,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub transfer_buffer_indices: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Header of a task response.
///
/// `value` is present iff `status == Success`; `error_capsule` iff `Error`.
/// Use the constructors rather than building the struct by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponse {
    pub id: RequestId,
    pub worker_id: WorkerId,
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub result_buffer_indices: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_capsule: Option<ErrorCapsule>,
}

impl TaskResponse {
    pub fn success(
        id: RequestId,
        worker_id: WorkerId,
        value: serde_json::Value,
        buffer_count: usize,
    ) -> Self {
        Self {
            id,
            worker_id,
            status: ResponseStatus::Success,
            value: Some(value),
            result_buffer_indices: (0..buffer_count).collect(),
            error_capsule: None,
        }
    }

    pub fn error(id: RequestId, worker_id: WorkerId, capsule: ErrorCapsule) -> Self {
        Self {
            id,
            worker_id,
            status: ResponseStatus::Error,
            value: None,
            result_buffer_indices: Vec::new(),
            error_capsule: Some(capsule),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}
