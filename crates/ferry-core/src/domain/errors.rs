//! Errors - caller から見えるエラー型

use std::fmt;

use serde_json::{Map, Value};
use thiserror::Error;

use super::capsule::{ErrorCapsule, FailureOrigin, names};
use super::ids::{RequestId, WorkerId};
use super::state::WorkerState;
use super::task::TaskName;

#[derive(Debug, Error)]
pub enum FerryError {
    #[error("unknown task: {0}")]
    UnknownTask(TaskName),

    #[error("invalid transfer: {0}")]
    InvalidTransfer(String),

    #[error("buffer used after its ownership was transferred")]
    UseAfterTransfer,

    #[error(transparent)]
    TaskExecution(#[from] RemoteError),

    #[error("{worker} did not respond to {request} in time")]
    WorkerTimeout {
        worker: WorkerId,
        request: RequestId,
    },

    #[error("protocol violation from {worker}: {detail}")]
    ProtocolViolation { worker: WorkerId, detail: String },

    #[error("request id {0} is already pending")]
    DuplicateRequestId(RequestId),

    #[error("worker pool is shut down")]
    PoolShutdown,

    #[error("worker is already running a task")]
    WorkerBusy,

    #[error("invalid worker state transition {from:?} -> {to:?}")]
    InvalidTransition { from: WorkerState, to: WorkerState },

    #[error("wire encode/decode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl FerryError {
    /// Rebuild the caller-side error for a capsule received from a worker.
    ///
    /// Only runtime-origin capsules map to typed variants. A task body that
    /// raises a failure named `UnknownTaskError` still surfaces as
    /// [`FerryError::TaskExecution`] with its fields intact.
    pub fn from_capsule(task_name: &TaskName, capsule: ErrorCapsule) -> Self {
        match (capsule.origin, capsule.name.as_deref()) {
            (FailureOrigin::Runtime, Some(names::UNKNOWN_TASK)) => {
                FerryError::UnknownTask(task_name.clone())
            }
            (FailureOrigin::Runtime, Some(names::INVALID_TRANSFER)) => {
                FerryError::InvalidTransfer(capsule.message)
            }
            _ => FerryError::TaskExecution(RemoteError::from(capsule)),
        }
    }

    pub fn as_remote(&self) -> Option<&RemoteError> {
        match self {
            FerryError::TaskExecution(remote) => Some(remote),
            _ => None,
        }
    }
}

/// A failure raised inside a worker, as seen by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    name: String,
    message: String,
    stack: Option<String>,
    extra: Map<String, Value>,
}

impl RemoteError {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }
}

impl From<ErrorCapsule> for RemoteError {
    fn from(capsule: ErrorCapsule) -> Self {
        Self {
            name: capsule.name_or_default().to_string(),
            message: capsule.message,
            stack: capsule.stack,
            extra: capsule.extra,
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for RemoteError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_capsule(name: &str, message: &str) -> ErrorCapsule {
        ErrorCapsule {
            message: message.to_string(),
            name: Some(name.to_string()),
            stack: None,
            extra: Map::new(),
            origin: FailureOrigin::Task,
        }
    }

    #[test]
    fn capsule_fields_survive_into_remote_error() {
        let capsule = task_capsule("Err", "boom").with_extra("extra1", Value::from("x"));

        let err = FerryError::from_capsule(&TaskName::new("t"), capsule);
        let remote = err.as_remote().unwrap();
        assert_eq!(remote.name(), "Err");
        assert_eq!(remote.message(), "boom");
        assert_eq!(remote.field("extra1"), Some(&Value::from("x")));
        assert_eq!(err.to_string(), "Err: boom");
    }

    #[test]
    fn worker_raised_capsules_map_to_typed_variants() {
        let name = TaskName::new("doesNotExist");
        let err = FerryError::from_capsule(
            &name,
            ErrorCapsule::runtime(names::UNKNOWN_TASK, "no handler"),
        );
        assert!(matches!(err, FerryError::UnknownTask(n) if n == name));

        let err = FerryError::from_capsule(
            &name,
            ErrorCapsule::runtime(names::INVALID_TRANSFER, "slot 1 referenced twice"),
        );
        assert!(matches!(err, FerryError::InvalidTransfer(m) if m.contains("twice")));
    }

    #[test]
    fn task_raised_reserved_names_stay_task_failures() {
        let name = TaskName::new("ferry.user.v1");
        let capsule = task_capsule(names::UNKNOWN_TASK, "disk quota exceeded")
            .with_extra("extra1", Value::from(7));

        let err = FerryError::from_capsule(&name, capsule);
        let remote = err.as_remote().expect("task failure");
        assert_eq!(remote.name(), names::UNKNOWN_TASK);
        assert_eq!(remote.message(), "disk quota exceeded");
        assert_eq!(remote.field("extra1"), Some(&Value::from(7)));

        let err = FerryError::from_capsule(&name, task_capsule(names::INVALID_TRANSFER, "nope"));
        assert!(matches!(err, FerryError::TaskExecution(_)));
    }
}
