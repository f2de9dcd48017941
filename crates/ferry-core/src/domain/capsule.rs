//! Capsule - worker 内の失敗を境界越しに運ぶための表現
//!
//! Task body が返す [`TaskFailure`] は任意の追加フィールドを持てます。
//! その中にシリアライズできない値が混ざっていても失敗情報が消えないよう、
//! [`ErrorCapsule::capture`] は二段構えで組み立てます。
//!
//! 1. full capture: name / message / stack / extra を全部 JSON 化
//! 2. minimal capture: 1 が失敗したら extra を捨て、合成メッセージだけ残す
//!
//! worker 自身が起こした失敗（未登録 task・不正な transfer など）は
//! [`FailureOrigin::Runtime`] で区別します。名前は task body も自由に
//! 使えるので、caller 側の型付きエラーへの復元は origin だけで判断します。

use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Capsule names the worker uses for failures it raises itself.
pub mod names {
    pub const UNKNOWN_TASK: &str = "UnknownTaskError";
    pub const INVALID_TRANSFER: &str = "InvalidTransferError";
    pub const PAYLOAD_DECODE: &str = "PayloadDecodeError";
    pub const RESULT_ENCODE: &str = "ResultEncodeError";
    pub const PANIC: &str = "Panic";
    pub const DEFAULT: &str = "Error";
}

/// Who raised a failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureOrigin {
    /// A task body.
    #[default]
    Task,
    /// The worker runtime around the task body.
    Runtime,
}

/// An extra field attached to a [`TaskFailure`].
///
/// Capturing may fail (e.g. a map with non-string keys); that is exactly the
/// case the degraded capsule exists for.
pub trait FailureField: fmt::Debug + Send + Sync {
    fn capture(&self) -> Result<Value, serde_json::Error>;
}

impl<T> FailureField for T
where
    T: Serialize + fmt::Debug + Send + Sync,
{
    fn capture(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Failure raised by a task body.
///
/// Any `std::error::Error` converts into one, so handlers can use `?`; the
/// name defaults to the error's type name.
#[derive(Debug)]
pub struct TaskFailure {
    name: String,
    message: String,
    stack: Option<String>,
    extra: Vec<(String, Box<dyn FailureField>)>,
    origin: FailureOrigin,
}

impl TaskFailure {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: captured_backtrace(),
            extra: Vec::new(),
            origin: FailureOrigin::Task,
        }
    }

    /// Failure raised by the worker runtime rather than the task body.
    pub(crate) fn runtime(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            origin: FailureOrigin::Runtime,
            ..Self::new(name, message)
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_field<V>(mut self, key: impl Into<String>, value: V) -> Self
    where
        V: FailureField + 'static,
    {
        self.extra.push((key.into(), Box::new(value)));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.extra.iter().map(|(k, _)| k.as_str())
    }

    pub fn origin(&self) -> FailureOrigin {
        self.origin
    }
}

impl<E> From<E> for TaskFailure
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        let name = short_type_name(std::any::type_name::<E>()).to_string();

        let mut failure = TaskFailure::new(name, err.to_string());
        // source chain は stack に積んでおく（backtrace が無いときの手がかり）
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(format!("caused by: {cause}"));
            source = cause.source();
        }
        if failure.stack.is_none() && !chain.is_empty() {
            failure.stack = Some(chain.join("\n"));
        }
        failure
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

// `my_crate::Wrapper<std::io::Error>` -> `Wrapper`
fn short_type_name(full: &str) -> &str {
    let path = full.split('<').next().unwrap_or(full);
    match path.rsplit("::").next() {
        Some(name) if !name.is_empty() => name,
        _ => names::DEFAULT,
    }
}

fn captured_backtrace() -> Option<String> {
    let bt = Backtrace::capture();
    (bt.status() == BacktraceStatus::Captured).then(|| bt.to_string())
}

/// A failure field could not be serialized.
#[derive(Debug, thiserror::Error)]
#[error("failure field '{field}' is not serializable: {source}")]
pub struct CapsuleSerializationFailure {
    pub field: String,
    #[source]
    pub source: serde_json::Error,
}

/// Serialization-safe form of a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorCapsule {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
    #[serde(default)]
    pub origin: FailureOrigin,
}

impl ErrorCapsule {
    /// Build a capsule that is guaranteed to be transmittable.
    pub fn capture(failure: &TaskFailure) -> Self {
        match Self::try_capture(failure) {
            Ok(capsule) => capsule,
            Err(err) => {
                warn!(name = %failure.name, error = %err, "degrading error capsule");
                Self::degraded(&failure.message)
            }
        }
    }

    /// Full capture of the standard fields plus every extra field.
    pub fn try_capture(failure: &TaskFailure) -> Result<Self, CapsuleSerializationFailure> {
        let mut extra = Map::new();
        for (key, field) in &failure.extra {
            let value = field
                .capture()
                .map_err(|source| CapsuleSerializationFailure {
                    field: key.clone(),
                    source,
                })?;
            extra.insert(key.clone(), value);
        }

        Ok(Self {
            message: failure.message.clone(),
            name: Some(failure.name.clone()),
            stack: failure.stack.clone(),
            extra,
            origin: failure.origin,
        })
    }

    /// Minimal capsule: a synthesized message and nothing else.
    pub fn degraded(original_message: &str) -> Self {
        let message = if original_message.is_empty() {
            "worker failed to process task and to serialize the original error".to_string()
        } else {
            format!(
                "worker failed to process task and to serialize the original error: {original_message}"
            )
        };
        Self {
            message,
            name: None,
            stack: None,
            extra: Map::new(),
            origin: FailureOrigin::Task,
        }
    }

    /// Capsule for a failure raised by the worker itself rather than a task body.
    pub(crate) fn runtime(name: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            name: Some(name.to_string()),
            stack: None,
            extra: Map::new(),
            origin: FailureOrigin::Runtime,
        }
    }

    pub fn is_runtime(&self) -> bool {
        self.origin == FailureOrigin::Runtime
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn name_or_default(&self) -> &str {
        self.name.as_deref().unwrap_or(names::DEFAULT)
    }
}
