//! Domain model (ids, task names, wire records, worker state, errors, capsules).

pub mod capsule;
pub mod errors;
pub mod ids;
pub mod state;
pub mod task;

pub use self::capsule::{ErrorCapsule, FailureField, FailureOrigin, TaskFailure};
pub use self::errors::{FerryError, RemoteError};
pub use self::ids::{RequestId, WorkerId};
pub use self::state::WorkerState;
pub use self::task::{ResponseStatus, TaskName, TaskRequest, TaskResponse};
