//! State - worker execution context の状態
//!
//! # 状態遷移
//! - Idle → Running: リクエストを受け取った
//! - Running → Idle: 成功 / 失敗のレスポンスを返した
//! - Running → Terminated: timeout / shutdown で強制終了
//! - Idle → Terminated: shutdown

use serde::{Deserialize, Serialize};

use super::errors::FerryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Idle,
    Running,
    Terminated,
}

impl WorkerState {
    pub fn can_transition_to(self, to: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, to),
            (Idle, Running) | (Running, Idle) | (Running, Terminated) | (Idle, Terminated)
        )
    }

    /// Move to `to`, rejecting anything outside the state machine.
    ///
    /// `Running → Running` is reported as [`FerryError::WorkerBusy`] since it
    /// means a second request reached a context that is still executing.
    pub fn transition(&mut self, to: WorkerState) -> Result<(), FerryError> {
        if *self == WorkerState::Running && to == WorkerState::Running {
            return Err(FerryError::WorkerBusy);
        }
        if !self.can_transition_to(to) {
            return Err(FerryError::InvalidTransition { from: *self, to });
        }
        *self = to;
        Ok(())
    }

    pub fn is_idle(self) -> bool {
        self == WorkerState::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(WorkerState::Idle, WorkerState::Running)]
    #[case(WorkerState::Running, WorkerState::Idle)]
    #[case(WorkerState::Running, WorkerState::Terminated)]
    #[case(WorkerState::Idle, WorkerState::Terminated)]
    fn allowed_transitions(#[case] from: WorkerState, #[case] to: WorkerState) {
        let mut state = from;
        state.transition(to).unwrap();
        assert_eq!(state, to);
    }

    #[test]
    fn running_twice_is_busy() {
        let mut state = WorkerState::Running;
        let err = state.transition(WorkerState::Running).unwrap_err();
        assert!(matches!(err, FerryError::WorkerBusy));
        assert_eq!(state, WorkerState::Running);
    }

    #[rstest]
    #[case(WorkerState::Terminated, WorkerState::Idle)]
    #[case(WorkerState::Terminated, WorkerState::Running)]
    #[case(WorkerState::Idle, WorkerState::Idle)]
    fn invalid_transitions_are_rejected(#[case] from: WorkerState, #[case] to: WorkerState) {
        let mut state = from;
        let err = state.transition(to).unwrap_err();
        assert!(matches!(err, FerryError::InvalidTransition { .. }));
        assert_eq!(state, from);
    }
}
