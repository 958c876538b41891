//! Lifecycle of the control loop.

/// `Idle -> Initializing -> Running -> (Completed | Aborted)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopState {
    #[default]
    Idle,
    Initializing,
    Running,
    Completed,
    Aborted,
}
