pub use crate::process_posix::{spawn, Child};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    Success,
    /// Nonzero exit code.
    Exit(i32),
    /// Killed by this signal.
    Signal(i32),
}
