//! Error taxonomy for the kernel.
//!
//! Two families: [`KernelError`] is returned to a caller (invocation errors,
//! recoverable); [`Fatal`] indicates kernel-API misuse that halts the
//! machine. Converted to numeric wire codes only at the syscall boundary
//! (`runtime::trap`), never before.

/// Recoverable errors returned to the caller of a kernel primitive.
///
/// The `i32` conversion matches the stable numeric codes: `-1` invalid
/// argument, `-2` resource exhaustion / semantics denial, `-3` null
/// out-pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    #[error("invalid argument (-1)")]
    InvalidArgument,
    #[error("table full (-1)")]
    TableFull,
    #[error("stack too small (-2)")]
    StackTooSmall,
    #[error("no children to reap (-2)")]
    NoChildren,
    #[error("null out-pointer (-3)")]
    NullOutPointer,
    #[error("semaphore table full (-1)")]
    SemTableFull,
    #[error("not blocked (-1)")]
    NotBlocked,
}

impl KernelError {
    /// The stable numeric wire code for this error.
    pub const fn code(self) -> i32 {
        match self {
            KernelError::InvalidArgument
            | KernelError::NotBlocked
            | KernelError::SemTableFull => -1,
            KernelError::TableFull => -1,
            KernelError::StackTooSmall | KernelError::NoChildren => -2,
            KernelError::NullOutPointer => -3,
        }
    }
}

/// Kernel-API misuse that a correct program cannot reach. Logged to the
/// console and the machine is halted with code 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Fatal {
    #[error("kernel-only call made from user mode")]
    KernelOnlyFromUserMode,
    #[error("quit() called with outstanding children")]
    QuitWithChildren,
    #[error("zap() target is the caller itself")]
    ZapSelf,
    #[error("zap() target is init")]
    ZapInit,
    #[error("zap() target does not exist")]
    ZapNonExistent,
    #[error("zap() target is already terminating")]
    ZapAlreadyDying,
}
