//! VM-fatal error conditions (see the error handling design: guest-visible
//! failures are encoded as sentinel values in R0 and never appear here;
//! everything in [`VmFault`] terminates the VM with exit code 125).

use crate::mix::MixError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VmFault {
    #[error("invalid opcode byte 0x{0:02x} (high nibble is not 0x7)")]
    InvalidOpcode(u8),

    #[error("operand decode error: {0}")]
    BadOperand(#[from] MixError),

    #[error("divide by zero")]
    DivideByZero,

    #[error("sys instruction carried non-zero extra arguments")]
    ExtraSyscallArguments,

    #[error("syscall 0x{0:02x} is not implemented")]
    UnimplementedSyscall(u8),

    #[error("spawn syscall is not implemented")]
    SpawnNotImplemented,

    #[error("file handle {0} is not open")]
    BadFileHandle(u32),

    #[error("fseek whence {0} is not one of SET/CUR/END")]
    InvalidSeekWhence(u32),

    #[error("no free file handle slots")]
    NoFreeFileHandles,

    #[error("I/O error on file handle {handle}: {source}")]
    Io {
        handle: u32,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of executing a single instruction. Distinguished from
/// [`VmFault`] because halting is a normal, guest-requested way for
/// the program to end, not an error condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    Halt(u8),
}
