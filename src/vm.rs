//! The assembled virtual machine: registers, memory and the open file
//! table wired together behind a fetch/decode/execute loop.

use crate::fault::{StepOutcome, VmFault};
use crate::loader::{self, LoaderError};
use crate::memory::Memory;
use crate::opcode;
use crate::registers::{Registers, RIP};
use crate::syscall::FileTable;

pub struct Vm {
    pub regs: Registers,
    pub mem: Memory,
    pub files: FileTable,
}

impl Vm {
    pub fn new() -> Self {
        Self {
            regs: Registers::new(),
            mem: Memory::new(),
            files: FileTable::new(),
        }
    }

    /// Load `program_path` as the guest image, with `args` appended to
    /// `argv` after the program path itself.
    pub fn load_program(&mut self, program_path: &str, args: &[String]) -> Result<(), LoaderError> {
        loader::load(&mut self.mem, &mut self.regs, program_path, args)
    }

    /// Execute one instruction, optionally emitting a trace event
    /// first. Exposed so the driver can interleave tracing between
    /// steps without duplicating the fetch/decode logic.
    pub fn step(&mut self, trace: bool) -> Result<StepOutcome, VmFault> {
        if trace {
            tracing::trace!(rip = format!("0x{:08x}", self.regs.get(RIP)), "step");
        }
        opcode::step(&mut self.regs, &mut self.mem, &mut self.files)
    }

    /// Run until the guest halts or a fatal condition is raised.
    /// Returns the guest's requested exit status on a clean halt.
    pub fn run(&mut self, trace: bool) -> Result<u8, VmFault> {
        loop {
            match self.step(trace)? {
                StepOutcome::Continue => {}
                StepOutcome::Halt(code) => return Ok(code),
            }
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}
