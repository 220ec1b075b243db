//! The syscall dispatcher: the hosted program's only window onto the
//! outside world (files, wall-clock time, process exit).
//!
//! Guest-visible failures (fopen/unlink/chmod) are reported as sentinel
//! values written back into R0, matching the error-code convention in
//! the spec; everything else that can go wrong here (a write failing
//! because the descriptor died out from under us, an unsupported
//! syscall number, divide-by-zero's sibling errors) is VM-fatal and
//! bubbles up as a [`VmFault`].

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::time::SystemTime;

use thiserror::Error;

use crate::fault::{StepOutcome, VmFault};
use crate::memory::Memory;
use crate::registers::Registers;

pub const SYS_HALT: u8 = 0x00;
pub const SYS_TIME: u8 = 0x01;
pub const SYS_SPAWN: u8 = 0x02;
pub const SYS_FOPEN: u8 = 0x03;
pub const SYS_FCLOSE: u8 = 0x04;
pub const SYS_READ: u8 = 0x05;
pub const SYS_FWRITE: u8 = 0x06;
pub const SYS_FSEEK: u8 = 0x07;
pub const SYS_FTELL: u8 = 0x08;
pub const SYS_FTRUNC: u8 = 0x09;
pub const SYS_UNLINK: u8 = 0x10;
pub const SYS_CHMOD: u8 = 0x11;

/// Sentinels returned in R0 for guest-visible failures.
pub const ERR_GENERIC: u32 = 0xFFFF_FFFF;
pub const ERR_PATH: u32 = 0xFFFF_FFFE;
#[allow(dead_code)]
pub const ERR_IO: u32 = 0xFFFF_FFFD;
#[allow(dead_code)]
pub const ERR_UNSUPPORTED: u32 = 0xFFFF_FFFC;

const NUM_HANDLES: usize = 16;

/// One open file, or one of the three permanently-bound standard
/// streams. Slots 0-2 are populated at construction and are never
/// freed by [`FileTable::close`].
enum FileHandle {
    Stdin(std::io::Stdin),
    Stdout(std::io::Stdout),
    Stderr(std::io::Stderr),
    File(std::fs::File),
}

#[derive(Debug, Error)]
enum OpenError {
    #[error("path not found")]
    NotFound,
    #[error("no free file handle slots")]
    NoFreeSlots,
}

impl FileHandle {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            FileHandle::Stdin(s) => s.read(buf),
            FileHandle::File(f) => f.read(buf),
            FileHandle::Stdout(_) | FileHandle::Stderr(_) => Ok(0),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            FileHandle::Stdout(s) => s.write_all(buf),
            FileHandle::Stderr(s) => s.write_all(buf),
            FileHandle::File(f) => f.write_all(buf),
            FileHandle::Stdin(_) => Ok(()),
        }
    }

    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        match self {
            FileHandle::File(f) => f.seek(pos),
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "cannot seek a standard stream",
            )),
        }
    }

    fn stream_position(&mut self) -> std::io::Result<u64> {
        match self {
            FileHandle::File(f) => f.stream_position(),
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "cannot tell a standard stream",
            )),
        }
    }

    fn set_len(&mut self, len: u64) -> std::io::Result<()> {
        match self {
            FileHandle::File(f) => f.set_len(len),
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "cannot truncate a standard stream",
            )),
        }
    }
}

/// The 16-slot ordered file handle table. Slots 0, 1, 2 are bound to
/// the host's standard streams for the lifetime of the VM.
pub struct FileTable {
    slots: [Option<FileHandle>; NUM_HANDLES],
}

impl FileTable {
    pub fn new() -> Self {
        const NONE: Option<FileHandle> = None;
        let mut slots = [NONE; NUM_HANDLES];
        slots[0] = Some(FileHandle::Stdin(std::io::stdin()));
        slots[1] = Some(FileHandle::Stdout(std::io::stdout()));
        slots[2] = Some(FileHandle::Stderr(std::io::stderr()));
        Self { slots }
    }

    fn lowest_free(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    fn open(&mut self, path: &str, write: bool) -> Result<u32, OpenError> {
        let slot = self.lowest_free().ok_or(OpenError::NoFreeSlots)?;
        let file = if write {
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)
        } else {
            OpenOptions::new().read(true).open(path)
        };
        match file {
            Ok(f) => {
                self.slots[slot] = Some(FileHandle::File(f));
                Ok(slot as u32)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(OpenError::NotFound),
            Err(_) => Err(OpenError::NotFound),
        }
    }

    fn get_mut(&mut self, handle: u32) -> Result<&mut FileHandle, VmFault> {
        self.slots
            .get_mut(handle as usize)
            .and_then(Option::as_mut)
            .ok_or(VmFault::BadFileHandle(handle))
    }

    fn close(&mut self, handle: u32) -> Result<(), VmFault> {
        let slot = self
            .slots
            .get_mut(handle as usize)
            .ok_or(VmFault::BadFileHandle(handle))?;
        if slot.is_none() {
            return Err(VmFault::BadFileHandle(handle));
        }
        *slot = None;
        Ok(())
    }
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

fn io_fault(handle: u32, source: std::io::Error) -> VmFault {
    VmFault::Io { handle, source }
}

/// Dispatch a `sys` instruction. Returns [`StepOutcome::Halt`] only for
/// syscall 0; every other syscall returns `Continue` and communicates
/// its result through registers and memory as documented per-syscall.
pub fn dispatch(
    number: u8,
    regs: &mut Registers,
    mem: &mut Memory,
    files: &mut FileTable,
) -> Result<StepOutcome, VmFault> {
    match number {
        SYS_HALT => Ok(StepOutcome::Halt((regs.get(0) & 0xFF) as u8)),

        SYS_TIME => {
            let addr = regs.get(0);
            let now = SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default();
            let secs = now.as_secs();
            mem.store_word(addr, (secs & 0xFFFF_FFFF) as u32);
            mem.store_word(addr.wrapping_add(4), (secs >> 32) as u32);
            // Apparent upstream bug preserved verbatim: the low word is
            // immediately overwritten with the nanosecond remainder,
            // discarding the low bits of the second count.
            mem.store_word(addr, now.subsec_nanos());
            regs.set(0, 0);
            Ok(StepOutcome::Continue)
        }

        SYS_SPAWN => Err(VmFault::SpawnNotImplemented),

        SYS_FOPEN => {
            let path = mem.load_string(regs.get(0));
            let write = regs.get(1) != 0;
            match files.open(&path, write) {
                Ok(handle) => regs.set(0, handle),
                Err(OpenError::NotFound) => regs.set(0, ERR_PATH),
                Err(OpenError::NoFreeSlots) => regs.set(0, ERR_GENERIC),
            }
            Ok(StepOutcome::Continue)
        }

        SYS_FCLOSE => {
            files.close(regs.get(0))?;
            Ok(StepOutcome::Continue)
        }

        SYS_READ => {
            let handle = regs.get(0);
            let addr = regs.get(1);
            let count = regs.get(2) as usize;
            let mut buf = vec![0u8; count];
            let mut total = 0usize;
            {
                let file = files.get_mut(handle)?;
                while total < count {
                    let n = file
                        .read(&mut buf[total..])
                        .map_err(|e| io_fault(handle, e))?;
                    if n == 0 {
                        break;
                    }
                    total += n;
                }
            }
            mem.store_bytes(addr, &buf[..total]);
            regs.set(0, total as u32);
            Ok(StepOutcome::Continue)
        }

        SYS_FWRITE => {
            let handle = regs.get(0);
            let addr = regs.get(1);
            let count = regs.get(2);
            let mut buf = Vec::with_capacity(count as usize);
            for i in 0..count {
                buf.push(mem.load_byte(addr.wrapping_add(i)));
            }
            files
                .get_mut(handle)?
                .write_all(&buf)
                .map_err(|e| io_fault(handle, e))?;
            regs.set(0, count);
            Ok(StepOutcome::Continue)
        }

        SYS_FSEEK => {
            let handle = regs.get(0);
            let whence = regs.get(1);
            let offset = ((regs.get(3) as u64) << 32 | regs.get(2) as u64) as i64;
            let pos = match whence {
                0 => SeekFrom::Start(offset as u64),
                1 => SeekFrom::Current(offset),
                2 => SeekFrom::End(offset),
                other => return Err(VmFault::InvalidSeekWhence(other)),
            };
            files
                .get_mut(handle)?
                .seek(pos)
                .map_err(|e| io_fault(handle, e))?;
            regs.set(0, 0);
            Ok(StepOutcome::Continue)
        }

        SYS_FTELL => {
            let handle = regs.get(0);
            let addr = regs.get(1);
            let pos = files
                .get_mut(handle)?
                .stream_position()
                .map_err(|e| io_fault(handle, e))?;
            mem.store_word(addr, (pos & 0xFFFF_FFFF) as u32);
            mem.store_word(addr.wrapping_add(4), (pos >> 32) as u32);
            regs.set(0, 0);
            Ok(StepOutcome::Continue)
        }

        SYS_FTRUNC => {
            let handle = regs.get(0);
            let len = (regs.get(2) as u64) << 32 | regs.get(1) as u64;
            files
                .get_mut(handle)?
                .set_len(len)
                .map_err(|e| io_fault(handle, e))?;
            regs.set(0, 0);
            Ok(StepOutcome::Continue)
        }

        SYS_UNLINK => {
            let path = mem.load_string(regs.get(0));
            match std::fs::remove_file(path) {
                Ok(()) => regs.set(0, 0),
                Err(_) => regs.set(0, ERR_GENERIC),
            }
            Ok(StepOutcome::Continue)
        }

        SYS_CHMOD => {
            let path = mem.load_string(regs.get(0));
            let mode = regs.get(1);
            let result = set_permissions(&path, mode);
            regs.set(0, if result.is_ok() { 0 } else { ERR_GENERIC });
            Ok(StepOutcome::Continue)
        }

        other => Err(VmFault::UnimplementedSyscall(other)),
    }
}

#[cfg(unix)]
fn set_permissions(path: &str, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_permissions(_path: &str, _mode: u32) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "chmod is only supported on unix hosts",
    ))
}
