//! The syscall trap vector.
//!
//! One [`SysCall`] enum with named, typed fields per call, rather than
//! raw pointer slots, since this is a hosted, memory-safe crate and not
//! binary-ABI-compatible with a real simulator. [`SysResult`] is the
//! matching typed return; the caller converts it to a documented numeric
//! wire code only at its own boundary.

use std::sync::Arc;

use crate::error::KernelError;
use crate::machine::Machine;
use crate::Kernel;

pub enum SysCall {
    Spawn {
        name: String,
        priority: u32,
        stack_size: usize,
        entry: Box<dyn FnOnce() + Send>,
    },
    Wait,
    Terminate {
        status: i32,
    },
    SemCreate {
        initial: u32,
    },
    SemP {
        handle: usize,
    },
    SemV {
        handle: usize,
    },
    GetPid,
    GetTimeOfDay,
    Sleep {
        seconds: u32,
    },
    TermRead {
        unit: usize,
        max_len: usize,
    },
    TermWrite {
        unit: usize,
        data: Vec<u8>,
    },
    DiskRead {
        unit: usize,
        track: u32,
        first_block: u32,
        num_blocks: u32,
    },
    DiskWrite {
        unit: usize,
        track: u32,
        first_block: u32,
        data: Vec<u8>,
    },
    DiskSize {
        unit: usize,
    },
}

#[derive(Debug, PartialEq)]
pub enum SysResult {
    Spawn(Result<usize, KernelError>),
    Wait(Result<(usize, i32), KernelError>),
    SemCreate(Result<usize, KernelError>),
    SemP(Result<(), KernelError>),
    SemV(Result<(), KernelError>),
    GetPid(usize),
    GetTimeOfDay(u64),
    Sleep(Result<(), KernelError>),
    TermRead(Result<Vec<u8>, KernelError>),
    TermWrite(Result<usize, KernelError>),
    DiskRead(Result<Vec<u8>, KernelError>),
    DiskWrite(Result<usize, KernelError>),
    DiskSize(Result<(u32, u32, u32), KernelError>),
}

/// The trap vector itself: one numbered dispatch covering every syscall.
/// `Terminate` never returns a [`SysResult`] because the underlying
/// kernel call never returns at all.
///
/// Every call first gives the running process a chance to preempt
/// itself if the clock driver has flagged a reschedule — the trap vector
/// is the dispatch point a process's own thread reaches regularly enough
/// to stand in for a hardware timer interrupt.
pub fn dispatch<M: Machine>(kernel: &Arc<Kernel<M>>, call: SysCall) -> SysResult {
    kernel.table.check_preempt();
    match call {
        SysCall::Spawn {
            name,
            priority,
            stack_size,
            entry,
        } => SysResult::Spawn(kernel.table.fork(&name, priority, stack_size, move || entry())),
        SysCall::Wait => SysResult::Wait(kernel.table.join()),
        SysCall::Terminate { status } => kernel.table.terminate(status),
        SysCall::SemCreate { initial } => SysResult::SemCreate(kernel.sems.create(initial)),
        SysCall::SemP { handle } => SysResult::SemP(kernel.sems.p(&kernel.table, handle)),
        SysCall::SemV { handle } => SysResult::SemV(kernel.sems.v(&kernel.table, handle)),
        SysCall::GetPid => SysResult::GetPid(kernel.table.getpid()),
        SysCall::GetTimeOfDay => SysResult::GetTimeOfDay(kernel.table.machine().current_time()),
        SysCall::Sleep { seconds } => {
            SysResult::Sleep(crate::drivers::clock::sleep(&kernel.table, &kernel.sleep_queue, seconds))
        }
        SysCall::TermRead { unit, max_len } => {
            let Some(term) = kernel.terminals.get(unit) else {
                return SysResult::TermRead(Err(KernelError::InvalidArgument));
            };
            let mut buf = vec![0u8; crate::config::MAXLINE.min(max_len.max(1))];
            let n = crate::drivers::terminal::read(&kernel.table, term, &mut buf);
            buf.truncate(n);
            SysResult::TermRead(Ok(buf))
        }
        SysCall::TermWrite { unit, data } => {
            let Some(term) = kernel.terminals.get(unit) else {
                return SysResult::TermWrite(Err(KernelError::InvalidArgument));
            };
            SysResult::TermWrite(crate::drivers::terminal::write(
                &kernel.table,
                kernel.table.machine().as_ref(),
                unit,
                term,
                &data,
            ))
        }
        SysCall::DiskRead {
            unit,
            track,
            first_block,
            num_blocks,
        } => {
            let Some(disk) = kernel.disks.get(unit) else {
                return SysResult::DiskRead(Err(KernelError::InvalidArgument));
            };
            SysResult::DiskRead(crate::drivers::disk::read(
                kernel.table.machine().as_ref(),
                unit,
                disk,
                track,
                first_block,
                num_blocks,
            ))
        }
        SysCall::DiskWrite {
            unit,
            track,
            first_block,
            data,
        } => {
            let Some(disk) = kernel.disks.get(unit) else {
                return SysResult::DiskWrite(Err(KernelError::InvalidArgument));
            };
            SysResult::DiskWrite(crate::drivers::disk::write(
                kernel.table.machine().as_ref(),
                unit,
                disk,
                track,
                first_block,
                &data,
            ))
        }
        SysCall::DiskSize { unit } => {
            if unit >= kernel.disks.len() {
                return SysResult::DiskSize(Err(KernelError::InvalidArgument));
            }
            SysResult::DiskSize(crate::drivers::disk::size(kernel.table.machine().as_ref(), unit))
        }
    }
}
