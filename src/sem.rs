//! Counting semaphores.
//!
//! A process genuinely waiting on a contended semaphore must release the
//! dispatcher's baton so some other process can run and eventually post to
//! it. Blocking a process's OS thread directly on a condition variable
//! can't do that: bypassing `proc::Table::block` never re-enters the
//! dispatcher, so nobody else in the table ever runs again. `p`/`v` take
//! the process table as a parameter and call `block`/`unblock` on it, the
//! same shape `drivers::clock::sleep` uses for the sleep queue.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::config::MAXSEMS;
use crate::error::KernelError;
use crate::machine::Machine;
use crate::proc::Table as ProcTable;

struct Semaphore {
    count: Mutex<Option<u32>>,
    waiters: Mutex<VecDeque<usize>>,
}

impl Semaphore {
    fn unused() -> Self {
        Semaphore {
            count: Mutex::new(None),
            waiters: Mutex::new(VecDeque::new()),
        }
    }
}

/// The semaphore table, indexed by handle.
pub struct Table {
    slots: Vec<Semaphore>,
}

impl Table {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAXSEMS);
        for _ in 0..MAXSEMS {
            slots.push(Semaphore::unused());
        }
        Table { slots }
    }

    /// Allocate a slot with the given initial count. `-1` if the table is
    /// full.
    pub fn create(&self, initial: u32) -> Result<usize, KernelError> {
        for (handle, sem) in self.slots.iter().enumerate() {
            let mut count = sem.count.lock().unwrap();
            if count.is_none() {
                *count = Some(initial);
                return Ok(handle);
            }
        }
        Err(KernelError::SemTableFull)
    }

    /// `semP`: block while the count is zero, then decrement. Like
    /// `join`'s retry loop, a woken waiter re-checks the count rather
    /// than assuming it owns the token a matching `v` posted.
    pub fn p<M: Machine>(&self, proc_table: &Arc<ProcTable<M>>, handle: usize) -> Result<(), KernelError> {
        let sem = self.slots.get(handle).ok_or(KernelError::InvalidArgument)?;
        loop {
            let slot = proc_table.running().expect("semP called outside a process");
            {
                let mut count = sem.count.lock().unwrap();
                match *count {
                    None => return Err(KernelError::InvalidArgument),
                    Some(0) => sem.waiters.lock().unwrap().push_back(slot),
                    Some(n) => {
                        *count = Some(n - 1);
                        return Ok(());
                    }
                }
            }
            proc_table.block(slot);
        }
    }

    /// `semV`: increment the count and wake the longest-waiting blocked
    /// process, if any.
    pub fn v<M: Machine>(&self, proc_table: &Arc<ProcTable<M>>, handle: usize) -> Result<(), KernelError> {
        let sem = self.slots.get(handle).ok_or(KernelError::InvalidArgument)?;
        let mut count = sem.count.lock().unwrap();
        match *count {
            None => Err(KernelError::InvalidArgument),
            Some(n) => {
                *count = Some(n + 1);
                drop(count);
                if let Some(waiter) = sem.waiters.lock().unwrap().pop_front() {
                    proc_table.unblock(waiter);
                }
                Ok(())
            }
        }
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::sim::SimMachine;
    use std::time::Duration;

    fn machine() -> Arc<SimMachine> {
        let _ = env_logger::try_init();
        SimMachine::for_tests()
    }

    #[test]
    fn p_blocks_until_v() {
        let machine = machine();
        let proc_table = ProcTable::new(machine.clone());
        let sems = Arc::new(Table::new());
        let handle = sems.create(0).unwrap();

        let pt = proc_table.clone();
        let s = sems.clone();
        proc_table.boot("init", move || {
            let pt2 = pt.clone();
            let s2 = s.clone();
            pt.fork("waker", 3, crate::config::MIN_STACK, move || {
                std::thread::sleep(Duration::from_millis(10));
                s2.v(&pt2, handle).unwrap();
            })
            .unwrap();
            s.p(&pt, handle).unwrap();
            pt.machine().halt(0);
        });
        assert_eq!(machine.wait_for_halt(), 0);
    }

    #[test]
    fn create_respects_initial_count() {
        let machine = machine();
        let proc_table = ProcTable::new(machine.clone());
        let sems = Arc::new(Table::new());
        let handle = sems.create(2).unwrap();

        let pt = proc_table.clone();
        let s = sems.clone();
        proc_table.boot("init", move || {
            s.p(&pt, handle).unwrap();
            s.p(&pt, handle).unwrap();
            // count is now 0; a V must precede any further P for it to
            // proceed without blocking forever.
            s.v(&pt, handle).unwrap();
            s.p(&pt, handle).unwrap();
            pt.machine().halt(0);
        });
        assert_eq!(machine.wait_for_halt(), 0);
    }

    #[test]
    fn invalid_handle_errors() {
        let machine = machine();
        let proc_table = ProcTable::new(machine.clone());
        let sems = Arc::new(Table::new());

        let pt = proc_table.clone();
        let s = sems.clone();
        proc_table.boot("init", move || {
            assert_eq!(s.p(&pt, 0), Err(KernelError::InvalidArgument));
            pt.machine().halt(0);
        });
        assert_eq!(machine.wait_for_halt(), 0);
    }
}
