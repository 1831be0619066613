//! The process table and dispatcher: a fixed-slot table, six
//! fixed-priority ready queues, and fork/join/quit/zap lifecycle calls.

pub mod queue;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use log::{info, warn};

use crate::config::{INIT_PRIORITY, MAXNAME, MAXPROC, MIN_STACK, TIME_SLICE};
use crate::error::{Fatal, KernelError};
use crate::machine::{Machine, Psr};
use queue::PriorityQueues;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcStatus {
    Unused,
    Runnable,
    Running,
    Blocked,
    /// Terminated but not yet reaped by a parent's `join`.
    Quit(i32),
}

struct Pcb<M: Machine> {
    pid: usize,
    name: String,
    priority: u32,
    status: ProcStatus,
    context: Option<M::Context>,
    parent: Option<usize>,
    /// Slots of living children, oldest first.
    children: Vec<usize>,
    /// Slots of dead children awaiting reap, in the order they quit.
    dead_children: VecDeque<usize>,
    /// Slots of processes blocked inside `zap(self)`, woken on quit.
    zappers: Vec<usize>,
}

impl<M: Machine> Pcb<M> {
    fn empty() -> Self {
        Pcb {
            pid: 0,
            name: String::new(),
            priority: 0,
            status: ProcStatus::Unused,
            context: None,
            parent: None,
            children: Vec::new(),
            dead_children: VecDeque::new(),
            zappers: Vec::new(),
        }
    }
}

struct Shared<M: Machine> {
    slots: Vec<Pcb<M>>,
    queues: PriorityQueues,
    current: Option<usize>,
}

/// The process table. One per kernel instance; `fork`'d processes each
/// get their own OS thread via `Machine::context_init`, but every
/// scheduling decision is serialized through `shared`.
pub struct Table<M: Machine> {
    machine: Arc<M>,
    shared: Mutex<Shared<M>>,
    next_pid: AtomicUsize,
    last_switch: Mutex<u64>,
    /// Set by the clock driver thread when the running process has
    /// overrun its time slice; cleared and acted on by that process
    /// itself at its next trap-vector entry. Never causes a context
    /// switch from the thread that sets it.
    preempt_pending: AtomicBool,
}

impl<M: Machine> Table<M> {
    pub fn new(machine: Arc<M>) -> Arc<Self> {
        let mut slots = Vec::with_capacity(MAXPROC);
        for _ in 0..MAXPROC {
            slots.push(Pcb::empty());
        }
        Arc::new(Table {
            machine,
            shared: Mutex::new(Shared {
                slots,
                queues: PriorityQueues::new(),
                current: None,
            }),
            next_pid: AtomicUsize::new(1),
            last_switch: Mutex::new(0),
            preempt_pending: AtomicBool::new(false),
        })
    }

    pub fn machine(&self) -> &Arc<M> {
        &self.machine
    }

    /// The slot of the currently running process, if any.
    pub fn running(&self) -> Option<usize> {
        self.shared.lock().unwrap().current
    }

    pub fn pid_of(&self, slot: usize) -> usize {
        self.shared.lock().unwrap().slots[slot].pid
    }

    /// Boot the kernel: install `init` (priority
    /// [`crate::config::INIT_PRIORITY`], pid 1) and switch into it. The
    /// calling thread is not itself a process and returns immediately —
    /// callers typically follow up with `table.machine().wait_for_halt()`.
    pub fn boot(self: &Arc<Self>, name: &str, entry: impl FnOnce() + Send + 'static) {
        self.spawn_slot(name, INIT_PRIORITY, MIN_STACK, None, entry)
            .expect("process table has room for init");
        self.dispatch();
    }

    /// Allocate a slot, build a trampoline-wrapped context, and make the
    /// child runnable. Does not itself switch to it — the caller keeps
    /// running until the next dispatch point.
    pub fn fork(
        self: &Arc<Self>,
        name: &str,
        priority: u32,
        stack_size: usize,
        entry: impl FnOnce() + Send + 'static,
    ) -> Result<usize, KernelError> {
        if !(1..INIT_PRIORITY).contains(&priority) {
            return Err(KernelError::InvalidArgument);
        }
        let parent = self.running();
        let slot = self.spawn_slot(name, priority, stack_size, parent, entry)?;
        if let Some(parent) = parent {
            let mut shared = self.shared.lock().unwrap();
            shared.slots[parent].children.push(slot);
        }
        let pid = self.shared.lock().unwrap().slots[slot].pid;
        info!("fork: pid {pid} ({name}) priority {priority}");
        // The parent is still runnable — re-enqueue it before dispatching
        // so it isn't lost, the same voluntary-yield path `yield_now`
        // uses. A higher-priority child then runs immediately; otherwise
        // the parent keeps going.
        self.yield_now();
        Ok(pid)
    }

    fn spawn_slot(
        self: &Arc<Self>,
        name: &str,
        priority: u32,
        stack_size: usize,
        parent: Option<usize>,
        entry: impl FnOnce() + Send + 'static,
    ) -> Result<usize, KernelError> {
        if name.len() >= MAXNAME {
            return Err(KernelError::InvalidArgument);
        }
        if stack_size < MIN_STACK {
            return Err(KernelError::StackTooSmall);
        }

        let slot = {
            let shared = self.shared.lock().unwrap();
            (0..MAXPROC).find(|&s| shared.slots[s].status == ProcStatus::Unused)
        };
        let Some(slot) = slot else {
            warn!("fork: process table full");
            return Err(KernelError::TableFull);
        };

        let pid = self.next_pid.fetch_add(1, Ordering::Relaxed);
        let table = self.clone();
        let name_owned = name.to_string();
        let trampoline_name = name_owned.clone();
        let context = self.machine.context_init(Box::new(move || {
            let mut psr = table.machine.psr_get();
            psr.remove(Psr::KERNEL_MODE);
            psr.insert(Psr::INTERRUPTS_ENABLED);
            table.machine.psr_set(psr);
            entry();
            // `testcase_main` falling off the end of its entry means the
            // test case is done with the whole machine, not just itself —
            // halt rather than quit so it doesn't get reaped like an
            // ordinary child.
            if trampoline_name == "testcase_main" {
                table.machine.halt(0);
            }
            // Any other trampoline body that returns implies the process
            // forgot to call `terminate`/`quit`; treat that as
            // terminating with status 0.
            table.quit(slot, 0, &trampoline_name);
        }));

        let mut shared = self.shared.lock().unwrap();
        shared.slots[slot] = Pcb {
            pid,
            name: name_owned,
            priority,
            status: ProcStatus::Runnable,
            context: Some(context),
            parent,
            children: Vec::new(),
            dead_children: VecDeque::new(),
            zappers: Vec::new(),
        };
        shared.queues.push_back(priority, slot);
        Ok(slot)
    }

    /// Reap one dead child, blocking if none has died yet. `-2` if the
    /// caller has no children at all, living or dead.
    pub fn join(self: &Arc<Self>) -> Result<(usize, i32), KernelError> {
        let caller = self.running().expect("join called outside a process");
        loop {
            {
                let mut shared = self.shared.lock().unwrap();
                if let Some(child) = shared.slots[caller].dead_children.pop_front() {
                    let pid = shared.slots[child].pid;
                    let status = match shared.slots[child].status {
                        ProcStatus::Quit(code) => code,
                        _ => unreachable!("dead_children only holds quit()'d slots"),
                    };
                    shared.slots[child] = Pcb::empty();
                    return Ok((pid, status));
                }
                if shared.slots[caller].children.is_empty() {
                    return Err(KernelError::NoChildren);
                }
            }
            self.block(caller);
        }
    }

    /// Fatal if children remain, otherwise splice out of the parent's
    /// living-children list onto its dead-children list, wake a joining
    /// parent and every zapper, then dispatch away. `quit` never returns
    /// to its caller — the trampoline that invokes it is the last thing
    /// that slot's OS thread ever runs.
    fn quit(self: &Arc<Self>, slot: usize, status: i32, name: &str) -> ! {
        {
            let shared = self.shared.lock().unwrap();
            if !shared.slots[slot].children.is_empty() {
                self.fatal(Fatal::QuitWithChildren);
            }
        }

        let (parent, zappers, pid) = {
            let mut shared = self.shared.lock().unwrap();
            shared.slots[slot].status = ProcStatus::Quit(status);
            let parent = shared.slots[slot].parent;
            if let Some(parent) = parent {
                shared.slots[parent].children.retain(|&c| c != slot);
                shared.slots[parent].dead_children.push_back(slot);
            }
            let zappers = std::mem::take(&mut shared.slots[slot].zappers);
            (parent, zappers, shared.slots[slot].pid)
        };

        info!("quit: pid {pid} ({name}) status {status}");

        if let Some(parent) = parent {
            self.unblock(parent);
        }
        for zapper in zappers {
            self.unblock(zapper);
        }

        self.dispatch();
        unreachable!("dispatch() always switches away from a quitting process");
    }

    /// Block the caller until `target_pid` quits. A target that is
    /// already dead at the moment `zap` is called (as opposed to dying
    /// while the caller waits on it) is misuse, reported immediately
    /// rather than treated as a normal wakeup — the two cases land on the
    /// same `Quit` status and are only distinguishable by whether the
    /// caller has blocked here yet.
    pub fn zap(self: &Arc<Self>, target_pid: usize) -> Result<(), Fatal> {
        let caller = self.running().expect("zap called outside a process");
        let caller_pid = self.pid_of(caller);
        if target_pid == caller_pid {
            return Err(Fatal::ZapSelf);
        }

        let target_slot = {
            let shared = self.shared.lock().unwrap();
            (0..MAXPROC).find(|&s| {
                shared.slots[s].pid == target_pid && shared.slots[s].status != ProcStatus::Unused
            })
        };
        let Some(target_slot) = target_slot else {
            return Err(Fatal::ZapNonExistent);
        };
        if target_pid == 1 {
            return Err(Fatal::ZapInit);
        }
        if matches!(self.shared.lock().unwrap().slots[target_slot].status, ProcStatus::Quit(_)) {
            return Err(Fatal::ZapAlreadyDying);
        }

        loop {
            {
                let mut shared = self.shared.lock().unwrap();
                match shared.slots[target_slot].status {
                    ProcStatus::Quit(_) | ProcStatus::Unused => return Ok(()),
                    _ => {
                        if !shared.slots[target_slot].zappers.contains(&caller) {
                            shared.slots[target_slot].zappers.push(caller);
                        }
                    }
                }
            }
            self.block(caller);
        }
    }

    pub fn getpid(&self) -> usize {
        self.pid_of(self.running().expect("getpid called outside a process"))
    }

    /// Reap every child (blocking as needed, same as repeated `join`)
    /// and then quit with `status`.
    pub fn terminate(self: &Arc<Self>, status: i32) -> ! {
        let slot = self.running().expect("terminate called outside a process");
        let name = self.shared.lock().unwrap().slots[slot].name.clone();
        loop {
            match self.join() {
                Ok(_) => continue,
                Err(KernelError::NoChildren) => break,
                Err(_) => break,
            }
        }
        self.quit(slot, status, &name);
    }

    /// Mark `slot` blocked and dispatch away. Resumed only by a matching
    /// [`Table::unblock`] followed by a later dispatch.
    pub fn block(self: &Arc<Self>, slot: usize) {
        {
            let mut shared = self.shared.lock().unwrap();
            shared.slots[slot].status = ProcStatus::Blocked;
        }
        self.dispatch();
    }

    /// Make a blocked process runnable again. Does not itself switch to
    /// it, so it's safe to call from any thread, including a device
    /// driver's.
    pub fn unblock(&self, slot: usize) {
        let mut shared = self.shared.lock().unwrap();
        if shared.slots[slot].status == ProcStatus::Blocked {
            shared.slots[slot].status = ProcStatus::Runnable;
            let priority = shared.slots[slot].priority;
            shared.queues.push_back(priority, slot);
        }
    }

    /// Called by the clock driver on every tick: if the running process
    /// has held the CPU for at least [`TIME_SLICE`] simulator time units,
    /// flag a reschedule as pending. The clock driver runs on its own
    /// background thread, not as a process — it holds no baton and must
    /// never switch contexts itself, so this only ever sets a flag. The
    /// running process notices and rotates itself to the back of its
    /// priority queue the next time it reaches [`Table::check_preempt`].
    pub fn maybe_preempt(&self) {
        let expired = {
            let last = *self.last_switch.lock().unwrap();
            self.machine.current_time().saturating_sub(last) >= TIME_SLICE
        };
        if expired {
            self.preempt_pending.store(true, Ordering::Relaxed);
        }
    }

    /// Consumed by the running process at its own trap-vector entry: if
    /// a reschedule was requested since its last dispatch, yield the CPU
    /// before handling the call that triggered this check.
    pub fn check_preempt(self: &Arc<Self>) {
        if self.preempt_pending.swap(false, Ordering::Relaxed) {
            self.yield_now();
        }
    }

    /// Voluntarily give up the CPU without blocking: re-enqueue at the
    /// caller's own priority and dispatch.
    pub fn yield_now(self: &Arc<Self>) {
        let slot = self.running().expect("yield_now called outside a process");
        {
            let mut shared = self.shared.lock().unwrap();
            shared.slots[slot].status = ProcStatus::Runnable;
            let priority = shared.slots[slot].priority;
            shared.queues.push_back(priority, slot);
        }
        self.dispatch();
    }

    /// The dispatcher: pick the highest-urgency runnable slot and switch
    /// the CPU to it, scanning priorities 1..=6 in order with no special
    /// case for any one priority.
    fn dispatch(self: &Arc<Self>) {
        let (next_slot, next_ctx) = loop {
            let mut shared = self.shared.lock().unwrap();
            if let Some((slot, _priority)) = shared.queues.pop_front_highest() {
                shared.slots[slot].status = ProcStatus::Running;
                let ctx = shared.slots[slot].context.clone().unwrap();
                break (slot, ctx);
            }
            // No runnable process at all (every slot blocked or quit
            // awaiting reap): spin the lock briefly. A correct kernel
            // always has at least `init` runnable or about to be, so
            // this only transiently triggers between two dispatch
            // points.
            drop(shared);
            std::thread::yield_now();
        };

        let old_slot = {
            let mut shared = self.shared.lock().unwrap();
            let old = shared.current;
            shared.current = Some(next_slot);
            old
        };
        let old_ctx = old_slot.and_then(|s| {
            let shared = self.shared.lock().unwrap();
            shared.slots[s].context.clone()
        });

        *self.last_switch.lock().unwrap() = self.machine.current_time();
        self.machine.context_switch(old_ctx.as_ref(), &next_ctx);
    }

    fn fatal(&self, reason: Fatal) -> ! {
        log::error!("fatal: {reason}");
        self.machine.halt(1);
    }

    /// A fixed-width table of every live process, for diagnostic output.
    pub fn dump_processes(&self) -> String {
        let shared = self.shared.lock().unwrap();
        let mut out = String::from(" PID  PPID  NAME                 PRIORITY  STATE\n");
        for pcb in shared.slots.iter() {
            if pcb.status == ProcStatus::Unused {
                continue;
            }
            let ppid = pcb
                .parent
                .map(|p| shared.slots[p].pid.to_string())
                .unwrap_or_else(|| "-".to_string());
            let state = match pcb.status {
                ProcStatus::Unused => unreachable!(),
                ProcStatus::Runnable => "Ready".to_string(),
                ProcStatus::Running => "Running".to_string(),
                ProcStatus::Blocked => "Blocked".to_string(),
                ProcStatus::Quit(code) => format!("Quit({code})"),
            };
            out.push_str(&format!(
                "{:>4}  {:>4}  {:<20} {:>8}  {}\n",
                pcb.pid, ppid, pcb.name, pcb.priority, state
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::sim::SimMachine;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn machine() -> Arc<SimMachine> {
        let _ = env_logger::try_init();
        SimMachine::for_tests()
    }

    #[test]
    fn fork_then_join_reaps_exit_status() {
        let machine = machine();
        let table = Table::new(machine.clone());
        let t2 = table.clone();
        table.boot("init", move || {
            let t3 = t2.clone();
            t2.fork("child", 3, MIN_STACK, move || {
                let _ = t3;
            })
            .unwrap();
            let (_pid, status) = t2.join().unwrap();
            assert_eq!(status, 0);
            t2.machine().halt(0);
        });
        assert_eq!(machine.wait_for_halt(), 0);
    }

    #[test]
    fn join_with_no_children_errors() {
        let machine = machine();
        let table = Table::new(machine.clone());
        let t2 = table.clone();
        table.boot("init", move || {
            assert_eq!(t2.join(), Err(KernelError::NoChildren));
            t2.machine().halt(0);
        });
        assert_eq!(machine.wait_for_halt(), 0);
    }

    #[test]
    fn fork_rejects_reserved_init_priority() {
        let machine = machine();
        let table = Table::new(machine.clone());
        let t2 = table.clone();
        table.boot("init", move || {
            let result = t2.fork("sneaky", INIT_PRIORITY, MIN_STACK, || {});
            assert_eq!(result, Err(KernelError::InvalidArgument));
            t2.machine().halt(0);
        });
        assert_eq!(machine.wait_for_halt(), 0);
    }

    #[test]
    fn zap_blocks_until_target_quits() {
        let machine = machine();
        let table = Table::new(machine.clone());
        let t2 = table.clone();
        let done = Arc::new(AtomicU32::new(0));
        let done2 = done.clone();
        table.boot("init", move || {
            let t3 = t2.clone();
            let child_pid = t2
                .fork("child", 3, MIN_STACK, move || {
                    std::thread::sleep(Duration::from_millis(5));
                    let _ = &t3;
                })
                .unwrap();
            t2.zap(child_pid).unwrap();
            done2.store(1, std::sync::atomic::Ordering::SeqCst);
            let _ = t2.join();
            t2.machine().halt(0);
        });
        assert_eq!(machine.wait_for_halt(), 0);
        assert_eq!(done.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
