//! A hosted, testable [`Machine`] implementation.
//!
//! A bare-metal simulator saves a process's call stack into a
//! register-snapshot context and restores it with a handful of asm
//! instructions, a trick that depends on owning the stack layout directly.
//! A hosted `std` program does not get that. `SimMachine` gets the same
//! "exactly one stack runs at a time, and resuming it continues exactly
//! where it left off" property by giving every process its own OS thread
//! and handing a single cooperative run-token between them — the thread's
//! own stack *is* the saved context, the kernel never manipulates it
//! directly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread;
use std::time::Duration;

use super::{DeviceClass, DeviceError, DeviceRequest, DeviceStatus, Machine, Psr};
use crate::config::DISK_SECTOR_SIZE;

/// A one-shot/reusable run-token. `signal` marks the holder runnable and
/// wakes it; `wait_turn` parks the calling thread until it is the one
/// holding the token — the same condvar-as-wakeup shape the kernel's own
/// blocking primitives use, with exactly one waiter.
struct Baton {
    runnable: Mutex<bool>,
    cv: Condvar,
}

impl Baton {
    fn new() -> Self {
        Baton {
            runnable: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    fn signal(&self) {
        let mut guard = self.runnable.lock().unwrap();
        *guard = true;
        self.cv.notify_one();
    }

    fn wait_turn(&self) {
        let mut guard = self.runnable.lock().unwrap();
        while !*guard {
            guard = self.cv.wait(guard).unwrap();
        }
        *guard = false;
    }
}

/// Opaque context handle. Cloning is cheap (an `Arc` bump); every clone
/// refers to the same underlying thread/baton pair.
#[derive(Clone)]
pub struct SimContext {
    baton: std::sync::Arc<Baton>,
}

struct DeviceQueue {
    pending: Mutex<std::collections::VecDeque<DeviceStatus>>,
    cv: Condvar,
}

impl DeviceQueue {
    fn new() -> Self {
        DeviceQueue {
            pending: Mutex::new(std::collections::VecDeque::new()),
            cv: Condvar::new(),
        }
    }

    fn push(&self, status: DeviceStatus) {
        let mut q = self.pending.lock().unwrap();
        q.push_back(status);
        self.cv.notify_all();
    }

    fn wait_pop(&self) -> DeviceStatus {
        let mut q = self.pending.lock().unwrap();
        loop {
            if let Some(status) = q.pop_front() {
                return status;
            }
            q = self.cv.wait(q).unwrap();
        }
    }

    fn peek(&self) -> DeviceStatus {
        let q = self.pending.lock().unwrap();
        q.front().cloned().unwrap_or(DeviceStatus::Error)
    }
}

struct DiskState {
    total_tracks: u32,
    track: Mutex<u32>,
    sectors: Mutex<HashMap<(u32, u32), [u8; DISK_SECTOR_SIZE]>>,
}

/// A single simulated machine: one logical clock, `config::TERM_UNITS`
/// terminal device queues, `config::DISK_UNITS` disks, and a halt gate.
pub struct SimMachine {
    psr: Mutex<Psr>,
    clock_queue: DeviceQueue,
    term_queues: Vec<DeviceQueue>,
    disks: Vec<DiskState>,
    disk_queues: Vec<DeviceQueue>,
    logical_time: AtomicU64,
    halted: Mutex<Option<i32>>,
    halt_cv: Condvar,
    running: AtomicBool,
    next_ctx_id: AtomicUsize,
    tick_unit: Duration,
}

impl SimMachine {
    /// Build a machine whose logical clock advances one unit every
    /// `tick_unit` of real wall-clock time, and whose disks each have
    /// `tracks_per_disk` tracks. A small `tick_unit` (microseconds) keeps
    /// tests fast; production embedders driving a real simulator would
    /// not use `SimMachine` at all.
    pub fn new(tracks_per_disk: u32, tick_unit: Duration) -> Self {
        let disks = (0..crate::config::DISK_UNITS)
            .map(|_| DiskState {
                total_tracks: tracks_per_disk,
                track: Mutex::new(0),
                sectors: Mutex::new(HashMap::new()),
            })
            .collect();
        let term_queues = (0..crate::config::TERM_UNITS)
            .map(|_| DeviceQueue::new())
            .collect();
        let disk_queues = (0..crate::config::DISK_UNITS)
            .map(|_| DeviceQueue::new())
            .collect();

        let machine = SimMachine {
            psr: Mutex::new(Psr::boot()),
            clock_queue: DeviceQueue::new(),
            term_queues,
            disks,
            disk_queues,
            logical_time: AtomicU64::new(0),
            halted: Mutex::new(None),
            halt_cv: Condvar::new(),
            running: AtomicBool::new(true),
            next_ctx_id: AtomicUsize::new(0),
            tick_unit,
        };
        machine
    }

    /// A machine tuned for unit tests: fast clock, 2 tracks/disk.
    pub fn for_tests() -> std::sync::Arc<Self> {
        let machine = std::sync::Arc::new(SimMachine::new(4, Duration::from_micros(200)));
        machine.clone().spawn_clock_ticker();
        machine
    }

    fn spawn_clock_ticker(self: std::sync::Arc<Self>) {
        let machine = self;
        thread::spawn(move || loop {
            if !machine.running.load(Ordering::Acquire) {
                return;
            }
            thread::sleep(machine.tick_unit);
            // `current_time()` counts clock-device ticks directly, so the
            // dispatcher's time-slice check and `sleep`'s wakeup math share
            // one unit rather than a separate wall-clock time source.
            machine.logical_time.fetch_add(1, Ordering::AcqRel);
            machine.clock_queue.push(DeviceStatus::ClockTick);
        });
    }

    fn disk(&self, unit: usize) -> Result<&DiskState, DeviceError> {
        self.disks.get(unit).ok_or(DeviceError::NoSuchUnit)
    }

    fn term(&self, unit: usize) -> Result<&DeviceQueue, DeviceError> {
        self.term_queues.get(unit).ok_or(DeviceError::NoSuchUnit)
    }

    /// Simulate a character arriving on a terminal's receive line. Real
    /// hardware delivers this as an interrupt the kernel never has to
    /// manufacture itself; a software simulator has no keyboard behind
    /// it, so embedders (and this crate's own tests) call this directly
    /// to drive `drivers::terminal`'s read path. Not part of the
    /// `Machine` trait proper — the same bootstrap-convenience role
    /// `wait_for_halt` plays.
    pub fn inject_terminal_input(&self, unit: usize, byte: u8) -> Result<(), DeviceError> {
        self.term(unit)?.push(DeviceStatus::TermRecv(byte));
        Ok(())
    }
}

impl Machine for SimMachine {
    type Context = SimContext;

    fn context_init(&self, entry: Box<dyn FnOnce() + Send + 'static>) -> Self::Context {
        let baton = std::sync::Arc::new(Baton::new());
        let thread_baton = baton.clone();
        let _id = self.next_ctx_id.fetch_add(1, Ordering::Relaxed);
        thread::Builder::new()
            .name(format!("proc-{_id}"))
            .spawn(move || {
                thread_baton.wait_turn();
                entry();
                // A trampoline that returns without quitting leaves this
                // thread simply exit; the process's bookkeeping (if any is
                // still live) was already torn down by whatever called
                // quit(), and the next switch into this baton never comes.
            })
            .expect("failed to spawn process thread");
        SimContext { baton }
    }

    fn context_switch(&self, old: Option<&Self::Context>, new: &Self::Context) {
        new.baton.signal();
        if let Some(old) = old {
            old.baton.wait_turn();
        }
    }

    fn psr_get(&self) -> Psr {
        *self.psr.lock().unwrap()
    }

    fn psr_set(&self, psr: Psr) {
        *self.psr.lock().unwrap() = psr;
    }

    fn device_output(
        &self,
        class: DeviceClass,
        unit: usize,
        request: DeviceRequest,
    ) -> Result<(), DeviceError> {
        match (class, request) {
            (DeviceClass::Terminal, DeviceRequest::TermSetInterrupts { xmit, .. }) => {
                let q = self.term(unit)?;
                if xmit {
                    q.push(DeviceStatus::TermXmitReady);
                }
                Ok(())
            }
            (DeviceClass::Terminal, DeviceRequest::TermTransmit(_ch)) => {
                let q = self.term(unit)?;
                q.push(DeviceStatus::TermXmitReady);
                Ok(())
            }
            (DeviceClass::Disk, DeviceRequest::DiskSeek(track)) => {
                let disk = self.disk(unit)?;
                if track >= disk.total_tracks {
                    self.push_disk_status(unit, DeviceStatus::Error)?;
                } else {
                    *disk.track.lock().unwrap() = track;
                    self.push_disk_status(unit, DeviceStatus::DiskComplete)?;
                }
                Ok(())
            }
            (DeviceClass::Disk, DeviceRequest::DiskRead { block }) => {
                let disk = self.disk(unit)?;
                let track = *disk.track.lock().unwrap();
                let sector = disk
                    .sectors
                    .lock()
                    .unwrap()
                    .get(&(track, block))
                    .copied()
                    .unwrap_or([0u8; DISK_SECTOR_SIZE]);
                self.push_disk_status(unit, DeviceStatus::DiskSector(Box::new(sector)))?;
                Ok(())
            }
            (DeviceClass::Disk, DeviceRequest::DiskWrite { block, sector }) => {
                let disk = self.disk(unit)?;
                let track = *disk.track.lock().unwrap();
                disk.sectors.lock().unwrap().insert((track, block), sector);
                self.push_disk_status(unit, DeviceStatus::DiskComplete)?;
                Ok(())
            }
            (DeviceClass::Disk, DeviceRequest::DiskGeometry) => {
                let disk = self.disk(unit)?;
                self.push_disk_status(
                    unit,
                    DeviceStatus::DiskGeometry {
                        total_tracks: disk.total_tracks,
                    },
                )?;
                Ok(())
            }
            _ => Err(DeviceError::NoSuchUnit),
        }
    }

    fn device_input(&self, class: DeviceClass, unit: usize) -> DeviceStatus {
        match class {
            DeviceClass::Clock => self.clock_queue.peek(),
            DeviceClass::Terminal => self
                .term_queues
                .get(unit)
                .map(DeviceQueue::peek)
                .unwrap_or(DeviceStatus::Error),
            DeviceClass::Disk => DeviceStatus::Error,
        }
    }

    fn wait_device(&self, class: DeviceClass, unit: usize) -> DeviceStatus {
        match class {
            DeviceClass::Clock => self.clock_queue.wait_pop(),
            DeviceClass::Terminal => self
                .term_queues
                .get(unit)
                .map(DeviceQueue::wait_pop)
                .unwrap_or(DeviceStatus::Error),
            DeviceClass::Disk => self
                .disk_queue(unit)
                .map(DeviceQueue::wait_pop)
                .unwrap_or(DeviceStatus::Error),
        }
    }

    fn halt(&self, code: i32) -> ! {
        {
            let mut halted = self.halted.lock().unwrap();
            if halted.is_none() {
                *halted = Some(code);
            }
        }
        self.running.store(false, Ordering::Release);
        self.halt_cv.notify_all();
        loop {
            thread::park();
        }
    }

    fn current_time(&self) -> u64 {
        self.logical_time.load(Ordering::Acquire)
    }

    fn wait_for_halt(&self) -> i32 {
        let mut halted = self.halted.lock().unwrap();
        while halted.is_none() {
            halted = self.halt_cv.wait(halted).unwrap();
        }
        halted.unwrap()
    }
}

// Disks need their own completion queues (parallel to `term_queues`), kept
// in a side table keyed by unit since `DeviceClass::Disk` shares no state
// with terminals or the clock.
impl SimMachine {
    fn disk_queue(&self, unit: usize) -> Option<&DeviceQueue> {
        self.disk_queues.get(unit)
    }

    fn push_disk_status(&self, unit: usize, status: DeviceStatus) -> Result<(), DeviceError> {
        self.disk_queues
            .get(unit)
            .ok_or(DeviceError::NoSuchUnit)?
            .push(status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

    #[test]
    fn context_switch_runs_entry_and_returns_control() {
        let machine = Arc::new(SimMachine::new(4, Duration::from_micros(200)));
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let boot = SimContext {
            baton: Arc::new(Baton::new()),
        };
        let ctx = machine.context_init(Box::new(move || {
            c.store(1, AtomicOrdering::SeqCst);
        }));
        machine.context_switch(None, &ctx);
        // Give the spawned thread a moment to run; it signals nothing back
        // to us since it never calls context_switch(Some(&ctx), ...).
        thread::sleep(Duration::from_millis(20));
        assert_eq!(counter.load(AtomicOrdering::SeqCst), 1);
        drop(boot);
    }

    #[test]
    fn halt_unblocks_wait_for_halt() {
        let machine = Arc::new(SimMachine::new(4, Duration::from_micros(200)));
        let m = machine.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            m.halt(7);
        });
        assert_eq!(machine.wait_for_halt(), 7);
    }

    #[test]
    fn disk_write_then_read_round_trips() {
        let machine = SimMachine::new(4, Duration::from_micros(200));
        machine
            .device_output(DeviceClass::Disk, 0, DeviceRequest::DiskSeek(1))
            .unwrap();
        assert_eq!(
            machine.wait_device(DeviceClass::Disk, 0),
            DeviceStatus::DiskComplete
        );
        let mut sector = [0u8; DISK_SECTOR_SIZE];
        sector[0] = 42;
        machine
            .device_output(DeviceClass::Disk, 0, DeviceRequest::DiskWrite { block: 0, sector })
            .unwrap();
        assert_eq!(
            machine.wait_device(DeviceClass::Disk, 0),
            DeviceStatus::DiskComplete
        );
        machine
            .device_output(DeviceClass::Disk, 0, DeviceRequest::DiskRead { block: 0 })
            .unwrap();
        match machine.wait_device(DeviceClass::Disk, 0) {
            DeviceStatus::DiskSector(sector) => assert_eq!(sector[0], 42),
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[test]
    fn disk_seek_past_geometry_errors() {
        let machine = SimMachine::new(4, Duration::from_micros(200));
        machine
            .device_output(DeviceClass::Disk, 0, DeviceRequest::DiskSeek(99))
            .unwrap();
        assert_eq!(
            machine.wait_device(DeviceClass::Disk, 0),
            DeviceStatus::Error
        );
    }
}
