//! The clock driver: a background service loop that, on every tick,
//! increments the clock, wakes any process whose sleep has expired, and
//! flags a reschedule if the running process has overrun its time slice.

use std::sync::{Arc, Mutex};

use crate::config::TICKS_PER_SECOND;
use crate::error::KernelError;
use crate::machine::{DeviceClass, DeviceStatus, Machine};
use crate::proc::Table;

/// Processes parked in `sleep`, ordered by wakeup tick. A `Vec` kept
/// sorted on insert, so the earliest wakeup is always at the front.
pub struct SleepQueue {
    entries: Mutex<Vec<(u64, usize)>>,
}

impl SleepQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(SleepQueue {
            entries: Mutex::new(Vec::new()),
        })
    }

    fn insert(&self, wake_at: u64, slot: usize) {
        let mut entries = self.entries.lock().unwrap();
        let pos = entries.partition_point(|&(w, _)| w <= wake_at);
        entries.insert(pos, (wake_at, slot));
    }

    fn drain_ready(&self, now: u64) -> Vec<usize> {
        let mut entries = self.entries.lock().unwrap();
        let split = entries.partition_point(|&(w, _)| w <= now);
        entries.drain(..split).map(|(_, slot)| slot).collect()
    }
}

/// Block the caller until `seconds` simulated seconds have elapsed.
/// Negative durations are rejected at the trap boundary; the argument is
/// unsigned here.
pub fn sleep<M: Machine>(table: &Arc<Table<M>>, queue: &SleepQueue, seconds: u32) -> Result<(), KernelError> {
    let slot = table.running().ok_or(KernelError::InvalidArgument)?;
    let wake_at = table.machine().current_time() + seconds as u64 * TICKS_PER_SECOND;
    queue.insert(wake_at, slot);
    table.block(slot);
    Ok(())
}

/// The driver's service loop — run on its own background thread at
/// boot, not as a table process (see `crate::boot`). Never returns;
/// intended to run for the lifetime of the machine.
///
/// This thread owns no baton and is not itself a process, so it must
/// never switch contexts or otherwise drive the dispatcher directly —
/// `table.maybe_preempt()` only raises a flag; the process actually
/// running notices and yields itself the next time it reaches the trap
/// vector.
pub fn run<M: Machine>(table: Arc<Table<M>>, queue: Arc<SleepQueue>) {
    loop {
        if let DeviceStatus::ClockTick = table.machine().wait_device(DeviceClass::Clock, 0) {
            let now = table.machine().current_time();
            for slot in queue.drain_ready(now) {
                table.unblock(slot);
            }
            table.maybe_preempt();
        }
    }
}
