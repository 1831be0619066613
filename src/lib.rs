//! A hosted, educational kernel: a fixed-slot process table with a
//! six-priority round-robin dispatcher, mailboxes as a general blocking
//! primitive, a user-mode runtime of spawn/wait/terminate and counting
//! semaphores, and clock, terminal, and disk drivers.
//!
//! The "machine" — context switching, the PSR, device interrupts — is
//! consumed through the [`machine::Machine`] trait rather than owned
//! directly; [`machine::sim::SimMachine`] is this crate's own hosted
//! reference implementation, used throughout its tests.

pub mod config;
pub mod drivers;
pub mod error;
pub mod machine;
pub mod mailbox;
pub mod proc;
pub mod runtime;
pub mod sem;

use std::sync::Arc;

use machine::Machine;

/// Everything the trap vector needs: the process table, the semaphore
/// table, and the per-device state the drivers own. One `Kernel` per
/// booted machine.
pub struct Kernel<M: Machine> {
    pub table: Arc<proc::Table<M>>,
    pub sems: Arc<sem::Table>,
    pub sleep_queue: Arc<drivers::clock::SleepQueue>,
    pub terminals: Vec<Arc<drivers::terminal::Terminal>>,
    pub disks: Vec<drivers::disk::Disk>,
}

impl<M: Machine> Kernel<M> {
    fn new(machine: Arc<M>) -> Arc<Self> {
        Arc::new(Kernel {
            table: proc::Table::new(machine),
            sems: Arc::new(sem::Table::new()),
            sleep_queue: drivers::clock::SleepQueue::new(),
            terminals: (0..config::TERM_UNITS).map(|_| drivers::terminal::Terminal::new()).collect(),
            disks: (0..config::DISK_UNITS).map(|_| drivers::disk::Disk::new()).collect(),
        })
    }
}

/// Boot a kernel on top of `machine`: start the clock driver and one
/// terminal driver per unit, then fork and switch into `init` (priority
/// [`config::INIT_PRIORITY`]) running `init_entry`. Process table and
/// queues come up first, then the device drivers, then the user-visible
/// `init`.
///
/// Drivers are NOT processes in [`proc::Table`]'s sense. `Machine::wait_device`
/// blocks its caller's raw OS thread directly rather than going through
/// `context_switch`, so a driver waiting on it never hands the
/// dispatcher's baton to anyone else; running it as the highest-priority
/// table entry starves every other process, since a driver's own
/// `yield_now` just re-enqueues it at the front of its own queue and the
/// dispatcher immediately picks it again. Drivers instead run as free
/// background threads that reach into the table only through its
/// thread-safe primitives (`unblock`, `maybe_preempt`), the same surface
/// a real interrupt handler would touch without itself being a
/// scheduled process.
///
/// Returns the [`Kernel`] handle; the caller drives the machine forward
/// with `kernel.table.machine().wait_for_halt()`.
pub fn boot<M: Machine>(
    machine: Arc<M>,
    init_entry: impl FnOnce(Arc<Kernel<M>>) + Send + 'static,
) -> Arc<Kernel<M>> {
    let kernel = Kernel::new(machine);

    {
        let table_for_driver = kernel.table.clone();
        let queue = kernel.sleep_queue.clone();
        std::thread::Builder::new()
            .name("clock_driver".into())
            .spawn(move || drivers::clock::run(table_for_driver, queue))
            .expect("clock driver thread spawns at boot");
    }

    for (unit, term) in kernel.terminals.iter().enumerate() {
        let machine = kernel.table.machine().clone();
        let table_for_driver = kernel.table.clone();
        let term = term.clone();
        std::thread::Builder::new()
            .name(format!("term_driver_{unit}"))
            .spawn(move || drivers::terminal::run(machine, table_for_driver, unit, term))
            .expect("terminal driver threads spawn at boot");
    }

    let kernel_for_init = kernel.clone();
    kernel
        .table
        .clone()
        .boot("init", move || init_entry(kernel_for_init));

    kernel
}
