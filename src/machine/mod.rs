//! The machine abstraction consumed by the kernel.
//!
//! Everything in this module is the "host simulator": saveable CPU
//! contexts, the processor-status word, and the four device classes. It is
//! an external collaborator whose *contract* the kernel depends on, not
//! hardware the kernel owns. [`sim`] provides one concrete, hosted
//! implementation ([`sim::SimMachine`]) used by this crate's own tests and
//! by any embedder without a real simulator.

pub mod sim;

use bitflags::bitflags;

bitflags! {
    /// The processor-status word. A single global register on this
    /// single-CPU model — there is exactly one PSR, shared serially by
    /// whichever process is running.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Psr: u32 {
        /// Interrupts are enabled.
        const INTERRUPTS_ENABLED = 0b01;
        /// The CPU is in kernel mode (unset = user mode).
        const KERNEL_MODE        = 0b10;
    }
}

impl Psr {
    /// The PSR a freshly booted machine starts in: kernel mode,
    /// interrupts disabled.
    pub const fn boot() -> Self {
        Self::KERNEL_MODE
    }

    pub const fn is_kernel_mode(self) -> bool {
        self.contains(Self::KERNEL_MODE)
    }

    pub const fn interrupts_enabled(self) -> bool {
        self.contains(Self::INTERRUPTS_ENABLED)
    }
}

/// The device classes the machine exposes: one clock, and as many disk
/// and terminal units as configured, distinguished within a class by unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    Clock,
    Disk,
    Terminal,
}

/// A request posted via [`Machine::device_output`].
#[derive(Debug, Clone)]
pub enum DeviceRequest {
    /// Enable/disable transmit and receive interrupts for a terminal unit.
    TermSetInterrupts { xmit: bool, recv: bool },
    /// Transmit one character on a terminal unit.
    TermTransmit(u8),
    /// Seek a disk unit to an absolute track.
    DiskSeek(u32),
    /// Read one sector at the given block offset within the current track.
    DiskRead { block: u32 },
    /// Write one sector at the given block offset within the current track.
    DiskWrite {
        block: u32,
        sector: [u8; crate::config::DISK_SECTOR_SIZE],
    },
    /// Query disk geometry (total track count).
    DiskGeometry,
}

/// The outcome of a device operation, returned by [`Machine::wait_device`]
/// and [`Machine::device_input`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceStatus {
    /// A clock tick fired.
    ClockTick,
    /// A character arrived on a terminal's receive line.
    TermRecv(u8),
    /// A terminal's transmit line is ready for the next character.
    TermXmitReady,
    /// A previously issued disk operation with no payload (seek/write)
    /// completed successfully.
    DiskComplete,
    /// A previously issued disk read completed with this sector's bytes.
    DiskSector(Box<[u8; crate::config::DISK_SECTOR_SIZE]>),
    /// A previously issued geometry query completed.
    DiskGeometry { total_tracks: u32 },
    /// The device reported an error (e.g. an out-of-range track).
    Error,
}

/// Error returned synchronously by [`Machine::device_output`] (e.g. an
/// invalid unit); distinct from [`DeviceStatus::Error`], which is reported
/// asynchronously once the operation would have completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("no such device unit")]
    NoSuchUnit,
}

/// The contract the kernel depends on: context save/restore, device I/O
/// and interrupt wait, PSR get/set, halt, and a time source.
///
/// `Context` is an opaque, cheaply-cloneable handle to a saveable CPU
/// context, however a given implementation chooses to realize "save this
/// call stack, resume that one" — a bare-metal host might do it with a
/// hand-written register-save struct and inline asm; [`sim::SimMachine`]
/// does it with one OS thread per process handed a cooperative run-token.
pub trait Machine: Send + Sync + 'static {
    type Context: Clone + Send + 'static;

    /// Prepare a context that, once switched into, runs `entry` to
    /// completion on its own stack.
    fn context_init(&self, entry: Box<dyn FnOnce() + Send + 'static>) -> Self::Context;

    /// Switch the CPU from `old` to `new`. If `old` is `None` there is no
    /// context to save — the calling thread is not itself a process and
    /// will not be resumed. Otherwise the calling thread blocks here until
    /// some later call switches back into `old`.
    fn context_switch(&self, old: Option<&Self::Context>, new: &Self::Context);

    fn psr_get(&self) -> Psr;
    fn psr_set(&self, psr: Psr);

    fn device_output(
        &self,
        class: DeviceClass,
        unit: usize,
        request: DeviceRequest,
    ) -> Result<(), DeviceError>;

    /// Non-blocking status peek (no new interrupt is consumed).
    fn device_input(&self, class: DeviceClass, unit: usize) -> DeviceStatus;

    /// Block until the next interrupt for `(class, unit)` arrives.
    fn wait_device(&self, class: DeviceClass, unit: usize) -> DeviceStatus;

    /// Halt the machine. Never returns.
    fn halt(&self, code: i32) -> !;

    /// Monotonically increasing simulator time, in the same units the
    /// dispatcher compares against the time-slice length.
    fn current_time(&self) -> u64;

    /// Block the calling (non-process) thread until [`Machine::halt`] is
    /// called anywhere, returning its code. A bootstrap convenience for
    /// embedders and tests, standing in for a real simulator's outer event
    /// loop.
    fn wait_for_halt(&self) -> i32;
}
