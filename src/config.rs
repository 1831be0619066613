//! Kernel-wide constants, kept in one place rather than scattered as magic
//! numbers across modules (mirrors the `param.rs` convention of the xv6 ports
//! in the reference pack).

/// Number of slots in the process table.
pub const MAXPROC: usize = 50;

/// Maximum length of a process name, including the terminating nul.
pub const MAXNAME: usize = 50;

/// Maximum number of counting semaphores.
pub const MAXSEMS: usize = 200;

/// Minimum stack size accepted by `Table::fork`.
pub const MIN_STACK: usize = 4096;

/// Priority reserved for the bootstrap process ("init").
pub const INIT_PRIORITY: u32 = 6;

/// Number of priority run queues (priorities 1..=6).
pub const NUM_PRIORITIES: usize = 6;

/// Simulator time units a process may run consecutively before the
/// dispatcher rotates it to the back of its priority queue.
pub const TIME_SLICE: u64 = 80;

/// Clock ticks per simulated second.
pub const TICKS_PER_SECOND: u64 = 10;

/// Terminal units exposed by the machine.
pub const TERM_UNITS: usize = 4;

/// Disk units exposed by the machine.
pub const DISK_UNITS: usize = 2;

/// Maximum length of one terminal line, including the trailing newline.
pub const MAXLINE: usize = 80;

/// Depth of the per-unit terminal read mailbox (in whole lines).
pub const TERM_READ_SLOTS: usize = 10;

/// Bytes per disk sector.
pub const DISK_SECTOR_SIZE: usize = 512;

/// Sectors ("blocks") per disk track.
pub const BLOCKS_PER_TRACK: usize = 16;
