//! Device drivers: clock, terminal, and disk.
//!
//! Each one is "a service loop waits on a device's interrupt, then wakes
//! whoever asked" — the clock and terminal loops run as free-standing
//! background threads rather than table processes, since they need to
//! touch the process table without ever holding its dispatcher baton. See
//! `crate::boot`'s doc comment for why.

pub mod clock;
pub mod disk;
pub mod terminal;
