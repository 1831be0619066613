//! The user-mode runtime surface: the trap vector and the syscall
//! argument shapes user code calls through.

pub mod trap;
