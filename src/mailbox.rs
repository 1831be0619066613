//! Mailboxes: a bounded FIFO of fixed-size messages, usable as a general
//! wait primitive down to a zero-capacity rendezvous.
//!
//! A `Mutex`-guarded ring buffer with reader/writer bookkeeping, plus a
//! `Condvar` for blocking send/receive. The process table's own blocking
//! primitives (`proc::Table::block`/`unblock`) do not route through an
//! actual [`Mailbox`]: doing so would block the calling OS thread directly
//! rather than release the dispatcher's baton to another process,
//! deadlocking the whole table the moment two real processes contend (see
//! `sem` and `drivers::terminal`, which hit exactly that and were
//! reworked to call `Table::block`/`unblock` directly instead). This
//! module stands on its own, exercised by its own tests below.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

/// A bounded FIFO of byte messages, each at most `slot_size` bytes.
///
/// A mailbox with `capacity == 0` accepts no buffered messages at all —
/// `send` blocks until a matching `recv` is already waiting and vice
/// versa, a rendezvous. A `(0, 0)` mailbox used purely for its blocking
/// side-effect doubles as a condition variable.
pub struct Mailbox {
    slot_size: usize,
    capacity: usize,
    inner: Mutex<Inner>,
    not_empty: Condvar,
    not_full: Condvar,
}

struct Inner {
    queue: VecDeque<Vec<u8>>,
    /// Count of `recv` calls parked waiting for a rendezvous send, only
    /// meaningful when `capacity == 0`.
    waiting_receivers: usize,
}

/// Errors from the non-blocking variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MailboxError {
    #[error("mailbox is full")]
    Full,
    #[error("mailbox is empty")]
    Empty,
    #[error("message too large for this mailbox's slot size")]
    MessageTooLarge,
}

impl Mailbox {
    pub fn new(capacity: usize, slot_size: usize) -> Arc<Self> {
        Arc::new(Mailbox {
            slot_size,
            capacity,
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                waiting_receivers: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        })
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    fn check_size(&self, msg: &[u8]) -> Result<(), MailboxError> {
        if msg.len() > self.slot_size {
            Err(MailboxError::MessageTooLarge)
        } else {
            Ok(())
        }
    }

    /// Block until `msg` has been accepted: either queued (buffered
    /// mailbox with room) or handed directly to a waiting receiver
    /// (zero-capacity rendezvous).
    pub fn send(&self, msg: &[u8]) {
        self.check_size(msg).expect("oversized mailbox message");
        let mut guard = self.inner.lock().unwrap();
        if self.capacity == 0 {
            while guard.waiting_receivers == 0 {
                guard = self.not_full.wait(guard).unwrap();
            }
        } else {
            while guard.queue.len() >= self.capacity {
                guard = self.not_full.wait(guard).unwrap();
            }
        }
        guard.queue.push_back(msg.to_vec());
        self.not_empty.notify_one();
    }

    /// Send without blocking; fails if the mailbox is full (or, for a
    /// zero-capacity mailbox, if no receiver is currently waiting).
    pub fn try_send(&self, msg: &[u8]) -> Result<(), MailboxError> {
        self.check_size(msg)?;
        let mut guard = self.inner.lock().unwrap();
        let has_room = if self.capacity == 0 {
            guard.waiting_receivers > 0
        } else {
            guard.queue.len() < self.capacity
        };
        if !has_room {
            return Err(MailboxError::Full);
        }
        guard.queue.push_back(msg.to_vec());
        self.not_empty.notify_one();
        Ok(())
    }

    /// Block until a message is available, copy it into `buf`, and
    /// return the number of bytes written.
    pub fn recv(&self, buf: &mut [u8]) -> usize {
        let mut guard = self.inner.lock().unwrap();
        guard.waiting_receivers += 1;
        self.not_full.notify_one();
        while guard.queue.is_empty() {
            guard = self.not_empty.wait(guard).unwrap();
        }
        guard.waiting_receivers -= 1;
        let msg = guard.queue.pop_front().unwrap();
        let n = msg.len().min(buf.len());
        buf[..n].copy_from_slice(&msg[..n]);
        self.not_full.notify_one();
        n
    }

    /// Receive without blocking; fails if nothing is queued.
    pub fn try_recv(&self, buf: &mut [u8]) -> Result<usize, MailboxError> {
        let mut guard = self.inner.lock().unwrap();
        let msg = guard.queue.pop_front().ok_or(MailboxError::Empty)?;
        let n = msg.len().min(buf.len());
        buf[..n].copy_from_slice(&msg[..n]);
        self.not_full.notify_one();
        Ok(n)
    }

    /// Convenience for the zero-size "mailbox as condvar" idiom: block
    /// until a matching `wake()` arrives.
    pub fn wait(&self) {
        self.recv(&mut []);
    }

    /// Convenience dual of [`Mailbox::wait`].
    pub fn wake(&self) {
        self.send(&[]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn buffered_send_recv_round_trips_in_order() {
        let mbox = Mailbox::new(4, 8);
        mbox.send(b"one");
        mbox.send(b"two");
        let mut buf = [0u8; 8];
        let n = mbox.recv(&mut buf);
        assert_eq!(&buf[..n], b"one");
        let n = mbox.recv(&mut buf);
        assert_eq!(&buf[..n], b"two");
    }

    #[test]
    fn zero_capacity_mailbox_rendezvous() {
        let mbox = Mailbox::new(0, 0);
        let sender = mbox.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            sender.wake();
        });
        mbox.wait();
        handle.join().unwrap();
    }

    #[test]
    fn try_recv_empty_errs() {
        let mbox = Mailbox::new(2, 4);
        let mut buf = [0u8; 4];
        assert_eq!(mbox.try_recv(&mut buf), Err(MailboxError::Empty));
    }

    #[test]
    fn try_send_full_errs() {
        let mbox = Mailbox::new(1, 4);
        mbox.try_send(b"hi").unwrap();
        assert_eq!(mbox.try_send(b"no"), Err(MailboxError::Full));
    }
}
