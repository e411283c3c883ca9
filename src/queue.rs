//! A FIFO queue paired with an `eventfd`, so the event loop can learn
//! "there's something to pop" by polling one readable fd instead of
//! checking queue length on every iteration.
//!
//! Grounded on `libparistraceroute/probe.c`'s send/recv queues, which are
//! plain dynarrays signaled through `network_t::eventfd_sendq`/
//! `eventfd_recvq`; `pt_loop.c`'s `make_event_fd` creates those with
//! `EFD_SEMAPHORE`, i.e. each `read()` decrements the counter by exactly
//! one rather than draining it, which is exactly the semantics needed
//! here: one post per queued item, one wakeup consumed per pop.

use std::collections::VecDeque;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use crate::error::{ProbezError, Result};

pub struct EventQueue<T> {
    items: VecDeque<T>,
    eventfd: OwnedFd,
}

impl<T> EventQueue<T> {
    pub fn new() -> Result<Self> {
        // SAFETY: eventfd(2) either returns a valid owned fd or -1; the
        // flags request non-blocking, semaphore-style reads.
        let raw = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_SEMAPHORE) };
        if raw < 0 {
            return Err(ProbezError::Io(io::Error::last_os_error()));
        }
        let eventfd = unsafe { OwnedFd::from_raw_fd(raw) };
        Ok(Self {
            items: VecDeque::new(),
            eventfd,
        })
    }

    pub fn push(&mut self, item: T) -> Result<()> {
        self.items.push_back(item);
        let value: u64 = 1;
        let n = unsafe {
            libc::write(
                self.eventfd.as_raw_fd(),
                &value as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if n < 0 {
            return Err(ProbezError::Io(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Pops one item, consuming exactly one pending wakeup. Returns
    /// `None` if the queue (and thus the eventfd counter) is empty.
    pub fn pop(&mut self) -> Result<Option<T>> {
        if self.items.is_empty() {
            return Ok(None);
        }
        let mut value: u64 = 0;
        let n = unsafe {
            libc::read(
                self.eventfd.as_raw_fd(),
                &mut value as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::WouldBlock {
                return Err(ProbezError::Io(err));
            }
        }
        Ok(self.items.pop_front())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.eventfd.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_pop_preserves_fifo_order() {
        let mut q: EventQueue<u32> = EventQueue::new().unwrap();
        q.push(1).unwrap();
        q.push(2).unwrap();
        assert_eq!(q.pop().unwrap(), Some(1));
        assert_eq!(q.pop().unwrap(), Some(2));
        assert_eq!(q.pop().unwrap(), None);
    }
}
