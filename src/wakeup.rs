//! Cross-thread wakeup signal backed by an eventfd.
//!
//! Producer threads `ping()` after queueing work; the event-loop thread
//! registers the fd for readable-readiness and `drain()`s it when woken.
//! Multiple pings before a drain coalesce into one wake (the eventfd counter
//! accumulates). The signal carries no data, only "check the queue".

use std::io;
use std::os::fd::RawFd;

use crate::error::Error;

pub(crate) struct Wakeup {
    fd: RawFd,
}

impl Wakeup {
    pub(crate) fn new() -> Result<Self, Error> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(Error::Wakeup(io::Error::last_os_error()));
        }
        Ok(Self { fd })
    }

    /// Signal the event-loop thread. Callable from any thread, never blocks.
    pub(crate) fn ping(&self) {
        let one: u64 = 1;
        // EAGAIN means the counter is saturated, which still leaves the fd
        // readable; the pending wake is preserved either way.
        let _ = unsafe {
            libc::write(
                self.fd,
                &one as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
    }

    /// Clear the pending state. Event-loop thread only.
    pub(crate) fn drain(&self) {
        let mut counter: u64 = 0;
        let _ = unsafe {
            libc::read(
                self.fd,
                &mut counter as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
    }

    pub(crate) fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for Wakeup {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}
