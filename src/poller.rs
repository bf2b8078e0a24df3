// src/poller.rs - Readiness multiplexer and wake pipe
//
// The engine rebuilds its interest set from the live session predicates on
// every pass, so the poller is a flat poll(2) set rather than a persistent
// registration table:
// - Level-triggered, no timeout: the wait returns only when something is ready
// - EINTR auto-retry
// - The wake pipe's read end rides in every set; any thread can interrupt the
//   wait by writing one byte to the write end

use log::warn;
use std::io;
use std::os::unix::io::RawFd;

/// Event interest flags for one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const READABLE: Interest = Interest {
        readable: true,
        writable: false,
    };

    pub fn is_empty(&self) -> bool {
        !self.readable && !self.writable
    }

    fn to_poll_events(self) -> libc::c_short {
        let mut events = 0;
        if self.readable {
            events |= libc::POLLIN;
        }
        if self.writable {
            events |= libc::POLLOUT;
        }
        events
    }
}

/// Readiness reported for one descriptor.
///
/// Error and hangup conditions are folded into both directions: a refused
/// connect or a peer reset must reach the session's read/write handler, which
/// turns the subsequent syscall result into the right notification.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub fd: RawFd,
    pub readable: bool,
    pub writable: bool,
}

/// Flat poll(2) set, rebuilt by the caller before every wait.
pub struct Poller {
    fds: Vec<libc::pollfd>,
}

impl Poller {
    pub fn new() -> Self {
        Self {
            fds: Vec::with_capacity(16),
        }
    }

    /// Drop all queued descriptors in preparation for the next pass.
    pub fn clear(&mut self) {
        self.fds.clear();
    }

    /// Queue a descriptor with the given interest for the next wait.
    pub fn queue(&mut self, fd: RawFd, interest: Interest) {
        self.fds.push(libc::pollfd {
            fd,
            events: interest.to_poll_events(),
            revents: 0,
        });
    }

    /// Block until at least one queued descriptor is ready.
    ///
    /// Returns the descriptors with any readiness (including error/hangup
    /// conditions on descriptors whose sessions have meanwhile been closed,
    /// which the dispatch skips by ID lookup).
    pub fn wait(&mut self) -> io::Result<Vec<Event>> {
        loop {
            // SAFETY: self.fds points to a valid pollfd array of its own
            // length for the duration of the call; poll only writes revents.
            let res = unsafe {
                libc::poll(self.fds.as_mut_ptr(), self.fds.len() as libc::nfds_t, -1)
            };

            if res < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue; // EINTR - retry
                }
                return Err(err);
            }

            let mut ready = Vec::with_capacity(res as usize);
            for pfd in &self.fds {
                if pfd.revents == 0 {
                    continue;
                }
                let exceptional =
                    pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0;
                ready.push(Event {
                    fd: pfd.fd,
                    readable: pfd.revents & libc::POLLIN != 0 || exceptional,
                    writable: pfd.revents & libc::POLLOUT != 0 || exceptional,
                });
            }
            return Ok(ready);
        }
    }
}

// ============================================================================
// Wake pipe
// ============================================================================

/// Self-pipe used to interrupt the readiness wait from other threads.
///
/// The read end is polled alongside the sessions; control operations write a
/// single byte after mutating shared state so the loop re-derives its
/// interest set.
pub struct WakePipe {
    read_fd: RawFd,
    write_fd: RawFd,
}

impl WakePipe {
    pub fn new() -> io::Result<Self> {
        let mut fds = [0 as RawFd; 2];
        // SAFETY: fds is a valid two-element array; pipe fills both entries
        // on success.
        let res = unsafe { libc::pipe(fds.as_mut_ptr()) };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            read_fd: fds[0],
            write_fd: fds[1],
        })
    }

    pub fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    /// Write one byte to the pipe so a blocked readiness wait returns.
    pub fn poke(&self) {
        let dummy: u8 = 0;
        loop {
            // SAFETY: write_fd is owned by self and open until drop; the
            // buffer is a valid single byte.
            let n = unsafe { libc::write(self.write_fd, &dummy as *const u8 as *const _, 1) };
            if n >= 0 {
                return;
            }
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            warn!("error writing to wake pipe: {}", err);
            return;
        }
    }

    /// Consume one queued wake-up byte.
    pub fn drain(&self) {
        let mut c: u8 = 0;
        loop {
            // SAFETY: read_fd is owned by self and open until drop; the
            // buffer is a valid single byte.
            let n = unsafe { libc::read(self.read_fd, &mut c as *mut u8 as *mut _, 1) };
            if n >= 0 {
                return;
            }
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            warn!("error reading from wake pipe: {}", err);
            return;
        }
    }
}

impl Drop for WakePipe {
    fn drop(&mut self) {
        // SAFETY: both descriptors were created by pipe() in new() and are
        // owned exclusively by self; drop runs once.
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
