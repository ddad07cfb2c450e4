//! A file-descriptor-shaped readiness primitive.
//!
//! The flare backs the proxy mailbox: external event loops poll its read
//! end, which is kept readable exactly while the mailbox holds responses.
//! It is a nonblocking socketpair used as an eventfd equivalent.

use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

/// A level-style readiness flag exposed as a pollable file descriptor.
#[derive(Debug)]
pub(crate) struct Flare {
    read: UnixStream,
    write: UnixStream,
}

impl Flare {
    /// Create an unfired flare.
    pub(crate) fn new() -> io::Result<Self> {
        let (read, write) = UnixStream::pair()?;
        read.set_nonblocking(true)?;
        write.set_nonblocking(true)?;
        Ok(Self { read, write })
    }

    /// The pollable read end; readable while the flare is fired.
    pub(crate) fn fd(&self) -> RawFd {
        self.read.as_raw_fd()
    }

    /// Raise the readiness level.
    pub(crate) fn fire(&self) {
        // A full pipe already reads as ready; losing the byte is harmless.
        let _ = (&self.write).write(&[1u8]);
    }

    /// Drop the readiness level by draining all pending bytes.
    pub(crate) fn extinguish(&self) {
        let mut buf = [0u8; 64];
        loop {
            match (&self.read).read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
    }

    /// Whether the flare is currently fired. Reads one pending byte and puts
    /// it back, so the observed level is preserved.
    #[cfg(test)]
    pub(crate) fn is_fired(&self) -> bool {
        let mut buf = [0u8; 1];
        match (&self.read).read(&mut buf) {
            Ok(n) if n > 0 => {
                let _ = (&self.write).write(&buf[..n]);
                true
            }
            _ => false,
        }
    }
}
